//! Core type definitions for the ROHC implementation.
//!
//! Provides zero-cost newtypes to prevent field mixups at compile time.
//! All types use `#[repr(transparent)]` for guaranteed zero runtime cost.

use std::fmt;
use std::ops::{Add, AddAssign, Deref, Sub};

use serde::{Deserialize, Serialize};

/// Generates a ROHC newtype wrapper with the common trait surface.
macro_rules! rohc_newtype {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty) => $prefix:literal
        $(, custom_methods: { $($custom:tt)* })?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[derive(Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Creates a new instance.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Raw value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }

            /// Cast to u64 for W-LSB arithmetic.
            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0 as u64
            }

            /// Wrapping addition.
            #[inline]
            pub const fn wrapping_add(self, rhs: $inner) -> Self {
                Self(self.0.wrapping_add(rhs))
            }

            /// Wrapping subtraction returning the inner type.
            #[inline]
            pub const fn wrapping_sub(self, rhs: Self) -> $inner {
                self.0.wrapping_sub(rhs.0)
            }

            $($($custom)*)?
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl PartialEq<$inner> for $name {
            #[inline]
            fn eq(&self, other: &$inner) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for $inner {
            #[inline]
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }

        impl PartialOrd<$inner> for $name {
            #[inline]
            fn partial_cmp(&self, other: &$inner) -> Option<std::cmp::Ordering> {
                self.0.partial_cmp(other)
            }
        }

        impl PartialOrd<$name> for $inner {
            #[inline]
            fn partial_cmp(&self, other: &$name) -> Option<std::cmp::Ordering> {
                self.partial_cmp(&other.0)
            }
        }

        impl Add<$inner> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: $inner) -> Self::Output {
                self.wrapping_add(rhs)
            }
        }

        impl AddAssign<$inner> for $name {
            #[inline]
            fn add_assign(&mut self, rhs: $inner) {
                *self = self.wrapping_add(rhs);
            }
        }

        impl Sub<Self> for $name {
            type Output = $inner;

            #[inline]
            fn sub(self, rhs: Self) -> Self::Output {
                self.wrapping_sub(rhs)
            }
        }
    };
}

rohc_newtype!(
    /// Context identifier keying a per-flow state record.
    ///
    /// Small CIDs live in `[0, 15]`, large CIDs in `[0, 16383]`; the namespace
    /// is fixed at endpoint creation.
    ContextId(u16) => "CID"
);

rohc_newtype!(
    /// Profile sequence number (RTP SN, ESP SN, or a synthetic SN).
    ///
    /// Stored as `u32`; profiles mask to their configured width (16 or 32 bits)
    /// when encoding.
    SequenceNumber(u32) => "SN",
    custom_methods: {
        /// Wrapping subtraction within an `n`-bit sequence space.
        #[inline]
        pub const fn wrapping_sub_width(self, rhs: Self, width_bits: u8) -> u32 {
            let mask = if width_bits >= 32 {
                u32::MAX
            } else {
                (1u32 << width_bits) - 1
            };
            self.0.wrapping_sub(rhs.0) & mask
        }
    }
);

rohc_newtype!(
    /// IP identification field of an IPv4 header.
    IpId(u16) => "IP_ID"
);

rohc_newtype!(
    /// RTP timestamp value.
    Timestamp(u32) => "TS",
    custom_methods: {
        /// Wrapping difference between this timestamp and an older one.
        #[inline]
        pub fn wrapping_diff(self, other: Timestamp) -> u32 {
            self.0.wrapping_sub(other.0)
        }

        /// Big-endian byte representation.
        #[inline]
        pub fn to_be_bytes(self) -> [u8; 4] {
            self.0.to_be_bytes()
        }
    }
);

rohc_newtype!(
    /// RTP synchronization source (SSRC) identifier.
    Ssrc(u32) => "SSRC",
    custom_methods: {
        /// Big-endian byte representation.
        #[inline]
        pub fn to_be_bytes(self) -> [u8; 4] {
            self.0.to_be_bytes()
        }
    }
);

rohc_newtype!(
    /// ESP security parameters index.
    Spi(u32) => "SPI",
    custom_methods: {
        /// Big-endian byte representation.
        #[inline]
        pub fn to_be_bytes(self) -> [u8; 4] {
            self.0.to_be_bytes()
        }
    }
);

impl ContextId {
    /// Highest CID expressible in small-CID mode.
    pub const MAX_SMALL_CID: Self = Self::new(15);
    /// Highest CID expressible in large-CID mode.
    pub const MAX_LARGE_CID: Self = Self::new(16383);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_id_display_and_compare() {
        let cid = ContextId::new(7);
        assert_eq!(cid, 7);
        assert_eq!(format!("{}", cid), "CID7");
        assert!(cid < ContextId::MAX_SMALL_CID);
    }

    #[test]
    fn sequence_number_wraps_in_16_bit_space() {
        let a = SequenceNumber::new(0xFFFE);
        let b = a + 3;
        assert_eq!(b, 0x10001);
        assert_eq!(b.wrapping_sub_width(a, 16), 3);
        assert_eq!(
            SequenceNumber::new(1).wrapping_sub_width(SequenceNumber::new(0xFFFF), 16),
            2
        );
    }

    #[test]
    fn sequence_number_wraps_in_32_bit_space() {
        let a = SequenceNumber::new(u32::MAX);
        let b = a + 2;
        assert_eq!(b, 1);
        assert_eq!(b.wrapping_sub_width(a, 32), 2);
    }

    #[test]
    fn timestamp_wrapping_diff() {
        let ts1 = Timestamp::new(u32::MAX - 9);
        let ts2 = ts1 + 20;
        assert_eq!(ts2.wrapping_diff(ts1), 20);
        assert_eq!(ts1.to_be_bytes(), (u32::MAX - 9).to_be_bytes());
    }

    #[test]
    fn newtypes_are_zero_cost() {
        assert_eq!(std::mem::size_of::<ContextId>(), std::mem::size_of::<u16>());
        assert_eq!(
            std::mem::size_of::<SequenceNumber>(),
            std::mem::size_of::<u32>()
        );
        assert_eq!(std::mem::size_of::<IpId>(), std::mem::size_of::<u16>());
        assert_eq!(std::mem::size_of::<Spi>(), std::mem::size_of::<u32>());
    }

    #[test]
    fn spi_round_trips_through_serde() {
        let spi = Spi::new(0xDEADBEEF);
        let json = serde_json::to_string(&spi).unwrap();
        let back: Spi = serde_json::from_str(&json).unwrap();
        assert_eq!(spi, back);
        assert_eq!(spi.to_be_bytes(), [0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
