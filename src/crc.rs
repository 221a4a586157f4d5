//! CRC calculation utilities for ROHC packet validation.
//!
//! Thin wrappers around the `crc` crate providing the CRC widths used by the
//! framework (RFC 3095, Section 5.9): CRC-3 for UO-0/UO-1 packets, CRC-7 for
//! UOR-2, CRC-8 for IR/IR-DYN and feedback, plus the CRC-2 guarding extension
//! flags. CRC-6 is carried for the chain formats of the optional TCP profile.
//!
//! The per-field STATIC/DYNAMIC masking described by the protocol is realized
//! by construction: callers assemble the exact field bytes to be covered (see
//! `headers::crc_input`) rather than masking a raw buffer.

use std::fmt;

use crc::{Algorithm, Crc, CRC_3_ROHC, CRC_7_ROHC, CRC_8_ROHC};

/// ROHC CRC-2 (polynomial x^2+x+1, init 0x3), reflected like its siblings.
pub const CRC_2_ROHC: Algorithm<u8> = Algorithm {
    width: 2,
    poly: 0x3,
    init: 0x3,
    refin: true,
    refout: true,
    xorout: 0x0,
    check: 0x1,
    residue: 0x0,
};

/// ROHC CRC-6 (polynomial x^6+x+1, init 0x3f), reserved for TCP chains.
pub const CRC_6_ROHC: Algorithm<u8> = Algorithm {
    width: 6,
    poly: 0x03,
    init: 0x3F,
    refin: true,
    refout: true,
    xorout: 0x0,
    check: 0x4,
    residue: 0x0,
};

/// Pre-initialized CRC engines, shared immutably across endpoints.
///
/// Building a `Crc<u8>` computes its lookup table; constructing this once per
/// endpoint keeps table generation off the per-packet path.
pub struct CrcCalculators {
    crc2: Crc<u8>,
    crc3: Crc<u8>,
    crc6: Crc<u8>,
    crc7: Crc<u8>,
    crc8: Crc<u8>,
}

impl fmt::Debug for CrcCalculators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrcCalculators")
            .field("algorithms", &"ROHC CRC-2/3/6/7/8")
            .finish()
    }
}

impl CrcCalculators {
    /// Creates calculators for every ROHC CRC kind.
    pub fn new() -> Self {
        Self {
            crc2: Crc::<u8>::new(&CRC_2_ROHC),
            crc3: Crc::<u8>::new(&CRC_3_ROHC),
            crc6: Crc::<u8>::new(&CRC_6_ROHC),
            crc7: Crc::<u8>::new(&CRC_7_ROHC),
            crc8: Crc::<u8>::new(&CRC_8_ROHC),
        }
    }

    /// 2-bit CRC over `input` (extension 3 flag octets).
    #[inline]
    pub fn crc2(&self, input: &[u8]) -> u8 {
        self.crc2.checksum(input)
    }

    /// 3-bit CRC over `input` (UO-0 and UO-1 header guards).
    #[inline]
    pub fn crc3(&self, input: &[u8]) -> u8 {
        self.crc3.checksum(input)
    }

    /// 6-bit CRC over `input`.
    #[inline]
    pub fn crc6(&self, input: &[u8]) -> u8 {
        self.crc6.checksum(input)
    }

    /// 7-bit CRC over `input` (UOR-2 header guards).
    #[inline]
    pub fn crc7(&self, input: &[u8]) -> u8 {
        self.crc7.checksum(input)
    }

    /// 8-bit CRC over `input` (IR/IR-DYN packets, feedback CRC option).
    #[inline]
    pub fn crc8(&self, input: &[u8]) -> u8 {
        self.crc8.checksum(input)
    }

    /// 8-bit CRC over a packet with one byte treated as zero.
    ///
    /// IR packets and the feedback CRC option compute their guard with the
    /// CRC field itself zeroed; this avoids copying the packet to do so.
    pub fn crc8_with_zeroed_byte(&self, input: &[u8], zeroed_index: usize) -> u8 {
        debug_assert!(zeroed_index < input.len());
        let mut digest = self.crc8.digest();
        digest.update(&input[..zeroed_index]);
        digest.update(&[0u8]);
        digest.update(&input[zeroed_index + 1..]);
        digest.finalize()
    }
}

impl Default for CrcCalculators {
    fn default() -> Self {
        Self::new()
    }
}
