//! Window-based Least Significant Bits (W-LSB) encoding and decoding.
//!
//! Implements RFC 3095, Sections 4.5.1 and 5.3.1 for values living in
//! Z/2^n Z (sequence numbers, IP-IDs, timestamps). The compressor side keeps
//! a sliding window of recently transmitted reference values and picks the
//! smallest number of LSBs that every reference in the window can decode
//! unambiguously; the decompressor side resolves received LSBs against its
//! single reference `v_ref_d`.

use std::collections::VecDeque;

use crate::error::{Field, RohcParsingError};

/// Interpretation-interval offset behavior for a W-LSB field.
///
/// RFC 3095 fixes `p` per field: 0 for sequence numbers, -1 for non-RTP
/// timestamps; RFC 4815 makes the RTP timestamp offset a function of `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsbOffset {
    /// Fixed shift, independent of the number of transmitted bits.
    Constant(i64),
    /// RTP timestamp shift: `p = 2^(k-2) - 1` for `k >= 2`, else 0.
    RtpTimestamp,
}

impl LsbOffset {
    /// Effective `p` for `k` transmitted bits.
    #[inline]
    pub fn for_bits(self, k: u8) -> i64 {
        match self {
            LsbOffset::Constant(p) => p,
            LsbOffset::RtpTimestamp => {
                if k >= 2 {
                    (1i64 << (k - 2)) - 1
                } else {
                    0
                }
            }
        }
    }
}

#[inline]
fn value_mask(width_bits: u8) -> u64 {
    if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    }
}

/// Lower edge of the interpretation interval `[v_ref - p, v_ref - p + 2^k - 1]`
/// in the modular space of `width_bits`.
#[inline]
fn interval_base(reference: u64, p: i64, width_bits: u8) -> u64 {
    let mask = value_mask(width_bits);
    if p >= 0 {
        reference.wrapping_sub(p as u64) & mask
    } else {
        reference.wrapping_add((-p) as u64) & mask
    }
}

/// Whether `value` falls inside the interpretation interval for `reference`.
///
/// All arithmetic is modulo `2^width_bits`; the interval may wrap.
pub fn is_value_in_lsb_interval(
    value: u64,
    reference: u64,
    num_lsb_bits: u8,
    p_offset: i64,
    width_bits: u8,
) -> bool {
    if num_lsb_bits == 0 || num_lsb_bits > width_bits {
        return num_lsb_bits == width_bits && num_lsb_bits != 0;
    }
    if num_lsb_bits == width_bits {
        return true;
    }
    let mask = value_mask(width_bits);
    let base = interval_base(reference, p_offset, width_bits);
    let offset = value.wrapping_sub(base) & mask;
    offset < (1u64 << num_lsb_bits)
}

/// Extracts the `k` least significant bits of `value`.
#[inline]
pub fn encode_lsb(value: u64, num_lsb_bits: u8) -> u64 {
    debug_assert!(num_lsb_bits >= 1 && num_lsb_bits <= 64);
    if num_lsb_bits >= 64 {
        value
    } else {
        value & ((1u64 << num_lsb_bits) - 1)
    }
}

/// Reconstructs a value from `k` received LSBs and the reference `v_ref_d`.
///
/// Finds the unique value congruent to `received_lsbs` modulo `2^k` inside
/// `[v_ref_d - p, v_ref_d - p + 2^k - 1]` (modulo `2^width_bits`). On equally
/// valid interpretations the numerically forward one wins, matching RFC 3095
/// Section 4.5.1.
///
/// # Errors
/// - [`RohcParsingError::InvalidLsbOperation`] - `k` is 0, exceeds the value
///   width, or the LSBs do not fit in `k` bits (algorithm misuse)
pub fn decode_lsb(
    received_lsbs: u64,
    reference: u64,
    num_lsb_bits: u8,
    p_offset: i64,
    width_bits: u8,
) -> Result<u64, RohcParsingError> {
    if num_lsb_bits == 0 || num_lsb_bits > width_bits || width_bits > 64 {
        return Err(RohcParsingError::InvalidLsbOperation {
            field: Field::NumLsbBits,
            description: format!(
                "k must be in 1..={} for a {}-bit value, got {}",
                width_bits, width_bits, num_lsb_bits
            ),
        });
    }
    let mask = value_mask(width_bits);
    if num_lsb_bits == width_bits {
        return Ok(received_lsbs & mask);
    }
    let window = 1u64 << num_lsb_bits;
    let lsb_mask = window - 1;
    if received_lsbs > lsb_mask {
        return Err(RohcParsingError::InvalidLsbOperation {
            field: Field::ReceivedLsbs,
            description: format!(
                "received LSBs {:#x} do not fit in {} bits",
                received_lsbs, num_lsb_bits
            ),
        });
    }

    let base = interval_base(reference, p_offset, width_bits);
    let mut candidate = ((base & !lsb_mask) | received_lsbs) & mask;
    if candidate.wrapping_sub(base) & mask >= window {
        candidate = candidate.wrapping_add(window) & mask;
    }
    debug_assert!(candidate.wrapping_sub(base) & mask < window);
    Ok(candidate)
}

/// One transmitted reference remembered by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WlsbRef {
    value: u64,
    sn: u64,
}

/// Sliding-window W-LSB encoder.
///
/// Holds the most recent `W` (value, sn) pairs the compressor transmitted.
/// `bits_required` returns the minimum `k` such that the interpretation
/// interval of **every** reference in the window covers the value to encode;
/// until the decompressor has acknowledged or implicitly advanced, any of
/// them may still be its `v_ref_d`.
#[derive(Debug, Clone)]
pub struct WlsbEncoder {
    window: VecDeque<WlsbRef>,
    capacity: usize,
    width_bits: u8,
    offset: LsbOffset,
}

impl WlsbEncoder {
    /// Creates an encoder for `width_bits`-wide values with window width
    /// `capacity` and offset behavior `offset`.
    pub fn new(capacity: usize, width_bits: u8, offset: LsbOffset) -> Self {
        debug_assert!(capacity >= 1 && capacity <= 256);
        debug_assert!(width_bits >= 1 && width_bits <= 64);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            width_bits,
            offset,
        }
    }

    /// Number of references currently held.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Configured window width W.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when no reference has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Drops every reference (context reset).
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Records a transmitted `(value, sn)` pair.
    ///
    /// Entries whose sequence number lags the newest by more than half the
    /// sequence space are purged first; then the oldest entry is evicted if
    /// the window is at capacity. The window therefore never exceeds `W`.
    pub fn add(&mut self, value: u64, sn: u64) {
        let mask = value_mask(self.width_bits);
        let half_space = 1u64 << (self.width_bits - 1);
        self.window
            .retain(|r| sn.wrapping_sub(r.sn) & mask <= half_space);
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(WlsbRef {
            value: value & mask,
            sn: sn & mask,
        });
    }

    /// Minimum `k` so that every reference in the window decodes `value`
    /// unambiguously; the full width when the window is empty.
    pub fn bits_required(&self, value: u64) -> u8 {
        if self.window.is_empty() {
            return self.width_bits;
        }
        for k in 1..self.width_bits {
            let p = self.offset.for_bits(k);
            if self
                .window
                .iter()
                .all(|r| is_value_in_lsb_interval(value, r.value, k, p, self.width_bits))
            {
                return k;
            }
        }
        self.width_bits
    }

    /// Encodes `value`, returning `(k, low k bits)`.
    pub fn encode(&self, value: u64) -> (u8, u64) {
        let k = self.bits_required(value);
        (k, encode_lsb(value, k))
    }

    /// The offset behavior this encoder was created with.
    pub fn offset(&self) -> LsbOffset {
        self.offset
    }
}

/// Decompressor-side reference holder for one W-LSB field.
#[derive(Debug, Clone)]
pub struct WlsbDecoder {
    v_ref: u64,
    width_bits: u8,
    offset: LsbOffset,
    has_ref: bool,
}

impl WlsbDecoder {
    /// Creates a decoder with no reference established yet.
    pub fn new(width_bits: u8, offset: LsbOffset) -> Self {
        Self {
            v_ref: 0,
            width_bits,
            offset,
            has_ref: false,
        }
    }

    /// Current reference value `v_ref_d`, if established.
    pub fn reference(&self) -> Option<u64> {
        self.has_ref.then_some(self.v_ref)
    }

    /// Replaces the reference after a CRC-validated decompression.
    pub fn set_reference(&mut self, value: u64) {
        self.v_ref = value & value_mask(self.width_bits);
        self.has_ref = true;
    }

    /// Forgets the reference (context downgrade).
    pub fn clear(&mut self) {
        self.has_ref = false;
        self.v_ref = 0;
    }

    /// Decodes `k` received LSBs against the current reference.
    ///
    /// # Errors
    /// - [`RohcParsingError::InvalidLsbOperation`] - No reference yet, or
    ///   parameter misuse
    pub fn decode(&self, received_lsbs: u64, k: u8) -> Result<u64, RohcParsingError> {
        if !self.has_ref {
            return Err(RohcParsingError::InvalidLsbOperation {
                field: Field::ReceivedLsbs,
                description: "no reference value established".to_string(),
            });
        }
        decode_lsb(
            received_lsbs,
            self.v_ref,
            k,
            self.offset.for_bits(k),
            self.width_bits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_membership_p0() {
        // v_ref = 10, k = 4: window [10, 25].
        assert!(is_value_in_lsb_interval(10, 10, 4, 0, 16));
        assert!(is_value_in_lsb_interval(25, 10, 4, 0, 16));
        assert!(!is_value_in_lsb_interval(9, 10, 4, 0, 16));
        assert!(!is_value_in_lsb_interval(26, 10, 4, 0, 16));
    }

    #[test]
    fn interval_membership_wraps_in_16_bit_space() {
        // v_ref = 65530, k = 4: window [65530, 9] mod 2^16.
        assert!(is_value_in_lsb_interval(65535, 65530, 4, 0, 16));
        assert!(is_value_in_lsb_interval(0, 65530, 4, 0, 16));
        assert!(is_value_in_lsb_interval(9, 65530, 4, 0, 16));
        assert!(!is_value_in_lsb_interval(10, 65530, 4, 0, 16));
        assert!(!is_value_in_lsb_interval(65529, 65530, 4, 0, 16));
    }

    #[test]
    fn negative_p_shifts_window_forward() {
        // v_ref = 10, k = 3, p = -1: window [11, 18].
        assert!(is_value_in_lsb_interval(11, 10, 3, -1, 16));
        assert!(is_value_in_lsb_interval(18, 10, 3, -1, 16));
        assert!(!is_value_in_lsb_interval(10, 10, 3, -1, 16));
        assert!(!is_value_in_lsb_interval(19, 10, 3, -1, 16));
    }

    #[test]
    fn decode_basic_and_wrapping() {
        assert_eq!(decode_lsb(0x4, 100, 4, 0, 16).unwrap(), 100);
        assert_eq!(decode_lsb(0x0, 100, 4, 0, 16).unwrap(), 112);
        assert_eq!(decode_lsb(0xF, 100, 4, 0, 16).unwrap(), 111);
        // Wrap: v_ref = 65535, LSBs 2 -> 2.
        assert_eq!(decode_lsb(2, 65535, 4, 0, 16).unwrap(), 2);
        // 32-bit space wrap.
        assert_eq!(
            decode_lsb(1, (u32::MAX - 3) as u64, 6, 0, 32).unwrap(),
            1
        );
    }

    #[test]
    fn decode_rejects_misuse() {
        assert!(decode_lsb(0, 10, 0, 0, 16).is_err());
        assert!(decode_lsb(0, 10, 17, 0, 16).is_err());
        assert!(decode_lsb(0x10, 10, 4, 0, 16).is_err());
    }

    #[test]
    fn decode_forward_interpretation_wins() {
        // v_ref = 10, k = 4, p = 0: candidates 4 and 20 share LSBs 0100;
        // only 20 is inside [10, 25].
        assert_eq!(decode_lsb(0x4, 10, 4, 0, 16).unwrap(), 20);
    }

    #[test]
    fn rtp_ts_offset_depends_on_k() {
        assert_eq!(LsbOffset::RtpTimestamp.for_bits(1), 0);
        assert_eq!(LsbOffset::RtpTimestamp.for_bits(2), 0);
        assert_eq!(LsbOffset::RtpTimestamp.for_bits(4), 3);
        assert_eq!(LsbOffset::RtpTimestamp.for_bits(8), 63);
        assert_eq!(LsbOffset::Constant(-1).for_bits(8), -1);
    }

    #[test]
    fn encoder_round_trips_against_every_reference() {
        let mut enc = WlsbEncoder::new(4, 16, LsbOffset::Constant(0));
        for sn in 100u64..104 {
            enc.add(sn, sn);
        }
        let value = 106u64;
        let (k, lsbs) = enc.encode(value);
        for reference in 100u64..104 {
            let decoded = decode_lsb(lsbs, reference, k, 0, 16).unwrap();
            assert_eq!(decoded, value, "reference {}", reference);
        }
    }

    #[test]
    fn encoder_emits_minimal_k() {
        let mut enc = WlsbEncoder::new(4, 16, LsbOffset::Constant(0));
        enc.add(100, 100);
        let value = 101u64;
        let k = enc.bits_required(value);
        assert!(k >= 1);
        // k is sufficient for every reference...
        assert!(is_value_in_lsb_interval(value, 100, k, 0, 16));
        // ...and k - 1 is not, for at least one reference.
        if k > 1 {
            assert!(!is_value_in_lsb_interval(value, 100, k - 1, 0, 16));
        }
    }

    #[test]
    fn encoder_window_never_exceeds_capacity() {
        let mut enc = WlsbEncoder::new(4, 16, LsbOffset::Constant(0));
        for sn in 0u64..50 {
            enc.add(sn, sn);
            assert!(enc.len() <= 4);
        }
        assert_eq!(enc.len(), 4);
    }

    #[test]
    fn encoder_purges_references_older_than_half_space() {
        let mut enc = WlsbEncoder::new(64, 16, LsbOffset::Constant(0));
        enc.add(10, 10);
        // Jump beyond half the 16-bit sequence space.
        enc.add(10 + 40000, 10 + 40000);
        assert_eq!(enc.len(), 1);
    }

    #[test]
    fn empty_window_requires_full_width() {
        let enc = WlsbEncoder::new(4, 16, LsbOffset::Constant(0));
        assert_eq!(enc.bits_required(500), 16);
    }

    #[test]
    fn decoder_requires_reference() {
        let mut dec = WlsbDecoder::new(16, LsbOffset::Constant(0));
        assert!(dec.decode(1, 4).is_err());
        dec.set_reference(100);
        assert_eq!(dec.decode(0x5, 4).unwrap(), 101);
        dec.clear();
        assert!(dec.decode(1, 4).is_err());
    }
}
