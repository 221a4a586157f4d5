//! Scaled RTP timestamp encoding (TS_STRIDE / TS_OFFSET / TS_SCALED).
//!
//! RFC 3095, Section 4.5.3: when the RTP timestamp advances by a fixed
//! stride per packet, only `TS_SCALED = ts / TS_STRIDE` needs W-LSB bits;
//! `TS_OFFSET = ts mod TS_STRIDE` is implicit once the stride is known. The
//! encoder walks three states:
//!
//! `InitTs` -> `InitStride` -> `SendScaled`
//!
//! with one back-edge whenever the stride breaks. The `SendScaled` state is
//! entered only after the stride has been transmitted `oa_repetitions`
//! times, so a decompressor that missed some packets still learns it.

use crate::encodings::{LsbOffset, WlsbDecoder, WlsbEncoder};
use crate::error::RohcParsingError;
use crate::sdvl::SDVL_MAX_VALUE;
use crate::types::Timestamp;

/// Encoder states, linear with one back-edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsScaledState {
    /// No usable timestamp delta yet; transmit the TS unscaled.
    #[default]
    InitTs,
    /// Stride candidate chosen; transmit it uncompressed until trusted.
    InitStride,
    /// Stride established; transmit W-LSB bits of TS_SCALED only.
    SendScaled,
}

/// What the current packet must carry for the timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsTransmission {
    /// Full unscaled timestamp.
    Unscaled,
    /// Full timestamp plus the stride declaration.
    StrideDeclaration { stride: u32 },
    /// W-LSB bits of TS_SCALED.
    Scaled,
}

/// Compressor-side scaled timestamp state machine.
#[derive(Debug, Clone)]
pub struct TsScaledEncoder {
    state: TsScaledState,
    stride: u32,
    ts_offset: u32,
    scaled: u32,
    old_scaled: u32,
    old_ts: Option<Timestamp>,
    /// Stride transmissions performed while in `InitStride`.
    stride_sends: u32,
    oa_repetitions: u32,
    /// Set when a TS jump kept the stride but broke SN-proportionality;
    /// the next packet retransmits all scaled bits.
    refresh_scaled: bool,
    scaled_window: WlsbEncoder,
}

impl TsScaledEncoder {
    /// Creates an encoder in `InitTs`.
    ///
    /// `oa_repetitions` is the optimistic-approach L; `wlsb_capacity` sizes
    /// the TS_SCALED reference window.
    pub fn new(oa_repetitions: u32, wlsb_capacity: usize) -> Self {
        Self {
            state: TsScaledState::InitTs,
            stride: 0,
            ts_offset: 0,
            scaled: 0,
            old_scaled: 0,
            old_ts: None,
            stride_sends: 0,
            oa_repetitions,
            refresh_scaled: false,
            scaled_window: WlsbEncoder::new(wlsb_capacity, 32, LsbOffset::RtpTimestamp),
        }
    }

    /// Current state.
    pub fn state(&self) -> TsScaledState {
        self.state
    }

    /// Established or candidate stride; 0 while in `InitTs`.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// TS_SCALED of the most recently observed packet.
    pub fn ts_scaled(&self) -> u32 {
        self.scaled
    }

    /// TS_OFFSET of the most recently observed packet.
    pub fn ts_offset(&self) -> u32 {
        self.ts_offset
    }

    /// Resets to `InitTs` (context re-initialization).
    pub fn reset(&mut self) {
        *self = Self::new(self.oa_repetitions, self.scaled_window.capacity());
    }

    /// Feeds the timestamp of the packet being compressed and decides what
    /// the packet must carry. `sn_delta` is the sequence number advance
    /// since the previous packet.
    pub fn observe(&mut self, ts: Timestamp, sn_delta: u32) -> TsTransmission {
        let Some(old_ts) = self.old_ts else {
            // First packet of the flow.
            self.old_ts = Some(ts);
            return TsTransmission::Unscaled;
        };

        let delta = ts.wrapping_diff(old_ts);
        let wrapped = ts.value() < old_ts.value() && delta < (1 << 31);
        self.refresh_scaled = false;

        let transmission = match self.state {
            TsScaledState::InitTs => {
                if delta == 0 || delta > SDVL_MAX_VALUE {
                    TsTransmission::Unscaled
                } else {
                    self.enter_init_stride(delta, ts);
                    TsTransmission::StrideDeclaration { stride: self.stride }
                }
            }
            TsScaledState::InitStride => {
                if delta == 0 || delta > SDVL_MAX_VALUE {
                    self.state = TsScaledState::InitTs;
                    self.stride = 0;
                    self.stride_sends = 0;
                    TsTransmission::Unscaled
                } else if delta % self.stride == 0 {
                    self.recompute(ts);
                    // The full-TS packet that anchored TS_OFFSET counts as
                    // the first stride-bearing transmission, so the gate is
                    // stride_sends + 1 against L.
                    if self.stride_sends + 1 >= self.oa_repetitions {
                        self.state = TsScaledState::SendScaled;
                        TsTransmission::Scaled
                    } else {
                        TsTransmission::StrideDeclaration { stride: self.stride }
                    }
                } else {
                    // Stride changed mid-sequence: restart the repetitions.
                    self.enter_init_stride(delta, ts);
                    TsTransmission::StrideDeclaration { stride: self.stride }
                }
            }
            TsScaledState::SendScaled => {
                if wrapped && ts.value() % self.stride != self.ts_offset {
                    // 2^32 wraparound moved the offset: the scaled domain is
                    // no longer continuous, re-establish the stride.
                    self.enter_init_stride(self.stride, ts);
                    TsTransmission::StrideDeclaration { stride: self.stride }
                } else if delta == 0 {
                    self.recompute(ts);
                    TsTransmission::Scaled
                } else if delta % self.stride != 0 {
                    // Clock resync at the source.
                    self.enter_init_stride(delta, ts);
                    TsTransmission::StrideDeclaration { stride: self.stride }
                } else {
                    self.recompute(ts);
                    let scaled_delta = self.scaled.wrapping_sub(self.old_scaled);
                    if scaled_delta != sn_delta {
                        // TS jump with the stride intact: keep the state but
                        // resend all scaled bits for robustness.
                        self.refresh_scaled = true;
                    }
                    TsTransmission::Scaled
                }
            }
        };

        self.old_ts = Some(ts);
        transmission
    }

    fn enter_init_stride(&mut self, stride: u32, ts: Timestamp) {
        debug_assert!(stride > 0);
        self.state = TsScaledState::InitStride;
        self.stride = stride;
        self.stride_sends = 0;
        self.scaled_window.clear();
        self.recompute(ts);
        self.old_scaled = self.scaled;
    }

    fn recompute(&mut self, ts: Timestamp) {
        self.old_scaled = self.scaled;
        self.ts_offset = ts.value() % self.stride;
        self.scaled = ts.value() / self.stride;
    }

    /// Records that the stride was transmitted in the current packet.
    ///
    /// The transition to `SendScaled` happens in [`observe`] once enough
    /// stride-bearing packets are out; this only advances the counter.
    ///
    /// [`observe`]: Self::observe
    pub fn mark_stride_sent(&mut self) {
        if self.state == TsScaledState::InitStride {
            self.stride_sends += 1;
        }
    }

    /// Records the packet as sent, adding the scaled value to the W-LSB
    /// window when in `SendScaled`.
    pub fn mark_sent(&mut self, sn: u32) {
        if self.state == TsScaledState::SendScaled {
            self.scaled_window.add(self.scaled as u64, sn as u64);
        }
    }

    /// Bits of TS_SCALED the current packet needs; the full 32 when a
    /// robustness refresh is pending.
    pub fn scaled_bits_required(&self) -> u8 {
        if self.refresh_scaled {
            32
        } else {
            self.scaled_window.bits_required(self.scaled as u64)
        }
    }

    /// Whether the decompressor can derive this packet's TS from the SN
    /// advance alone, letting UO-0 omit TS bits entirely.
    pub fn is_deducible_from_sn(&self, sn_delta: u32) -> bool {
        self.state == TsScaledState::SendScaled
            && !self.refresh_scaled
            && self.scaled.wrapping_sub(self.old_scaled) == sn_delta
    }
}

/// Decompressor-side scaled timestamp reconstruction.
#[derive(Debug, Clone)]
pub struct TsScaledDecoder {
    stride: Option<u32>,
    ts_offset: u32,
    scaled: WlsbDecoder,
}

impl TsScaledDecoder {
    /// Creates a decoder with no stride established.
    pub fn new() -> Self {
        Self {
            stride: None,
            ts_offset: 0,
            scaled: WlsbDecoder::new(32, LsbOffset::RtpTimestamp),
        }
    }

    /// Established stride, if any.
    pub fn stride(&self) -> Option<u32> {
        self.stride
    }

    /// Installs a stride learned from an IR-DYN chain or extension 3.
    pub fn set_stride(&mut self, stride: u32) {
        if stride == 0 {
            self.stride = None;
        } else {
            self.stride = Some(stride);
        }
    }

    /// Forgets all scaled state (context downgrade).
    pub fn clear(&mut self) {
        self.stride = None;
        self.ts_offset = 0;
        self.scaled.clear();
    }

    /// Updates the reference after a CRC-validated packet carrying `ts`.
    pub fn update_from_ts(&mut self, ts: Timestamp) {
        if let Some(stride) = self.stride {
            self.ts_offset = ts.value() % stride;
            self.scaled.set_reference((ts.value() / stride) as u64);
        }
    }

    /// Reconstructs a timestamp from `k` received TS_SCALED LSBs.
    ///
    /// # Errors
    /// - [`RohcParsingError::InvalidLsbOperation`] - No stride or reference
    pub fn decode_scaled(&self, lsbs: u32, k: u8) -> Result<Timestamp, RohcParsingError> {
        let stride = self.stride.ok_or_else(|| RohcParsingError::InvalidLsbOperation {
            field: crate::error::Field::TsScaled,
            description: "no TS_STRIDE established".to_string(),
        })?;
        let scaled = self.scaled.decode(lsbs as u64, k)? as u32;
        Ok(Timestamp::new(
            scaled.wrapping_mul(stride).wrapping_add(self.ts_offset),
        ))
    }

    /// Derives the timestamp implied by an SN advance of `sn_delta`, for
    /// packets that omit TS bits (UO-0 deduction).
    pub fn infer_from_sn_delta(&self, sn_delta: u32) -> Option<Timestamp> {
        let stride = self.stride?;
        let reference = self.scaled.reference()? as u32;
        let scaled = reference.wrapping_add(sn_delta);
        Some(Timestamp::new(
            scaled.wrapping_mul(stride).wrapping_add(self.ts_offset),
        ))
    }
}

impl Default for TsScaledDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const L: u32 = 3;

    fn encoder() -> TsScaledEncoder {
        TsScaledEncoder::new(L, 4)
    }

    #[test]
    fn first_packet_is_unscaled() {
        let mut enc = encoder();
        assert_eq!(enc.observe(2000.into(), 1), TsTransmission::Unscaled);
        assert_eq!(enc.state(), TsScaledState::InitTs);
    }

    #[test]
    fn stride_established_after_three_full_ts_packets() {
        let mut enc = encoder();
        // Packet 1 anchors the TS; packets 2 and 3 declare the stride.
        assert_eq!(enc.observe(2000.into(), 1), TsTransmission::Unscaled);
        assert_eq!(
            enc.observe(2160.into(), 1),
            TsTransmission::StrideDeclaration { stride: 160 }
        );
        enc.mark_stride_sent();
        assert_eq!(
            enc.observe(2320.into(), 1),
            TsTransmission::StrideDeclaration { stride: 160 }
        );
        enc.mark_stride_sent();
        // Packet 4 scales.
        assert_eq!(enc.observe(2480.into(), 1), TsTransmission::Scaled);
        assert_eq!(enc.state(), TsScaledState::SendScaled);
        assert_eq!(enc.ts_scaled(), 2480 / 160);
        assert_eq!(enc.ts_offset(), 2480 % 160);
    }

    #[test]
    fn zero_delta_falls_back_to_init_ts_during_establishment() {
        let mut enc = encoder();
        enc.observe(2000.into(), 1);
        enc.observe(2160.into(), 1);
        assert_eq!(enc.state(), TsScaledState::InitStride);
        assert_eq!(enc.observe(2160.into(), 0), TsTransmission::Unscaled);
        assert_eq!(enc.state(), TsScaledState::InitTs);
    }

    #[test]
    fn stride_change_resets_repetition_counter() {
        let mut enc = encoder();
        enc.observe(1000.into(), 1);
        enc.observe(1160.into(), 1);
        enc.mark_stride_sent();
        // Delta changes: counter must restart for the new stride.
        assert_eq!(
            enc.observe(1260.into(), 1),
            TsTransmission::StrideDeclaration { stride: 100 }
        );
        enc.mark_stride_sent();
        assert_eq!(enc.state(), TsScaledState::InitStride);
        assert_eq!(
            enc.observe(1360.into(), 1),
            TsTransmission::StrideDeclaration { stride: 100 }
        );
        enc.mark_stride_sent();
        assert_eq!(enc.observe(1460.into(), 1), TsTransmission::Scaled);
        assert_eq!(enc.state(), TsScaledState::SendScaled);
    }

    fn established(start_ts: u32, stride: u32) -> TsScaledEncoder {
        let mut enc = encoder();
        let mut ts = start_ts;
        enc.observe(ts.into(), 1);
        for _ in 0..L {
            ts = ts.wrapping_add(stride);
            let tx = enc.observe(ts.into(), 1);
            if matches!(tx, TsTransmission::StrideDeclaration { .. }) {
                enc.mark_stride_sent();
            }
            enc.mark_sent(1);
        }
        assert_eq!(enc.state(), TsScaledState::SendScaled);
        enc
    }

    #[test]
    fn non_multiple_delta_re_enters_init_stride() {
        let mut enc = established(2000, 160);
        let tx = enc.observe((2000 + 4 * 160 + 7).into(), 1);
        assert!(matches!(tx, TsTransmission::StrideDeclaration { .. }));
        assert_eq!(enc.state(), TsScaledState::InitStride);
    }

    #[test]
    fn ts_jump_with_intact_stride_requests_full_scaled_bits() {
        let mut enc = established(2000, 160);
        // SN advanced by 1 but TS jumped 10 strides.
        let tx = enc.observe((2000 + 3 * 160 + 10 * 160).into(), 1);
        assert_eq!(tx, TsTransmission::Scaled);
        assert_eq!(enc.state(), TsScaledState::SendScaled);
        assert_eq!(enc.scaled_bits_required(), 32);
        assert!(!enc.is_deducible_from_sn(1));
    }

    #[test]
    fn deducible_when_scaled_tracks_sn() {
        let mut enc = established(2000, 160);
        enc.observe((2000 + 4 * 160).into(), 1);
        assert!(enc.is_deducible_from_sn(1));
        assert!(!enc.is_deducible_from_sn(2));
    }

    #[test]
    fn wraparound_with_offset_change_resets_stride() {
        // 2^32 is not a multiple of 160, so the offset moves across the wrap.
        let stride = 160u32;
        let last_before_wrap = u32::MAX - (u32::MAX % stride); // multiple of 160
        let mut enc = established(last_before_wrap - 3 * stride, stride);
        let wrapped_ts = last_before_wrap.wrapping_add(stride);
        assert!(wrapped_ts < last_before_wrap);
        let tx = enc.observe(wrapped_ts.into(), 1);
        assert!(matches!(tx, TsTransmission::StrideDeclaration { .. }));
        assert_eq!(enc.state(), TsScaledState::InitStride);

        // Stride must be re-sent L times before scaling resumes.
        let mut ts = wrapped_ts;
        enc.mark_stride_sent();
        for _ in 0..L - 1 {
            ts = ts.wrapping_add(stride);
            enc.observe(ts.into(), 1);
            enc.mark_stride_sent();
        }
        assert_eq!(enc.state(), TsScaledState::SendScaled);
    }

    #[test]
    fn decoder_round_trips_scaled_values() {
        let mut dec = TsScaledDecoder::new();
        dec.set_stride(160);
        dec.update_from_ts(2320.into());
        // Next packet: scaled advanced by one.
        let scaled = 2480 / 160;
        let ts = dec.decode_scaled(scaled & 0xF, 4).unwrap();
        assert_eq!(ts, 2480);
        assert_eq!(dec.infer_from_sn_delta(1), Some(Timestamp::new(2480)));
    }

    #[test]
    fn decoder_without_stride_rejects_scaled_bits() {
        let dec = TsScaledDecoder::new();
        assert!(dec.decode_scaled(3, 4).is_err());
        assert_eq!(dec.infer_from_sn_delta(1), None);
    }
}
