//! MRRU segmentation and reassembly.
//!
//! When a ROHC packet (typically an IR) exceeds the link MTU and the peers
//! negotiated a nonzero MRRU, the packet is split into segments typed
//! `1111111L`: `L = 0` marks a non-final segment, `L = 1` the final one.
//! The receiver concatenates segment payloads, bounded by its MRRU, and
//! processes the reconstructed unit as a normal packet.

use crate::constants::{SEGMENT_TYPE_FINAL, SEGMENT_TYPE_NON_FINAL};
use crate::error::{DecompressionError, Field, ParseContext, RohcBuildingError, RohcParsingError};

/// Iterator yielding framed segments of an oversized packet.
#[derive(Debug)]
pub struct Segmenter<'a> {
    remaining: &'a [u8],
    /// Payload bytes per segment (MTU minus the type octet).
    chunk: usize,
}

impl<'a> Segmenter<'a> {
    /// Splits `packet` for links carrying at most `mtu` bytes per frame.
    ///
    /// Returns `None` when the packet already fits, when the MTU cannot
    /// carry any payload, or when `mrru` is zero (segmentation disabled) or
    /// smaller than the packet.
    pub fn new(packet: &'a [u8], mtu: usize, mrru: u16) -> Option<Self> {
        if packet.len() <= mtu {
            return None;
        }
        if mtu < 2 || mrru == 0 || packet.len() > mrru as usize {
            return None;
        }
        Some(Self {
            remaining: packet,
            chunk: mtu - 1,
        })
    }

    /// Writes the next framed segment into `out`, or `None` when done.
    pub fn next_into(&mut self, out: &mut [u8]) -> Option<Result<usize, RohcBuildingError>> {
        if self.remaining.is_empty() {
            return None;
        }
        let take = self.remaining.len().min(self.chunk);
        let final_segment = take == self.remaining.len();
        if out.len() < 1 + take {
            return Some(Err(RohcBuildingError::BufferTooSmall {
                needed: 1 + take,
                available: out.len(),
                context: ParseContext::SegmentPacket,
            }));
        }
        out[0] = if final_segment {
            SEGMENT_TYPE_FINAL
        } else {
            SEGMENT_TYPE_NON_FINAL
        };
        out[1..1 + take].copy_from_slice(&self.remaining[..take]);
        self.remaining = &self.remaining[take..];
        Some(Ok(1 + take))
    }
}

/// Receiver-side reassembly buffer, bounded by the configured MRRU.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    buffer: Vec<u8>,
    mrru: usize,
    active: bool,
}

/// Outcome of feeding one segment.
#[derive(Debug, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Non-final segment stored; more expected.
    Pending,
    /// Final segment received; the reconstructed unit is returned.
    Complete(Vec<u8>),
}

impl ReassemblyBuffer {
    /// Creates a buffer honoring `mrru` (0 disables reassembly).
    pub fn new(mrru: u16) -> Self {
        Self {
            buffer: Vec::new(),
            mrru: mrru as usize,
            active: false,
        }
    }

    /// Whether segments are accepted at all.
    pub fn enabled(&self) -> bool {
        self.mrru > 0
    }

    /// Feeds one framed segment.
    ///
    /// # Errors
    /// - [`DecompressionError::MrruExceeded`] - Reconstruction would exceed
    ///   the MRRU; the partial unit is discarded
    /// - [`RohcParsingError`] - Not a segment or reassembly is disabled
    pub fn push(&mut self, segment: &[u8]) -> Result<SegmentOutcome, DecompressionError> {
        let type_octet = *segment.first().ok_or(RohcParsingError::NotEnoughData {
            needed: 1,
            got: 0,
            context: ParseContext::SegmentPacket,
        })?;
        if type_octet != SEGMENT_TYPE_FINAL && type_octet != SEGMENT_TYPE_NON_FINAL {
            return Err(RohcParsingError::InvalidPacketType {
                discriminator: type_octet,
                profile_id: None,
            }
            .into());
        }
        if !self.enabled() {
            return Err(RohcParsingError::InvalidFieldValue {
                field: Field::SegmentLength,
                context: ParseContext::SegmentPacket,
                expected: 1,
                got: 0,
            }
            .into());
        }

        let payload = &segment[1..];
        if self.buffer.len() + payload.len() > self.mrru {
            let got = self.buffer.len() + payload.len();
            self.reset();
            return Err(DecompressionError::MrruExceeded {
                got,
                mrru: self.mrru,
            });
        }
        self.buffer.extend_from_slice(payload);
        self.active = true;

        if type_octet == SEGMENT_TYPE_FINAL {
            self.active = false;
            Ok(SegmentOutcome::Complete(std::mem::take(&mut self.buffer)))
        } else {
            Ok(SegmentOutcome::Pending)
        }
    }

    /// Drops any partial reconstruction.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.active = false;
    }

    /// True while a reconstruction is in progress.
    pub fn in_progress(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_round_trip() {
        let packet: Vec<u8> = (0..100u8).collect();
        let mut segmenter = Segmenter::new(&packet, 40, 1000).unwrap();
        let mut reassembly = ReassemblyBuffer::new(1000);
        let mut buf = [0u8; 64];
        let mut outcome = None;
        while let Some(result) = segmenter.next_into(&mut buf) {
            let len = result.unwrap();
            assert!(len <= 40);
            outcome = Some(reassembly.push(&buf[..len]).unwrap());
        }
        assert_eq!(outcome, Some(SegmentOutcome::Complete(packet)));
        assert!(!reassembly.in_progress());
    }

    #[test]
    fn packet_fitting_mtu_is_not_segmented() {
        let packet = [0u8; 30];
        assert!(Segmenter::new(&packet, 40, 1000).is_none());
    }

    #[test]
    fn segmentation_disabled_without_mrru() {
        let packet = [0u8; 100];
        assert!(Segmenter::new(&packet, 40, 0).is_none());

        let mut reassembly = ReassemblyBuffer::new(0);
        assert!(reassembly.push(&[SEGMENT_TYPE_FINAL, 1]).is_err());
    }

    #[test]
    fn oversized_reconstruction_is_rejected() {
        let mut reassembly = ReassemblyBuffer::new(16);
        assert_eq!(
            reassembly.push(&[SEGMENT_TYPE_NON_FINAL; 13]).unwrap(),
            SegmentOutcome::Pending
        );
        let err = reassembly.push(&[SEGMENT_TYPE_FINAL; 8]).unwrap_err();
        assert!(matches!(err, DecompressionError::MrruExceeded { .. }));
        // The partial unit is gone.
        assert!(!reassembly.in_progress());
    }

    #[test]
    fn non_segment_bytes_are_rejected() {
        let mut reassembly = ReassemblyBuffer::new(100);
        assert!(reassembly.push(&[0xFD, 0x00]).is_err());
    }

    #[test]
    fn segment_count_matches_mtu_split() {
        let packet = [7u8; 100];
        let mut segmenter = Segmenter::new(&packet, 40, 200).unwrap();
        let mut buf = [0u8; 64];
        let mut count = 0;
        let mut finals = 0;
        while let Some(result) = segmenter.next_into(&mut buf) {
            let len = result.unwrap();
            count += 1;
            if buf[0] == SEGMENT_TYPE_FINAL {
                finals += 1;
                assert!(len <= 40);
            }
        }
        // 100 bytes at 39 payload bytes per segment.
        assert_eq!(count, 3);
        assert_eq!(finals, 1);
    }
}
