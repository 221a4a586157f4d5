//! Profile 0x0000: Uncompressed.
//!
//! The fallback profile for packets no other profile can claim (unknown
//! transports, IPv6 extension chains, non-IP traffic). An IR establishes
//! the context, after which packets travel verbatim as "Normal" packets;
//! the only overhead is the CID prefix.

use std::time::Instant;

use crate::config::{CompressorConfig, DecompressorConfig};
use crate::constants::{IR_PACKET_TYPE_BASE, IR_PACKET_TYPE_D_BIT};
use crate::crc::CrcCalculators;
use crate::error::{
    CrcType, DecompressionError, ParseContext, RohcBuildingError, RohcError, RohcParsingError,
};
use crate::headers::PacketHeaders;
use crate::profiles::generic::context::{
    CompressorState, DecompressorState, GenericCompressorContext, GenericDecompressorContext,
};
use crate::profiles::RohcProfile;
use crate::traits::{
    DecompressOutcome, ProfileHandler, RohcCompressorContext, RohcDecompressorContext,
};
use crate::types::ContextId;

/// Length of the uncompressed-profile IR prefix: type, profile, CRC-8.
const UNCOMPRESSED_IR_PREFIX: usize = 3;

/// Handler for the Uncompressed profile.
#[derive(Debug, Default)]
pub struct UncompressedHandler;

impl UncompressedHandler {
    /// Creates the handler.
    pub fn new() -> Self {
        Self
    }
}

impl ProfileHandler for UncompressedHandler {
    fn profile_id(&self) -> RohcProfile {
        RohcProfile::Uncompressed
    }

    fn create_compressor_context(
        &self,
        cid: ContextId,
        config: &CompressorConfig,
        now: Instant,
    ) -> Box<dyn RohcCompressorContext> {
        Box::new(GenericCompressorContext::new(
            RohcProfile::Uncompressed,
            cid,
            config,
            now,
        ))
    }

    fn create_decompressor_context(
        &self,
        cid: ContextId,
        config: &DecompressorConfig,
        now: Instant,
    ) -> Box<dyn RohcDecompressorContext> {
        Box::new(GenericDecompressorContext::new(
            RohcProfile::Uncompressed,
            cid,
            config,
            now,
        ))
    }

    fn compress(
        &self,
        context: &mut dyn RohcCompressorContext,
        crc: &CrcCalculators,
        _headers: &PacketHeaders,
        payload: &[u8],
        now: Instant,
        out: &mut [u8],
    ) -> Result<usize, RohcError> {
        let ctx = context
            .as_any_mut()
            .downcast_mut::<GenericCompressorContext>()
            .ok_or(RohcError::Internal("compressor context type mismatch"))?;

        // The whole original packet rides as `payload` for this profile.
        if ctx.state == CompressorState::Ir {
            let needed = UNCOMPRESSED_IR_PREFIX + payload.len();
            if out.len() < needed {
                return Err(RohcError::Building(RohcBuildingError::BufferTooSmall {
                    needed,
                    available: out.len(),
                    context: ParseContext::IrPacket,
                }));
            }
            out[0] = IR_PACKET_TYPE_BASE; // D = 0: no chains follow
            out[1] = RohcProfile::Uncompressed.into();
            out[2] = 0;
            out[2] = crc.crc8_with_zeroed_byte(&out[..UNCOMPRESSED_IR_PREFIX], 2);
            out[UNCOMPRESSED_IR_PREFIX..needed].copy_from_slice(payload);
            ctx.state = CompressorState::So;
            ctx.stats.ir_packets += 1;
            ctx.stats.packets += 1;
            ctx.last_ir_at = now;
            return Ok(needed);
        }

        if out.len() < payload.len() {
            return Err(RohcError::Building(RohcBuildingError::BufferTooSmall {
                needed: payload.len(),
                available: out.len(),
                context: ParseContext::RohcPacketInput,
            }));
        }
        out[..payload.len()].copy_from_slice(payload);
        ctx.stats.packets += 1;
        Ok(payload.len())
    }

    fn decompress(
        &self,
        context: &mut dyn RohcDecompressorContext,
        crc: &CrcCalculators,
        core_packet: &[u8],
        out: &mut [u8],
    ) -> DecompressOutcome {
        let Some(ctx) = context
            .as_any_mut()
            .downcast_mut::<GenericDecompressorContext>()
        else {
            return DecompressOutcome::err(RohcError::Internal(
                "decompressor context type mismatch",
            ));
        };

        let Some(&first) = core_packet.first() else {
            return DecompressOutcome::err(RohcError::Parsing(RohcParsingError::NotEnoughData {
                needed: 1,
                got: 0,
                context: ParseContext::CorePacketAfterCid,
            }));
        };

        let payload = if first & !IR_PACKET_TYPE_D_BIT == IR_PACKET_TYPE_BASE {
            if core_packet.len() < UNCOMPRESSED_IR_PREFIX {
                return DecompressOutcome::err(RohcError::Parsing(
                    RohcParsingError::NotEnoughData {
                        needed: UNCOMPRESSED_IR_PREFIX,
                        got: core_packet.len(),
                        context: ParseContext::IrPacket,
                    },
                ));
            }
            let expected = core_packet[2];
            let calculated =
                crc.crc8_with_zeroed_byte(&core_packet[..UNCOMPRESSED_IR_PREFIX], 2);
            if expected != calculated {
                return DecompressOutcome::err(RohcError::Parsing(
                    RohcParsingError::CrcMismatch {
                        expected,
                        calculated,
                        crc_type: CrcType::Crc8Ir,
                    },
                ));
            }
            ctx.state = DecompressorState::FullContext;
            &core_packet[UNCOMPRESSED_IR_PREFIX..]
        } else {
            if ctx.state != DecompressorState::FullContext {
                return DecompressOutcome::err(RohcError::Decompression(
                    DecompressionError::InvalidStateForPacket {
                        cid: ctx.cid,
                        packet_type: first,
                    },
                ));
            }
            core_packet
        };

        if out.len() < payload.len() {
            return DecompressOutcome::err(RohcError::Building(
                RohcBuildingError::BufferTooSmall {
                    needed: payload.len(),
                    available: out.len(),
                    context: ParseContext::RohcPacketInput,
                },
            ));
        }
        out[..payload.len()].copy_from_slice(payload);
        ctx.stats.packets_ok += 1;
        DecompressOutcome::ok(payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (
        UncompressedHandler,
        Box<dyn RohcCompressorContext>,
        Box<dyn RohcDecompressorContext>,
        CrcCalculators,
    ) {
        let handler = UncompressedHandler::new();
        let now = Instant::now();
        let comp = handler.create_compressor_context(0.into(), &CompressorConfig::default(), now);
        let decomp =
            handler.create_decompressor_context(0.into(), &DecompressorConfig::default(), now);
        (handler, comp, decomp, CrcCalculators::new())
    }

    #[test]
    fn first_packet_is_ir_then_normal() {
        let (handler, mut comp, mut decomp, crc) = setup();
        let packet = [0x45u8, 0x00, 0x11, 0x22, 0x33];
        let headers = crate::headers::PacketHeaders {
            ip: crate::headers::IpHeader::V4(crate::headers::Ipv4Header {
                dscp: 0,
                ecn: 0,
                total_length: 0,
                identification: 0.into(),
                dont_fragment: false,
                more_fragments: false,
                fragment_offset: 0,
                ttl: 64,
                protocol: 250,
                checksum: 0,
                src: "1.1.1.1".parse().unwrap(),
                dst: "2.2.2.2".parse().unwrap(),
            }),
            transport: None,
            rtp: None,
            header_len: 0,
        };
        let mut buf = [0u8; 64];
        let now = Instant::now();

        let len = handler
            .compress(comp.as_mut(), &crc, &headers, &packet, now, &mut buf)
            .unwrap();
        assert_eq!(len, packet.len() + 3);
        assert_eq!(buf[0], IR_PACKET_TYPE_BASE);
        assert_eq!(buf[1], 0x00);

        let mut out = [0u8; 64];
        let outcome = handler.decompress(decomp.as_mut(), &crc, &buf[..len], &mut out);
        let out_len = outcome.result.unwrap();
        assert_eq!(&out[..out_len], &packet);

        // Second packet travels verbatim.
        let len = handler
            .compress(comp.as_mut(), &crc, &headers, &packet, now, &mut buf)
            .unwrap();
        assert_eq!(len, packet.len());
        let outcome = handler.decompress(decomp.as_mut(), &crc, &buf[..len], &mut out);
        assert_eq!(&out[..outcome.result.unwrap()], &packet);
    }

    #[test]
    fn normal_packet_without_context_is_rejected() {
        let (handler, _, mut decomp, crc) = setup();
        let mut out = [0u8; 64];
        let outcome = handler.decompress(decomp.as_mut(), &crc, &[0x45, 0x00], &mut out);
        assert!(matches!(
            outcome.result,
            Err(RohcError::Decompression(
                DecompressionError::InvalidStateForPacket { .. }
            ))
        ));
    }

    #[test]
    fn damaged_ir_prefix_is_rejected() {
        let (handler, mut comp, mut decomp, crc) = setup();
        let headers = crate::headers::PacketHeaders {
            ip: crate::headers::IpHeader::V4(crate::headers::Ipv4Header {
                dscp: 0,
                ecn: 0,
                total_length: 0,
                identification: 0.into(),
                dont_fragment: false,
                more_fragments: false,
                fragment_offset: 0,
                ttl: 64,
                protocol: 250,
                checksum: 0,
                src: "1.1.1.1".parse().unwrap(),
                dst: "2.2.2.2".parse().unwrap(),
            }),
            transport: None,
            rtp: None,
            header_len: 0,
        };
        let mut buf = [0u8; 64];
        let len = handler
            .compress(
                comp.as_mut(),
                &crc,
                &headers,
                &[1, 2, 3],
                Instant::now(),
                &mut buf,
            )
            .unwrap();
        buf[2] ^= 0xFF;
        let mut out = [0u8; 64];
        let outcome = handler.decompress(decomp.as_mut(), &crc, &buf[..len], &mut out);
        assert!(matches!(
            outcome.result,
            Err(RohcError::Parsing(RohcParsingError::CrcMismatch { .. }))
        ));
    }
}
