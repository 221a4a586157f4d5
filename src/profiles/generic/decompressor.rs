//! Generic decompressor: state machine, CRC-guided acceptance and repair.
//!
//! Accepts packets according to the current state (NC: IR only; SC: IR and
//! IR-DYN; FC: everything), reconstructs the uncompressed header chain from
//! the context reference plus the received bits, and commits the context
//! only when the carried CRC matches the reconstruction. Failures feed the
//! k-out-of-n windows that drive FC -> SC -> NC downgrades and, in the
//! bidirectional modes, NACK generation.

use crate::config::RohcMode;
use crate::constants::{IR_DYN_PACKET_TYPE, IR_PACKET_TYPE_BASE, IR_PACKET_TYPE_D_BIT};
use crate::crc::CrcCalculators;
use crate::error::{DecompressionError, Field, ParseContext, RohcBuildingError, RohcError, RohcParsingError};
use crate::feedback::{AckType, FeedbackElement};
use crate::headers::{build_headers, crc_input, IpHeader, PacketHeaders, Transport, CRC_INPUT_MAX};
use crate::packets::{
    parse_uo0, parse_uo1, parse_uo1_id, parse_uo1_rtp, parse_uo1_ts, parse_uor2, parse_uor2_rtp,
    Ext3, Extension,
};
use crate::profiles::generic::chains::{parse_ir, parse_ir_dyn, IpIdBehavior};
use crate::profiles::generic::context::{DecompressorState, GenericDecompressorContext};
use crate::traits::DecompressOutcome;
use crate::types::{IpId, SequenceNumber, Timestamp};

/// UO-family packet kinds, resolved against the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UoKind {
    Uo0,
    Uo1,
    Uo1Rtp,
    Uo1Id,
    Uo1Ts,
    Uor2,
    Uor2Rtp,
}

/// Field values recovered from a UO packet before reconstruction.
#[derive(Debug, Default)]
struct UoFields {
    sn_bits: u32,
    sn_width: u8,
    marker: Option<bool>,
    /// TS bits (scaled domain) and their width.
    ts_bits: Option<(u32, u8)>,
    /// IP-ID bits and their width.
    ipid_bits: Option<(u32, u8)>,
    ext3: Option<Ext3>,
    crc: u8,
    crc_is_7bit: bool,
    consumed: usize,
}

fn classify_uo(first: u8, is_rtp: bool, ipid_compressible: bool) -> Option<UoKind> {
    if first & 0x80 == 0 {
        Some(UoKind::Uo0)
    } else if first & 0xC0 == 0x80 {
        Some(if !is_rtp {
            UoKind::Uo1
        } else if !ipid_compressible {
            UoKind::Uo1Rtp
        } else if first & 0x20 == 0 {
            UoKind::Uo1Id
        } else {
            UoKind::Uo1Ts
        })
    } else if first & 0xE0 == 0xC0 {
        Some(if is_rtp { UoKind::Uor2Rtp } else { UoKind::Uor2 })
    } else {
        None
    }
}

fn extension_widths(ext: &Extension) -> (u8, u8) {
    match ext {
        Extension::Ext0 { .. } => (3, 3),
        Extension::Ext1 { .. } => (3, 11),
        Extension::Ext2 { .. } => (3, 19),
        Extension::Ext3(_) => (0, 0),
    }
}

/// Folds an optional extension into base SN bits and a T field.
fn merge_extension(
    fields: &mut UoFields,
    base_sn: u8,
    base_sn_width: u8,
    base_t: Option<(u32, u8)>,
    t_is_ts: bool,
    extension: Option<Extension>,
) {
    match extension {
        Some(Extension::Ext3(ext3)) => {
            fields.sn_bits = base_sn as u32;
            fields.sn_width = base_sn_width;
            if t_is_ts {
                fields.ts_bits = base_t;
            } else {
                fields.ipid_bits = base_t;
            }
            fields.ext3 = Some(ext3);
        }
        Some(ext) => {
            let (sn_w, t_w) = extension_widths(&ext);
            let (_, ext_sn) = ext.sn_bits();
            let (_, ext_t) = ext.t_bits();
            fields.sn_bits = ((base_sn as u32) << sn_w) | ext_sn;
            fields.sn_width = base_sn_width + sn_w;
            let merged = base_t.map(|(bits, width)| ((bits << t_w) | ext_t, width + t_w));
            if t_is_ts {
                fields.ts_bits = merged;
            } else {
                // UOR-2 has no base IP-ID bits; the extension T field is
                // the whole value.
                fields.ipid_bits = merged.or(Some((ext_t, t_w)));
            }
        }
        None => {
            fields.sn_bits = base_sn as u32;
            fields.sn_width = base_sn_width;
            if t_is_ts {
                fields.ts_bits = base_t;
            } else {
                fields.ipid_bits = base_t;
            }
        }
    }
    if let Some(ext3) = &fields.ext3 {
        if let Some(sn8) = ext3.sn8 {
            fields.sn_bits = (fields.sn_bits << 8) | sn8 as u32;
            fields.sn_width += 8;
        }
    }
}

fn parse_uo_fields(kind: UoKind, core: &[u8]) -> Result<UoFields, RohcParsingError> {
    let mut fields = UoFields::default();
    match kind {
        UoKind::Uo0 => {
            let (packet, consumed) = parse_uo0(core)?;
            fields.sn_bits = packet.sn_lsb as u32;
            fields.sn_width = 4;
            fields.crc = packet.crc3;
            fields.consumed = consumed;
        }
        UoKind::Uo1 => {
            let (packet, consumed) = parse_uo1(core)?;
            fields.sn_bits = packet.sn_lsb as u32;
            fields.sn_width = 5;
            fields.ipid_bits = Some((packet.ip_id_lsb as u32, 6));
            fields.crc = packet.crc3;
            fields.consumed = consumed;
        }
        UoKind::Uo1Rtp => {
            let (packet, consumed) = parse_uo1_rtp(core)?;
            fields.sn_bits = packet.sn_lsb as u32;
            fields.sn_width = 4;
            fields.marker = Some(packet.marker);
            fields.ts_bits = Some((packet.ts_lsb as u32, 6));
            fields.crc = packet.crc3;
            fields.consumed = consumed;
        }
        UoKind::Uo1Id => {
            let (packet, consumed) = parse_uo1_id(core)?;
            fields.marker = Some(packet.marker);
            fields.crc = packet.crc3;
            fields.consumed = consumed;
            let base_t = Some((packet.ip_id_lsb as u32, 5));
            merge_extension(&mut fields, packet.sn_lsb, 3, base_t, false, packet.extension);
        }
        UoKind::Uo1Ts => {
            let (packet, consumed) = parse_uo1_ts(core)?;
            fields.marker = Some(packet.marker);
            fields.crc = packet.crc3;
            fields.consumed = consumed;
            let base_t = Some((packet.ts_lsb as u32, 5));
            merge_extension(&mut fields, packet.sn_lsb, 3, base_t, true, packet.extension);
        }
        UoKind::Uor2 => {
            let (packet, consumed) = parse_uor2(core)?;
            fields.crc = packet.crc7;
            fields.crc_is_7bit = true;
            fields.consumed = consumed;
            merge_extension(&mut fields, packet.sn_lsb, 5, None, false, packet.extension);
        }
        UoKind::Uor2Rtp => {
            let (packet, consumed) = parse_uor2_rtp(core)?;
            fields.marker = Some(packet.marker);
            fields.crc = packet.crc7;
            fields.crc_is_7bit = true;
            fields.consumed = consumed;
            let base_t = Some((packet.ts_lsb as u32, 7));
            merge_extension(&mut fields, packet.sn_lsb, 5, base_t, true, packet.extension);
        }
    }
    Ok(fields)
}

/// Values carried by the trailer behind a UO header.
#[derive(Debug, Default, Clone, Copy)]
struct Trailer {
    ipid: Option<u16>,
    udp_checksum: Option<u16>,
    udp_lite: Option<(u16, u16)>,
    consumed: usize,
}

fn parse_trailer(
    ctx: &GenericDecompressorContext,
    reference: &PacketHeaders,
    data: &[u8],
) -> Result<Trailer, RohcParsingError> {
    let mut trailer = Trailer::default();
    let mut at = 0;
    let need = |n: usize| -> Result<(), RohcParsingError> {
        if data.len() < n {
            Err(RohcParsingError::NotEnoughData {
                needed: n,
                got: data.len(),
                context: ParseContext::UoPacket,
            })
        } else {
            Ok(())
        }
    };
    if ctx.ipid_behavior == IpIdBehavior::Random && matches!(reference.ip, IpHeader::V4(_)) {
        need(at + 2)?;
        trailer.ipid = Some(u16::from_be_bytes([data[at], data[at + 1]]));
        at += 2;
    }
    match &reference.transport {
        Some(Transport::Udp(u)) if u.checksum != 0 => {
            need(at + 2)?;
            trailer.udp_checksum = Some(u16::from_be_bytes([data[at], data[at + 1]]));
            at += 2;
        }
        Some(Transport::UdpLite(_)) => {
            need(at + 4)?;
            trailer.udp_lite = Some((
                u16::from_be_bytes([data[at], data[at + 1]]),
                u16::from_be_bytes([data[at + 2], data[at + 3]]),
            ));
            at += 4;
        }
        _ => {}
    }
    trailer.consumed = at;
    Ok(trailer)
}

/// Reconstructs the header chain for a candidate SN.
fn reconstruct(
    ctx: &GenericDecompressorContext,
    reference: &PacketHeaders,
    kind: UoKind,
    fields: &UoFields,
    trailer: &Trailer,
    sn: SequenceNumber,
    sn_delta: u32,
) -> Result<PacketHeaders, RohcParsingError> {
    let mut headers = reference.clone();

    // IP-ID.
    if let IpHeader::V4(h) = &mut headers.ip {
        let new_ipid = if let Some(ipid) = trailer.ipid {
            ipid
        } else if let Some(ext3_ipid) = fields.ext3.as_ref().and_then(|e| e.ip_id) {
            ext3_ipid
        } else {
            match ctx.ipid_behavior {
                IpIdBehavior::Zero => 0,
                IpIdBehavior::Random => h.identification.value(),
                IpIdBehavior::Sequential => match fields.ipid_bits {
                    Some((bits, width)) => ctx.ipid_decoder.decode(bits as u64, width)? as u16,
                    None => h.identification.value().wrapping_add(sn_delta as u16),
                },
            }
        };
        h.identification = IpId::new(new_ipid);
    }

    // Transport dynamic fields.
    match &mut headers.transport {
        Some(Transport::Udp(u)) => {
            if let Some(checksum) = trailer.udp_checksum {
                u.checksum = checksum;
            }
        }
        Some(Transport::UdpLite(u)) => {
            if let Some((coverage, checksum)) = trailer.udp_lite {
                u.checksum_coverage = coverage;
                u.checksum = checksum;
            }
        }
        Some(Transport::Esp(e)) => {
            e.sequence_number = sn.value();
        }
        None => {}
    }

    // RTP dynamic fields.
    if let Some(rtp) = &mut headers.rtp {
        rtp.sequence_number = sn.value() as u16;
        if let Some(marker) = fields.marker {
            rtp.marker = marker;
        }
        if let Some(ext3) = &fields.ext3 {
            rtp.marker = ext3.marker;
            if let Some(pt) = ext3.payload_type {
                rtp.payload_type = pt;
            }
        }
        rtp.timestamp = reconstruct_ts(ctx, kind, fields, rtp.timestamp, sn_delta)?;
    }

    // Extension 3 outer-IP updates.
    if let Some(ext3) = &fields.ext3 {
        if let Some((ttl, tos)) = ext3.ttl_tos {
            match &mut headers.ip {
                IpHeader::V4(h) => {
                    h.ttl = ttl;
                    h.dscp = tos >> 2;
                    h.ecn = tos & 0x03;
                    h.dont_fragment = ext3.df;
                }
                IpHeader::V6(h) => {
                    h.hop_limit = ttl;
                    h.dscp = tos >> 2;
                    h.ecn = tos & 0x03;
                }
            }
        }
    }

    Ok(headers)
}

fn reconstruct_ts(
    ctx: &GenericDecompressorContext,
    kind: UoKind,
    fields: &UoFields,
    reference_ts: Timestamp,
    sn_delta: u32,
) -> Result<Timestamp, RohcParsingError> {
    if let Some(ext3) = &fields.ext3 {
        if let Some(ts_value) = ext3.ts {
            return if ext3.ts_is_scaled {
                let stride = ext3.ts_stride.or(ctx.ts_decoder.stride()).ok_or_else(|| {
                    RohcParsingError::InvalidLsbOperation {
                        field: Field::TsScaled,
                        description: "scaled TS without an established stride".to_string(),
                    }
                })?;
                Ok(Timestamp::new(ts_value.wrapping_mul(stride)))
            } else {
                Ok(Timestamp::new(ts_value))
            };
        }
    }
    match fields.ts_bits {
        Some((bits, width)) => {
            if ctx.ts_decoder.stride().is_some() {
                ctx.ts_decoder.decode_scaled(bits, width)
            } else if kind == UoKind::Uor2Rtp {
                // Without a stride the UOR-2-RTP TS field carries nothing.
                Ok(reference_ts)
            } else {
                Err(RohcParsingError::InvalidLsbOperation {
                    field: Field::TsScaled,
                    description: "scaled TS bits without an established stride".to_string(),
                })
            }
        }
        None => Ok(ctx
            .ts_decoder
            .infer_from_sn_delta(sn_delta)
            .unwrap_or(reference_ts)),
    }
}

fn write_output(
    headers: &mut PacketHeaders,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, RohcError> {
    headers.set_inferred_lengths(payload.len());
    let header_len = build_headers(headers, out).map_err(RohcError::Building)?;
    if out.len() < header_len + payload.len() {
        return Err(RohcError::Building(RohcBuildingError::BufferTooSmall {
            needed: header_len + payload.len(),
            available: out.len(),
            context: ParseContext::RohcPacketInput,
        }));
    }
    out[header_len..header_len + payload.len()].copy_from_slice(payload);
    Ok(header_len + payload.len())
}

fn profile_sn(
    ctx: &GenericDecompressorContext,
    headers: &PacketHeaders,
    synthetic: Option<u16>,
) -> u32 {
    if ctx.profile.uses_synthetic_sn() {
        synthetic.unwrap_or(0) as u32
    } else if let Some(rtp) = &headers.rtp {
        rtp.sequence_number as u32
    } else if let Some(esp) = headers.esp() {
        esp.sequence_number
    } else {
        0
    }
}

/// Commits a validated chain (IR or IR-DYN) into the context.
fn commit_chain(
    ctx: &mut GenericDecompressorContext,
    headers: &PacketHeaders,
    ipid_behavior: IpIdBehavior,
    ts_stride: Option<u32>,
    sn: u32,
) {
    ctx.ipid_behavior = ipid_behavior;
    ctx.sn_decoder.set_reference(sn as u64);
    if let IpHeader::V4(h) = &headers.ip {
        ctx.ipid_decoder
            .set_reference(h.identification.value() as u64);
    }
    match ts_stride {
        Some(stride) => ctx.ts_decoder.set_stride(stride),
        None => ctx.ts_decoder.clear(),
    }
    if let Some(rtp) = &headers.rtp {
        ctx.ts_decoder.update_from_ts(rtp.timestamp);
    }
    ctx.reference = Some(headers.clone());
    ctx.last_sn = SequenceNumber::new(sn);
    ctx.synthetic_sn = sn as u16;
    ctx.state = DecompressorState::FullContext;
    ctx.fc_window.reset();
    ctx.sc_window.reset();
}

/// ACK pacing after a successful decompression.
fn success_feedback(
    ctx: &mut GenericDecompressorContext,
    entered_fc: bool,
) -> Option<FeedbackElement> {
    if ctx.mode == RohcMode::Unidirectional {
        return None;
    }
    ctx.successes_since_ack += 1;
    if entered_fc || ctx.successes_since_ack >= ctx.ack_interval {
        ctx.successes_since_ack = 0;
        ctx.stats.feedback_sent += 1;
        Some(FeedbackElement::ack(ctx.cid, ctx.mode, ctx.last_sn.value()))
    } else {
        None
    }
}

fn failure_feedback(
    ctx: &mut GenericDecompressorContext,
    ack_type: AckType,
) -> Option<FeedbackElement> {
    if ctx.mode == RohcMode::Unidirectional {
        return None;
    }
    ctx.stats.feedback_sent += 1;
    Some(match ack_type {
        AckType::Nack => FeedbackElement::nack(ctx.cid, ctx.mode, ctx.last_sn.value()),
        _ => FeedbackElement::static_nack(ctx.cid, ctx.mode),
    })
}

/// Decompresses one core packet (CID already stripped) into `out`.
pub(crate) fn decompress(
    ctx: &mut GenericDecompressorContext,
    crc: &CrcCalculators,
    core: &[u8],
    out: &mut [u8],
) -> DecompressOutcome {
    let Some(&first) = core.first() else {
        return DecompressOutcome::err(RohcError::Parsing(RohcParsingError::NotEnoughData {
            needed: 1,
            got: 0,
            context: ParseContext::CorePacketAfterCid,
        }));
    };

    // IR: acceptable in every state. IR-DYN: needs the static chain.
    if first & !IR_PACKET_TYPE_D_BIT == IR_PACKET_TYPE_BASE {
        return decompress_ir(ctx, crc, core, out, false);
    }
    if first == IR_DYN_PACKET_TYPE {
        if ctx.state == DecompressorState::NoContext {
            let feedback = failure_feedback(ctx, AckType::StaticNack);
            return DecompressOutcome {
                result: Err(RohcError::Decompression(
                    DecompressionError::InvalidStateForPacket {
                        cid: ctx.cid,
                        packet_type: first,
                    },
                )),
                feedback,
            };
        }
        return decompress_ir(ctx, crc, core, out, true);
    }

    // UO family: full context only.
    if ctx.state != DecompressorState::FullContext {
        let feedback = failure_feedback(ctx, AckType::StaticNack);
        return DecompressOutcome {
            result: Err(RohcError::Decompression(
                DecompressionError::InvalidStateForPacket {
                    cid: ctx.cid,
                    packet_type: first,
                },
            )),
            feedback,
        };
    }
    decompress_uo(ctx, crc, core, out)
}

fn decompress_ir(
    ctx: &mut GenericDecompressorContext,
    crc: &CrcCalculators,
    core: &[u8],
    out: &mut [u8],
    dyn_only: bool,
) -> DecompressOutcome {
    let parse_result = if dyn_only {
        match ctx.reference.clone() {
            Some(reference) => parse_ir_dyn(core, &reference, crc),
            None => {
                return DecompressOutcome::err(RohcError::Decompression(
                    DecompressionError::InvalidStateForPacket {
                        cid: ctx.cid,
                        packet_type: IR_DYN_PACKET_TYPE,
                    },
                ));
            }
        }
    } else {
        parse_ir(core, crc)
    };

    let (packet, consumed) = match parse_result {
        Ok(parsed) => parsed,
        Err(err) => {
            // A damaged chain counts against the window of the current
            // state.
            let feedback = if ctx.state == DecompressorState::FullContext {
                if ctx.fc_window.record(true) {
                    ctx.downgrade_to_static();
                    failure_feedback(ctx, AckType::Nack)
                } else {
                    None
                }
            } else if ctx.sc_window.record(true) {
                if ctx.state == DecompressorState::StaticContext {
                    ctx.downgrade_to_no_context();
                }
                failure_feedback(ctx, AckType::StaticNack)
            } else {
                None
            };
            return DecompressOutcome {
                result: Err(RohcError::Parsing(err)),
                feedback,
            };
        }
    };

    if packet.profile != ctx.profile {
        return DecompressOutcome::err(RohcError::Parsing(RohcParsingError::InvalidProfileId(
            packet.profile.into(),
        )));
    }

    let entered_fc = ctx.state != DecompressorState::FullContext;
    let sn = profile_sn(ctx, &packet.headers, packet.extras.synthetic_sn);
    commit_chain(
        ctx,
        &packet.headers,
        packet.extras.ipid_behavior,
        packet.extras.ts_stride,
        sn,
    );

    let payload = &core[consumed..];
    let mut headers = packet.headers.clone();
    match write_output(&mut headers, payload, out) {
        Ok(len) => {
            ctx.stats.packets_ok += 1;
            let feedback = success_feedback(ctx, entered_fc);
            DecompressOutcome {
                result: Ok(len),
                feedback,
            }
        }
        Err(err) => DecompressOutcome::err(err),
    }
}

fn decompress_uo(
    ctx: &mut GenericDecompressorContext,
    crc: &CrcCalculators,
    core: &[u8],
    out: &mut [u8],
) -> DecompressOutcome {
    let Some(reference) = ctx.reference.clone() else {
        return DecompressOutcome::err(RohcError::Decompression(
            DecompressionError::InvalidStateForPacket {
                cid: ctx.cid,
                packet_type: core[0],
            },
        ));
    };
    let is_rtp = ctx.profile.has_rtp();
    let ipid_compressible =
        matches!(reference.ip, IpHeader::V4(_)) && ctx.ipid_behavior == IpIdBehavior::Sequential;

    let Some(kind) = classify_uo(core[0], is_rtp, ipid_compressible) else {
        return DecompressOutcome::err(RohcError::Parsing(RohcParsingError::InvalidPacketType {
            discriminator: core[0],
            profile_id: Some(ctx.profile.into()),
        }));
    };

    let fields = match parse_uo_fields(kind, core) {
        Ok(fields) => fields,
        Err(err) => return DecompressOutcome::err(RohcError::Parsing(err)),
    };
    let trailer = match parse_trailer(ctx, &reference, &core[fields.consumed..]) {
        Ok(trailer) => trailer,
        Err(err) => return DecompressOutcome::err(RohcError::Parsing(err)),
    };
    let payload = &core[fields.consumed + trailer.consumed..];

    // A stride learned through extension 3 applies before decoding.
    if let Some(stride) = fields.ext3.as_ref().and_then(|e| e.ts_stride) {
        ctx.ts_decoder.set_stride(stride);
        if let Some(rtp) = &reference.rtp {
            ctx.ts_decoder.update_from_ts(rtp.timestamp);
        }
    }

    let sn_width = ctx.profile.sn_width();
    let decoded_sn = match ctx.sn_decoder.decode(fields.sn_bits as u64, fields.sn_width) {
        Ok(sn) => sn,
        Err(_) => {
            return DecompressOutcome::err(RohcError::Decompression(
                DecompressionError::LsbDecodingFailed {
                    cid: ctx.cid,
                    field: Field::SnLsb,
                },
            ));
        }
    };
    let sn = SequenceNumber::new(decoded_sn as u32);
    let sn_delta = sn.wrapping_sub_width(ctx.last_sn, sn_width);

    // First attempt with the decoded SN, then CRC repair with SN+1/SN+2
    // (plausible single loss) when enabled.
    let candidates: Vec<(SequenceNumber, u32, bool)> =
        if ctx.crc_repair_enabled && kind == UoKind::Uo0 {
            vec![
                (sn, sn_delta, false),
                (ctx.last_sn + 1u32, 1, true),
                (ctx.last_sn + 2u32, 2, true),
            ]
        } else {
            vec![(sn, sn_delta, false)]
        };

    let mut accepted = None;
    let mut first_failure: Option<RohcError> = None;
    for (candidate_sn, candidate_delta, is_repair) in candidates {
        let headers = match reconstruct(
            ctx,
            &reference,
            kind,
            &fields,
            &trailer,
            candidate_sn,
            candidate_delta,
        ) {
            Ok(headers) => headers,
            Err(err) => {
                first_failure.get_or_insert(RohcError::Parsing(err));
                continue;
            }
        };
        let mut crc_buf = [0u8; CRC_INPUT_MAX];
        let crc_len = crc_input(&headers, &mut crc_buf);
        let calculated = if fields.crc_is_7bit {
            crc.crc7(&crc_buf[..crc_len])
        } else {
            crc.crc3(&crc_buf[..crc_len])
        };
        if calculated == fields.crc {
            accepted = Some((headers, candidate_sn, is_repair));
            break;
        }
        first_failure.get_or_insert(RohcError::Decompression(DecompressionError::CrcMismatch {
            cid: ctx.cid,
            expected: fields.crc,
            actual: calculated,
        }));
    }

    let Some((mut headers, final_sn, was_repair)) = accepted else {
        ctx.stats.crc_failures += 1;
        let feedback = if ctx.fc_window.record(true) {
            ctx.downgrade_to_static();
            failure_feedback(ctx, AckType::Nack)
        } else {
            None
        };
        let error = first_failure.unwrap_or(RohcError::Decompression(
            DecompressionError::CrcMismatch {
                cid: ctx.cid,
                expected: fields.crc,
                actual: 0,
            },
        ));
        return DecompressOutcome {
            result: Err(error),
            feedback,
        };
    };

    if was_repair {
        ctx.stats.crc_repairs += 1;
    }

    // Commit the context.
    ctx.sn_decoder.set_reference(final_sn.as_u64());
    if let IpHeader::V4(h) = &headers.ip {
        ctx.ipid_decoder
            .set_reference(h.identification.value() as u64);
    }
    if let Some(rtp) = &headers.rtp {
        ctx.ts_decoder.update_from_ts(rtp.timestamp);
    }
    ctx.last_sn = final_sn;
    ctx.synthetic_sn = final_sn.value() as u16;
    ctx.reference = Some(headers.clone());
    ctx.fc_window.record(false);
    ctx.stats.packets_ok += 1;

    match write_output(&mut headers, payload, out) {
        Ok(len) => {
            let feedback = success_feedback(ctx, false);
            DecompressOutcome {
                result: Ok(len),
                feedback,
            }
        }
        Err(err) => DecompressOutcome::err(err),
    }
}
