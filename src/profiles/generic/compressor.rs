//! Generic compressor: per-flow state machine and packet-type selection.
//!
//! Drives one [`GenericCompressorContext`] through IR -> FO -> SO using the
//! optimistic approach: the full chains travel `L` times before the
//! compressor trusts the decompressor to hold them, and any disruptive
//! dynamic change drops the flow back to FO. In SO the smallest packet that
//! fits every required W-LSB bit count is chosen.
//!
//! SO packets append a trailer for fields that cannot be compressed: a
//! random IP-ID, the UDP checksum when in use, and the UDP-Lite coverage
//! and checksum. The decompressor derives the trailer layout from its
//! context, so both sides agree without extra signaling.

use std::time::Instant;

use crate::crc::CrcCalculators;
use crate::encodings::encode_lsb;
use crate::error::{ParseContext, RohcBuildingError, RohcError};
use crate::feedback::{AckType, FeedbackElement};
use crate::headers::{crc_input, IpHeader, PacketHeaders, Transport, CRC_INPUT_MAX};
use crate::packets::{
    serialize_uo0, serialize_uo1, serialize_uo1_id, serialize_uo1_rtp, serialize_uo1_ts,
    serialize_uor2, serialize_uor2_rtp, Extension, Uo0, Uo1, Uo1Id, Uo1Rtp, Uo1Ts, Uor2, Uor2Rtp,
};
use crate::profiles::generic::chains::{serialize_ir, serialize_ir_dyn, ChainExtras, IpIdBehavior};
use crate::profiles::generic::context::{CompressorState, GenericCompressorContext};
use crate::ts_scaled::{TsScaledState, TsTransmission};
use crate::types::SequenceNumber;

/// Extra T bits offered by extensions 0, 1 and 2.
const EXT_T_BITS: [u8; 3] = [3, 11, 19];
/// Extra SN bits every extension 0-2 carries.
const EXT_SN_BITS: u8 = 3;

/// True when a static (context-identifying) field differs.
fn static_differs(reference: &PacketHeaders, headers: &PacketHeaders) -> bool {
    let ip_differs = match (&reference.ip, &headers.ip) {
        (IpHeader::V4(a), IpHeader::V4(b)) => {
            a.src != b.src || a.dst != b.dst || a.protocol != b.protocol
        }
        (IpHeader::V6(a), IpHeader::V6(b)) => {
            a.src != b.src
                || a.dst != b.dst
                || a.next_header != b.next_header
                || a.flow_label != b.flow_label
        }
        _ => true,
    };
    if ip_differs {
        return true;
    }
    let transport_differs = match (&reference.transport, &headers.transport) {
        (Some(Transport::Udp(a)), Some(Transport::Udp(b))) => {
            a.src_port != b.src_port || a.dst_port != b.dst_port
        }
        (Some(Transport::UdpLite(a)), Some(Transport::UdpLite(b))) => {
            a.src_port != b.src_port || a.dst_port != b.dst_port
        }
        (Some(Transport::Esp(a)), Some(Transport::Esp(b))) => a.spi != b.spi,
        (None, None) => false,
        _ => true,
    };
    if transport_differs {
        return true;
    }
    match (&reference.rtp, &headers.rtp) {
        (Some(a), Some(b)) => a.ssrc != b.ssrc,
        (None, None) => false,
        _ => true,
    }
}

/// Dynamic changes the SO packet formats cannot express.
fn so_disruptive(
    ctx: &GenericCompressorContext,
    reference: &PacketHeaders,
    headers: &PacketHeaders,
    behavior_changed: bool,
    ts_tx: Option<TsTransmission>,
) -> bool {
    if behavior_changed {
        return true;
    }
    if reference.ip.tos() != headers.ip.tos() || reference.ip.ttl() != headers.ip.ttl() {
        return true;
    }
    if let (IpHeader::V4(a), IpHeader::V4(b)) = (&reference.ip, &headers.ip) {
        if a.dont_fragment != b.dont_fragment {
            return true;
        }
    }
    if let (Some(Transport::Udp(a)), Some(Transport::Udp(b))) =
        (&reference.transport, &headers.transport)
    {
        // The checksum trailer exists iff the reference checksum is
        // nonzero; toggling presence needs a chain update.
        if (a.checksum == 0) != (b.checksum == 0) {
            return true;
        }
    }
    if let (Some(a), Some(b)) = (&reference.rtp, &headers.rtp) {
        if a.payload_type != b.payload_type
            || a.padding != b.padding
            || a.extension != b.extension
            || a.csrc_list != b.csrc_list
        {
            return true;
        }
    }
    match ts_tx {
        Some(TsTransmission::StrideDeclaration { .. }) => true,
        Some(TsTransmission::Unscaled) => {
            let ts_unchanged = match (&reference.rtp, &headers.rtp) {
                (Some(a), Some(b)) => a.timestamp == b.timestamp,
                _ => true,
            };
            // Full unscaled TS only fits the chains.
            !ts_unchanged
        }
        Some(TsTransmission::Scaled) => ctx
            .ts_codec
            .as_ref()
            .is_some_and(|codec| codec.scaled_bits_required() > 7 + EXT_T_BITS[2]),
        None => false,
    }
}

fn current_ipid(headers: &PacketHeaders) -> Option<u16> {
    match &headers.ip {
        IpHeader::V4(h) => Some(h.identification.value()),
        IpHeader::V6(_) => None,
    }
}

/// Largest forward IP-ID step still treated as sequential jitter; wider
/// jumps are classified random and carried verbatim.
const IPID_JITTER_LIMIT: u16 = 32;

/// Re-classifies the IP-ID behavior from the new packet.
fn observe_ipid_behavior(
    ctx: &GenericCompressorContext,
    headers: &PacketHeaders,
    sn_delta: u32,
) -> IpIdBehavior {
    let Some(cur) = current_ipid(headers) else {
        return IpIdBehavior::Sequential;
    };
    let Some(reference) = &ctx.reference else {
        return if cur == 0 {
            IpIdBehavior::Zero
        } else {
            IpIdBehavior::Sequential
        };
    };
    let last = current_ipid(reference).unwrap_or(0);
    let delta = cur.wrapping_sub(last);
    if cur == 0 && last == 0 {
        IpIdBehavior::Zero
    } else if delta == sn_delta as u16 || (delta > 0 && delta <= IPID_JITTER_LIMIT) {
        // In step with the SN, or small forward jitter that W-LSB bits in
        // the UO-1 family can absorb.
        IpIdBehavior::Sequential
    } else {
        IpIdBehavior::Random
    }
}

/// Writes the SO trailer: random IP-ID, then checksum material.
fn write_trailer(
    ctx: &GenericCompressorContext,
    headers: &PacketHeaders,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let mut needed = 0;
    if ctx.ipid_behavior == IpIdBehavior::Random && current_ipid(headers).is_some() {
        needed += 2;
    }
    match &headers.transport {
        Some(Transport::Udp(u)) if u.checksum != 0 => needed += 2,
        Some(Transport::UdpLite(_)) => needed += 4,
        _ => {}
    }
    if out.len() < needed {
        return Err(RohcBuildingError::BufferTooSmall {
            needed,
            available: out.len(),
            context: ParseContext::UoPacket,
        });
    }

    let mut at = 0;
    if ctx.ipid_behavior == IpIdBehavior::Random {
        if let Some(ipid) = current_ipid(headers) {
            out[at..at + 2].copy_from_slice(&ipid.to_be_bytes());
            at += 2;
        }
    }
    match &headers.transport {
        Some(Transport::Udp(u)) if u.checksum != 0 => {
            out[at..at + 2].copy_from_slice(&u.checksum.to_be_bytes());
            at += 2;
        }
        Some(Transport::UdpLite(u)) => {
            out[at..at + 2].copy_from_slice(&u.checksum_coverage.to_be_bytes());
            out[at + 2..at + 4].copy_from_slice(&u.checksum.to_be_bytes());
            at += 4;
        }
        _ => {}
    }
    Ok(at)
}

/// Picks the smallest extension granting the needed extra bits. The SN
/// field always carries the low 3 SN bits; the T field carries the low
/// `t_width` bits of the T value.
fn pick_extension(need_t: u8, sn_low3: u8, t_value: u64) -> (Extension, u8) {
    if need_t <= EXT_T_BITS[0] {
        (
            Extension::Ext0 {
                sn: sn_low3,
                t: (t_value & 0x07) as u8,
            },
            EXT_T_BITS[0],
        )
    } else if need_t <= EXT_T_BITS[1] {
        (
            Extension::Ext1 {
                sn: sn_low3,
                t: (t_value & 0x7FF) as u16,
            },
            EXT_T_BITS[1],
        )
    } else {
        (
            Extension::Ext2 {
                sn: sn_low3,
                t: (t_value & 0x7FFFF) as u32,
            },
            EXT_T_BITS[2],
        )
    }
}

/// One chosen SO-state packet.
#[derive(Debug)]
enum UoPlan {
    Uo0,
    Uo1 { ipid_lsb: u8 },
    Uo1Rtp { ts_lsb: u8 },
    Uo1Id { ipid_hi: u8, ext: Option<Extension> },
    Uo1Ts { ts_hi: u8, ext: Option<Extension> },
    Uor2 { ext: Option<Extension> },
    Uor2Rtp { ts_hi: u8, ext: Option<Extension> },
}

/// Everything the ladder needs, precomputed.
struct Candidate {
    is_rtp: bool,
    ipid_compressible: bool,
    ipid_deduced: bool,
    k_sn: u8,
    k_ipid: u8,
    ipid: u16,
    sn: u64,
    marker_matches: bool,
    ts_ok_without_bits: bool,
    scaled_active: bool,
    k_ts: u8,
    ts_scaled: u64,
}

/// The selection ladder. Returns `None` when no SO format fits.
fn select_plan(c: &Candidate) -> Option<UoPlan> {
    // 1. UO-0: SN and CRC only; everything else deducible.
    if c.k_sn <= 4 && c.ts_ok_without_bits && c.marker_matches && c.ipid_deduced {
        return Some(UoPlan::Uo0);
    }

    if !c.is_rtp {
        // 2. UO-1: 5 SN bits plus 6 IP-ID bits. Sequential flows always
        // fill the IP-ID field (the decompressor always decodes it);
        // other behaviors leave it zero and resolve elsewhere.
        let ipid_fits = !c.ipid_compressible || c.k_ipid <= 6;
        if c.k_sn <= 5 && ipid_fits {
            let ipid_lsb = if c.ipid_compressible {
                encode_lsb(c.ipid as u64, 6) as u8
            } else {
                0
            };
            return Some(UoPlan::Uo1 { ipid_lsb });
        }
        // 3. UOR-2, extension for extra SN or IP-ID bits.
        let need_sn = c.k_sn.saturating_sub(5);
        let need_ipid = if c.ipid_deduced { 0 } else { c.k_ipid };
        if need_sn > EXT_SN_BITS || need_ipid > EXT_T_BITS[2] {
            return None;
        }
        if need_sn == 0 && need_ipid == 0 {
            return Some(UoPlan::Uor2 { ext: None });
        }
        let (ext, _) = pick_extension(
            need_ipid,
            (encode_lsb(c.sn, 5 + EXT_SN_BITS) & 0x07) as u8,
            c.ipid as u64,
        );
        return Some(UoPlan::Uor2 { ext: Some(ext) });
    }

    // RTP ladder.
    if c.ipid_compressible {
        // UO-1-ID: IP-ID bits with the TS deducible.
        if c.ts_ok_without_bits && c.k_sn <= 3 && c.k_ipid <= 5 {
            return Some(UoPlan::Uo1Id {
                ipid_hi: encode_lsb(c.ipid as u64, 5) as u8,
                ext: None,
            });
        }
        // UO-1-TS: scaled TS bits with the IP-ID deducible.
        if c.scaled_active && c.ipid_deduced && c.k_sn <= 3 && c.k_ts <= 5 {
            return Some(UoPlan::Uo1Ts {
                ts_hi: encode_lsb(c.ts_scaled, 5) as u8,
                ext: None,
            });
        }
        // UO-1-ID with an extension: up to 6 SN bits, 5+19 IP-ID bits.
        if c.ts_ok_without_bits && c.k_sn <= 3 + EXT_SN_BITS && c.k_ipid <= 5 + EXT_T_BITS[2] {
            let need_t = c.k_ipid.saturating_sub(5);
            let (ext, t_width) = pick_extension(
                need_t,
                (encode_lsb(c.sn, 3 + EXT_SN_BITS) & 0x07) as u8,
                c.ipid as u64,
            );
            let total = encode_lsb(c.ipid as u64, 5 + t_width);
            return Some(UoPlan::Uo1Id {
                ipid_hi: (total >> t_width) as u8 & 0x1F,
                ext: Some(ext),
            });
        }
        // UO-1-TS with an extension.
        if c.scaled_active
            && c.ipid_deduced
            && c.k_sn <= 3 + EXT_SN_BITS
            && c.k_ts <= 5 + EXT_T_BITS[2]
        {
            let need_t = c.k_ts.saturating_sub(5);
            let (ext, t_width) = pick_extension(
                need_t,
                (encode_lsb(c.sn, 3 + EXT_SN_BITS) & 0x07) as u8,
                c.ts_scaled,
            );
            let total = encode_lsb(c.ts_scaled, 5 + t_width);
            return Some(UoPlan::Uo1Ts {
                ts_hi: (total >> t_width) as u8 & 0x1F,
                ext: Some(ext),
            });
        }
    } else if c.scaled_active && c.ipid_deduced && c.k_sn <= 4 && c.k_ts <= 6 {
        // UO-1-RTP: scaled TS bits and the marker.
        return Some(UoPlan::Uo1Rtp {
            ts_lsb: encode_lsb(c.ts_scaled, 6) as u8,
        });
    }

    // UOR-2-RTP fallback: 5+3 SN bits, 7+19 scaled TS bits, CRC-7.
    if !c.ipid_deduced {
        return None;
    }
    let ts_bits_needed = if c.scaled_active {
        c.k_ts
    } else if c.ts_ok_without_bits {
        0
    } else {
        return None;
    };
    let need_sn = c.k_sn.saturating_sub(5);
    let need_t = ts_bits_needed.saturating_sub(7);
    if need_sn > EXT_SN_BITS || need_t > EXT_T_BITS[2] {
        return None;
    }
    if need_sn == 0 && need_t == 0 {
        return Some(UoPlan::Uor2Rtp {
            ts_hi: encode_lsb(c.ts_scaled, 7) as u8,
            ext: None,
        });
    }
    let (ext, t_width) = pick_extension(
        need_t,
        (encode_lsb(c.sn, 5 + EXT_SN_BITS) & 0x07) as u8,
        c.ts_scaled,
    );
    let total_ts = encode_lsb(c.ts_scaled, 7 + t_width);
    Some(UoPlan::Uor2Rtp {
        ts_hi: (total_ts >> t_width) as u8 & 0x7F,
        ext: Some(ext),
    })
}

fn chain_extras(ctx: &GenericCompressorContext) -> ChainExtras {
    ChainExtras {
        ipid_behavior: ctx.ipid_behavior,
        ts_stride: ctx
            .ts_codec
            .as_ref()
            .and_then(|codec| (codec.state() != TsScaledState::InitTs).then(|| codec.stride())),
        synthetic_sn: ctx.profile.uses_synthetic_sn().then_some(ctx.synthetic_sn),
    }
}

fn emit_chain_packet(
    ctx: &mut GenericCompressorContext,
    crc: &CrcCalculators,
    headers: &PacketHeaders,
    ir: bool,
    now: Instant,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let extras = chain_extras(ctx);
    let len = if ir {
        serialize_ir(ctx.profile, headers, &extras, true, crc, out)
    } else {
        serialize_ir_dyn(ctx.profile, headers, &extras, crc, out)
    }
    .map_err(RohcError::Building)?;

    if ir {
        ctx.stats.ir_packets += 1;
        ctx.packets_since_ir = 0;
        ctx.fo_packets_since_ir = 0;
        ctx.last_ir_at = now;
        ctx.chain_repeats = 1;
        ctx.state = CompressorState::Fo;
    } else {
        ctx.stats.ir_dyn_packets += 1;
        ctx.fo_packets_since_ir += 1;
        ctx.chain_repeats += 1;
        if ctx.chain_repeats >= ctx.oa_repetitions {
            ctx.state = CompressorState::So;
        }
    }
    ctx.stride_synced = extras.ts_stride.is_some();
    if extras.ts_stride.is_some() {
        if let Some(codec) = &mut ctx.ts_codec {
            codec.mark_stride_sent();
        }
    }
    Ok(len)
}

/// Compresses one packet through the generic state machine, writing the
/// compressed header, trailer and payload into `out`.
pub(crate) fn compress(
    ctx: &mut GenericCompressorContext,
    crc: &CrcCalculators,
    headers: &PacketHeaders,
    payload: &[u8],
    now: Instant,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    // Static change forces a fresh context.
    if ctx
        .reference
        .as_ref()
        .is_some_and(|reference| static_differs(reference, headers))
    {
        ctx.reinitialize();
    }

    // Sequence number for this packet.
    let sn_width = ctx.profile.sn_width();
    let sn = if ctx.profile.uses_synthetic_sn() {
        ctx.synthetic_sn = ctx.synthetic_sn.wrapping_add(1);
        SequenceNumber::new(ctx.synthetic_sn as u32)
    } else if let Some(rtp) = &headers.rtp {
        SequenceNumber::new(rtp.sequence_number as u32)
    } else if let Some(esp) = headers.esp() {
        SequenceNumber::new(esp.sequence_number)
    } else {
        SequenceNumber::new(0)
    };
    let sn_delta = if ctx.reference.is_some() {
        sn.wrapping_sub_width(ctx.last_sn, sn_width)
    } else {
        0
    };

    // Field observations.
    let new_behavior = observe_ipid_behavior(ctx, headers, sn_delta);
    let behavior_changed = ctx.reference.is_some() && new_behavior != ctx.ipid_behavior;
    let ts_tx = match (&mut ctx.ts_codec, &headers.rtp) {
        (Some(codec), Some(rtp)) => Some(codec.observe(rtp.timestamp, sn_delta)),
        _ => None,
    };

    // Periodic refresh.
    if ctx.state != CompressorState::Ir {
        let packet_refresh =
            ctx.ir_timeout_packets > 0 && ctx.packets_since_ir >= ctx.ir_timeout_packets;
        let fo_refresh = ctx.state == CompressorState::Fo
            && ctx.ir_timeout_fo_packets > 0
            && ctx.fo_packets_since_ir >= ctx.ir_timeout_fo_packets;
        let time_refresh = now.duration_since(ctx.last_ir_at) >= ctx.ir_timeout;
        if packet_refresh || fo_refresh || time_refresh {
            ctx.state = CompressorState::Ir;
            ctx.chain_repeats = 0;
        }
    }

    // Disruptive dynamic change: back to FO.
    if ctx.state == CompressorState::So {
        if let Some(reference) = &ctx.reference {
            if so_disruptive(ctx, reference, headers, behavior_changed, ts_tx) {
                ctx.demote_to_fo();
            }
        }
    } else if behavior_changed {
        ctx.chain_repeats = 0;
    }
    ctx.ipid_behavior = new_behavior;

    let written = match ctx.state {
        CompressorState::Ir => emit_chain_packet(ctx, crc, headers, true, now, out)?,
        CompressorState::Fo => emit_chain_packet(ctx, crc, headers, false, now, out)?,
        CompressorState::So => {
            match so_plan(ctx, headers, sn, sn_delta, ts_tx) {
                Some(plan) => build_so_packet(ctx, crc, headers, sn, plan, out)?,
                None => {
                    ctx.demote_to_fo();
                    emit_chain_packet(ctx, crc, headers, false, now, out)?
                }
            }
        }
    };

    if out.len() < written + payload.len() {
        return Err(RohcError::Building(RohcBuildingError::BufferTooSmall {
            needed: written + payload.len(),
            available: out.len(),
            context: ParseContext::RohcPacketInput,
        }));
    }
    out[written..written + payload.len()].copy_from_slice(payload);

    // Commit the reference and codec state.
    ctx.sn_window.add(sn.as_u64(), sn.as_u64());
    if let Some(ipid) = current_ipid(headers) {
        ctx.ipid_window.add(ipid as u64, sn.as_u64());
    }
    if let Some(codec) = &mut ctx.ts_codec {
        codec.mark_sent(sn.value());
    }
    ctx.reference = Some(headers.clone());
    ctx.last_sn = sn;
    ctx.packets_since_ir += 1;
    ctx.stats.packets += 1;
    ctx.stats.header_bytes_in += headers.header_len as u64;
    ctx.stats.header_bytes_out += written as u64;

    Ok(written + payload.len())
}

/// Evaluates the SO-state candidate for this packet.
fn so_plan(
    ctx: &GenericCompressorContext,
    headers: &PacketHeaders,
    sn: SequenceNumber,
    sn_delta: u32,
    ts_tx: Option<TsTransmission>,
) -> Option<UoPlan> {
    let reference = ctx.reference.as_ref()?;
    let is_v4 = matches!(headers.ip, IpHeader::V4(_));
    let cur_ipid = current_ipid(headers);

    let ipid_deduced = match ctx.ipid_behavior {
        IpIdBehavior::Sequential => match (cur_ipid, current_ipid(reference)) {
            (Some(cur), Some(last)) => cur == last.wrapping_add(sn_delta as u16),
            _ => true,
        },
        IpIdBehavior::Zero => cur_ipid.map_or(true, |v| v == 0),
        IpIdBehavior::Random => true, // full value rides the trailer
    };
    let (marker_matches, ts_unchanged) = match (&headers.rtp, &reference.rtp) {
        (Some(cur), Some(prev)) => (cur.marker == prev.marker, cur.timestamp == prev.timestamp),
        _ => (true, true),
    };
    let scaled_active = ctx.stride_synced
        && matches!(ts_tx, Some(TsTransmission::Scaled))
        && ctx
            .ts_codec
            .as_ref()
            .is_some_and(|codec| codec.state() == TsScaledState::SendScaled);
    let ts_deducible = scaled_active
        && ctx
            .ts_codec
            .as_ref()
            .is_some_and(|codec| codec.is_deducible_from_sn(sn_delta));

    let candidate = Candidate {
        is_rtp: ctx.profile.has_rtp(),
        ipid_compressible: is_v4 && ctx.ipid_behavior == IpIdBehavior::Sequential,
        ipid_deduced,
        k_sn: ctx.sn_window.bits_required(sn.as_u64()),
        k_ipid: cur_ipid.map_or(0, |ipid| ctx.ipid_window.bits_required(ipid as u64)),
        ipid: cur_ipid.unwrap_or(0),
        sn: sn.as_u64(),
        marker_matches,
        ts_ok_without_bits: ts_deducible || (!ctx.stride_synced && ts_unchanged),
        scaled_active,
        k_ts: ctx
            .ts_codec
            .as_ref()
            .map_or(0, |codec| codec.scaled_bits_required()),
        ts_scaled: ctx
            .ts_codec
            .as_ref()
            .map_or(0, |codec| codec.ts_scaled() as u64),
    };
    select_plan(&candidate)
}

/// Serializes the chosen SO packet plus its trailer.
fn build_so_packet(
    ctx: &mut GenericCompressorContext,
    crc: &CrcCalculators,
    headers: &PacketHeaders,
    sn: SequenceNumber,
    plan: UoPlan,
    out: &mut [u8],
) -> Result<usize, RohcError> {
    let mut crc_buf = [0u8; CRC_INPUT_MAX];
    let crc_len = crc_input(headers, &mut crc_buf);
    let crc3 = crc.crc3(&crc_buf[..crc_len]);
    let crc7 = crc.crc7(&crc_buf[..crc_len]);

    let header_len = match plan {
        UoPlan::Uo0 => {
            ctx.stats.uo0_packets += 1;
            serialize_uo0(
                &Uo0 {
                    sn_lsb: encode_lsb(sn.as_u64(), 4) as u8,
                    crc3,
                },
                out,
            )
        }
        UoPlan::Uo1 { ipid_lsb } => {
            ctx.stats.uo1_packets += 1;
            serialize_uo1(
                &Uo1 {
                    ip_id_lsb: ipid_lsb,
                    sn_lsb: encode_lsb(sn.as_u64(), 5) as u8,
                    crc3,
                },
                out,
            )
        }
        UoPlan::Uo1Rtp { ts_lsb } => {
            ctx.stats.uo1_packets += 1;
            serialize_uo1_rtp(
                &Uo1Rtp {
                    ts_lsb,
                    marker: headers.rtp.as_ref().is_some_and(|r| r.marker),
                    sn_lsb: encode_lsb(sn.as_u64(), 4) as u8,
                    crc3,
                },
                out,
            )
        }
        UoPlan::Uo1Id { ipid_hi, ext } => {
            ctx.stats.uo1_packets += 1;
            let sn_total = encode_lsb(sn.as_u64(), if ext.is_some() { 6 } else { 3 });
            let sn_lsb = if ext.is_some() {
                (sn_total >> EXT_SN_BITS) as u8 & 0x07
            } else {
                sn_total as u8 & 0x07
            };
            serialize_uo1_id(
                &Uo1Id {
                    ip_id_lsb: ipid_hi,
                    marker: headers.rtp.as_ref().is_some_and(|r| r.marker),
                    sn_lsb,
                    crc3,
                    extension: ext,
                },
                out,
            )
        }
        UoPlan::Uo1Ts { ts_hi, ext } => {
            ctx.stats.uo1_packets += 1;
            let sn_total = encode_lsb(sn.as_u64(), if ext.is_some() { 6 } else { 3 });
            let sn_lsb = if ext.is_some() {
                (sn_total >> EXT_SN_BITS) as u8 & 0x07
            } else {
                sn_total as u8 & 0x07
            };
            serialize_uo1_ts(
                &Uo1Ts {
                    ts_lsb: ts_hi,
                    marker: headers.rtp.as_ref().is_some_and(|r| r.marker),
                    sn_lsb,
                    crc3,
                    extension: ext,
                },
                out,
            )
        }
        UoPlan::Uor2 { ext } => {
            ctx.stats.uor2_packets += 1;
            let sn_total = encode_lsb(sn.as_u64(), if ext.is_some() { 8 } else { 5 });
            let sn_lsb = if ext.is_some() {
                (sn_total >> EXT_SN_BITS) as u8 & 0x1F
            } else {
                sn_total as u8 & 0x1F
            };
            serialize_uor2(
                &Uor2 {
                    sn_lsb,
                    crc7,
                    extension: ext,
                },
                out,
            )
        }
        UoPlan::Uor2Rtp { ts_hi, ext } => {
            ctx.stats.uor2_packets += 1;
            let sn_total = encode_lsb(sn.as_u64(), if ext.is_some() { 8 } else { 5 });
            let sn_lsb = if ext.is_some() {
                (sn_total >> EXT_SN_BITS) as u8 & 0x1F
            } else {
                sn_total as u8 & 0x1F
            };
            serialize_uor2_rtp(
                &Uor2Rtp {
                    sn_lsb,
                    ts_lsb: ts_hi,
                    marker: headers.rtp.as_ref().is_some_and(|r| r.marker),
                    crc7,
                    extension: ext,
                },
                out,
            )
        }
    }
    .map_err(RohcError::Building)?;

    let trailer = write_trailer(ctx, headers, &mut out[header_len..]).map_err(RohcError::Building)?;
    Ok(header_len + trailer)
}

/// Applies a received feedback element to the compressor state machine.
///
/// ACKs are idempotent: a duplicate for an already-acknowledged SN changes
/// nothing. NACK drops the flow to FO, STATIC-NACK back to IR.
pub(crate) fn apply_feedback(ctx: &mut GenericCompressorContext, element: &FeedbackElement) {
    match element.ack_type {
        AckType::Ack => {
            if element.sn_valid {
                if ctx.last_acked_sn == Some(element.sn) {
                    return;
                }
                ctx.last_acked_sn = Some(element.sn);
            }
            // Confidence confirmed: skip any remaining chain repetitions.
            if ctx.state == CompressorState::Fo && ctx.reference.is_some() {
                ctx.state = CompressorState::So;
                ctx.chain_repeats = ctx.oa_repetitions;
            }
        }
        AckType::Nack => {
            ctx.demote_to_fo();
        }
        AckType::StaticNack => {
            ctx.reinitialize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressorConfig, DecompressorConfig, RohcMode};
    use crate::headers::{Ipv4Header, RtpHeader, UdpHeader};
    use crate::profiles::generic::context::GenericDecompressorContext;
    use crate::profiles::generic::decompressor;
    use crate::profiles::RohcProfile;
    use crate::types::{ContextId, IpId, Ssrc, Timestamp};
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn udp_headers(ipid: u16) -> PacketHeaders {
        let mut headers = PacketHeaders {
            ip: IpHeader::V4(Ipv4Header {
                dscp: 0,
                ecn: 0,
                total_length: 0,
                identification: IpId::new(ipid),
                dont_fragment: false,
                more_fragments: false,
                fragment_offset: 0,
                ttl: 64,
                protocol: crate::constants::IP_PROTOCOL_UDP,
                checksum: 0,
                src: Ipv4Addr::new(10, 9, 8, 7),
                dst: Ipv4Addr::new(10, 9, 8, 6),
            }),
            transport: Some(Transport::Udp(UdpHeader {
                src_port: 2000,
                dst_port: 3000,
                length: 0,
                checksum: 0,
            })),
            rtp: None,
            header_len: 0,
        };
        headers.set_inferred_lengths(4);
        headers
    }

    fn rtp_headers(sn: u16, ts: u32, ipid: u16) -> PacketHeaders {
        let mut headers = udp_headers(ipid);
        headers.rtp = Some(RtpHeader {
            padding: false,
            extension: false,
            marker: false,
            payload_type: 8,
            sequence_number: sn,
            timestamp: Timestamp::new(ts),
            ssrc: Ssrc::new(0x4321),
            csrc_list: vec![],
        });
        headers.set_inferred_lengths(4);
        headers
    }

    fn contexts(
        profile: RohcProfile,
    ) -> (GenericCompressorContext, GenericDecompressorContext) {
        let now = Instant::now();
        (
            GenericCompressorContext::new(
                profile,
                ContextId::new(0),
                &CompressorConfig::default(),
                now,
            ),
            GenericDecompressorContext::new(
                profile,
                ContextId::new(0),
                &DecompressorConfig::default(),
                now,
            ),
        )
    }

    fn pump(
        cctx: &mut GenericCompressorContext,
        dctx: &mut GenericDecompressorContext,
        headers: &PacketHeaders,
    ) -> (usize, Vec<u8>) {
        let crc = CrcCalculators::new();
        let payload = [0xEEu8; 4];
        let mut compressed = [0u8; 256];
        let len = compress(cctx, &crc, headers, &payload, Instant::now(), &mut compressed)
            .expect("compress");
        let mut output = [0u8; 256];
        let outcome = decompressor::decompress(dctx, &crc, &compressed[..len], &mut output);
        let out_len = outcome.result.expect("decompress");

        let mut reference = headers.clone();
        reference.set_inferred_lengths(payload.len());
        let mut expected = [0u8; 256];
        let header_len = crate::headers::build_headers(&reference, &mut expected).unwrap();
        expected[header_len..header_len + payload.len()].copy_from_slice(&payload);
        assert_eq!(&output[..out_len], &expected[..header_len + payload.len()]);
        (len, compressed[..len].to_vec())
    }

    #[test]
    fn ipid_jitter_selects_uo1_with_ipid_bits() {
        let (mut cctx, mut dctx) = contexts(RohcProfile::Udp);
        for i in 0..4u16 {
            pump(&mut cctx, &mut dctx, &udp_headers(100 + i));
        }
        assert_eq!(cctx.state, CompressorState::So);
        // IP-ID jumps by 3 while the SN advances by 1: sequential jitter.
        let (len, bytes) = pump(&mut cctx, &mut dctx, &udp_headers(106));
        assert_eq!(cctx.ipid_behavior, IpIdBehavior::Sequential);
        assert_eq!(bytes[0] & 0xC0, 0x80, "expected UO-1");
        assert_eq!(len, 2 + 4);
        assert_eq!(cctx.stats.uo1_packets, 1);
    }

    #[test]
    fn rtp_ipid_jitter_selects_uo1_id() {
        let (mut cctx, mut dctx) = contexts(RohcProfile::Rtp);
        for i in 0..5u16 {
            pump(
                &mut cctx,
                &mut dctx,
                &rtp_headers(50 + i, 7000 + i as u32 * 160, 20 + i),
            );
        }
        assert_eq!(cctx.state, CompressorState::So);
        // Jitter of +4 on the IP-ID with a deducible TS: UO-1-ID.
        let (_, bytes) = pump(
            &mut cctx,
            &mut dctx,
            &rtp_headers(55, 7000 + 5 * 160, 28),
        );
        assert_eq!(bytes[0] & 0xE0, 0x80, "expected UO-1-ID (100xxxxx)");
        assert_eq!(cctx.stats.uo1_packets, 1);
    }

    #[test]
    fn select_plan_prefers_uo1_ts_for_scaled_bits() {
        let candidate = Candidate {
            is_rtp: true,
            ipid_compressible: true,
            ipid_deduced: true,
            k_sn: 2,
            k_ipid: 1,
            ipid: 40,
            sn: 101,
            marker_matches: true,
            ts_ok_without_bits: false,
            scaled_active: true,
            k_ts: 4,
            ts_scaled: 77,
        };
        let plan = select_plan(&candidate).expect("plan");
        assert!(matches!(plan, UoPlan::Uo1Ts { ext: None, .. }));
    }

    #[test]
    fn select_plan_falls_back_to_uor2_rtp_with_extension() {
        let candidate = Candidate {
            is_rtp: true,
            ipid_compressible: false,
            ipid_deduced: true,
            k_sn: 7,
            k_ipid: 0,
            ipid: 0,
            sn: 300,
            marker_matches: false,
            ts_ok_without_bits: false,
            scaled_active: true,
            k_ts: 9,
            ts_scaled: 500,
        };
        let plan = select_plan(&candidate).expect("plan");
        match plan {
            UoPlan::Uor2Rtp { ext: Some(ext), .. } => {
                let (t_w, _) = ext.t_bits();
                assert_eq!(t_w, 3);
            }
            other => panic!("expected UOR-2-RTP with ext0, got {:?}", other),
        }
    }

    #[test]
    fn select_plan_gives_up_when_nothing_fits() {
        let candidate = Candidate {
            is_rtp: true,
            ipid_compressible: false,
            ipid_deduced: false,
            k_sn: 12,
            k_ipid: 16,
            ipid: 9,
            sn: 5,
            marker_matches: false,
            ts_ok_without_bits: false,
            scaled_active: false,
            k_ts: 0,
            ts_scaled: 0,
        };
        assert!(select_plan(&candidate).is_none());
    }

    #[test]
    fn feedback_transitions_cover_all_ack_types() {
        let (mut cctx, mut dctx) = contexts(RohcProfile::Udp);
        pump(&mut cctx, &mut dctx, &udp_headers(5));
        assert_eq!(cctx.state, CompressorState::Fo);

        let ack = FeedbackElement::ack(ContextId::new(0), RohcMode::Optimistic, 1);
        apply_feedback(&mut cctx, &ack);
        assert_eq!(cctx.state, CompressorState::So);
        assert_eq!(cctx.last_acked_sn, Some(1));

        // Duplicate ACK: nothing moves.
        let snapshot = (cctx.state, cctx.chain_repeats, cctx.last_acked_sn);
        apply_feedback(&mut cctx, &ack);
        assert_eq!(
            snapshot,
            (cctx.state, cctx.chain_repeats, cctx.last_acked_sn)
        );

        let nack = FeedbackElement::nack(ContextId::new(0), RohcMode::Optimistic, 1);
        apply_feedback(&mut cctx, &nack);
        assert_eq!(cctx.state, CompressorState::Fo);

        let static_nack =
            FeedbackElement::static_nack(ContextId::new(0), RohcMode::Optimistic);
        apply_feedback(&mut cctx, &static_nack);
        assert_eq!(cctx.state, CompressorState::Ir);
        assert!(cctx.reference.is_none());
    }

    #[test]
    fn static_change_restarts_the_flow_in_ir() {
        let (mut cctx, mut dctx) = contexts(RohcProfile::Udp);
        for i in 0..4u16 {
            pump(&mut cctx, &mut dctx, &udp_headers(10 + i));
        }
        assert_eq!(cctx.state, CompressorState::So);

        let mut moved = udp_headers(14);
        if let IpHeader::V4(h) = &mut moved.ip {
            h.dst = Ipv4Addr::new(10, 9, 8, 5);
        }
        let crc = CrcCalculators::new();
        let mut out = [0u8; 256];
        let len = compress(&mut cctx, &crc, &moved, &[], Instant::now(), &mut out).unwrap();
        assert_eq!(out[0], 0xFD, "static change must force an IR");
        assert!(len >= 20);
    }
}
