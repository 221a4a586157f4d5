//! Static and dynamic chain formats for IR and IR-DYN packets.
//!
//! The static chain freezes the flow identity (addresses, ports, SPI, SSRC);
//! the dynamic chain carries everything that changes packet to packet. Both
//! are laid out per profile, big-endian throughout. IR packets embed
//! `[type][profile][crc8][static][dynamic?]`; IR-DYN packets embed
//! `[type][profile][crc8][dynamic]`. The CRC-8 covers the whole core packet
//! with the CRC octet itself zeroed.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::constants::{
    IR_DYN_PACKET_TYPE, IR_PACKET_TYPE_BASE, IR_PACKET_TYPE_D_BIT, RTP_MAX_CSRC_COUNT,
};
use crate::crc::CrcCalculators;
use crate::error::{
    CrcType, Field, ParseContext, RohcBuildingError, RohcParsingError,
};
use crate::headers::{
    EspHeader, IpHeader, Ipv4Header, Ipv6Header, PacketHeaders, RtpHeader, Transport, UdpHeader,
    UdpLiteHeader,
};
use crate::profiles::RohcProfile;
use crate::sdvl::{sdvl_decode, sdvl_encode};
use crate::types::{IpId, Spi, Ssrc, Timestamp};

/// Observed IPv4 identification behavior, carried in the dynamic chain so
/// the decompressor knows whether IP-ID bits are deducible from the SN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpIdBehavior {
    /// IP-ID advances with the sequence number (network byte order).
    #[default]
    Sequential,
    /// IP-ID is unpredictable; full value travels in extensions.
    Random,
    /// IP-ID is constant zero (typical with DF set).
    Zero,
}

impl IpIdBehavior {
    fn to_bits(self) -> u8 {
        match self {
            IpIdBehavior::Sequential => 0,
            IpIdBehavior::Random => 1,
            IpIdBehavior::Zero => 2,
        }
    }

    fn from_bits(bits: u8) -> Result<Self, RohcParsingError> {
        match bits {
            0 => Ok(IpIdBehavior::Sequential),
            1 => Ok(IpIdBehavior::Random),
            2 => Ok(IpIdBehavior::Zero),
            other => Err(RohcParsingError::InvalidFieldValue {
                field: Field::IpIdLsb,
                context: ParseContext::DynamicChain,
                expected: 2,
                got: other as u32,
            }),
        }
    }
}

/// Chain content that travels beside the raw header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainExtras {
    pub ipid_behavior: IpIdBehavior,
    /// TS_STRIDE declaration (RTP only).
    pub ts_stride: Option<u32>,
    /// Compressor-generated SN for profiles without a native one.
    pub synthetic_sn: Option<u16>,
}

/// A parsed IR or IR-DYN packet.
#[derive(Debug, Clone, PartialEq)]
pub struct IrPacket {
    pub profile: RohcProfile,
    pub with_dynamic: bool,
    /// Header chain; dynamic fields are defaults when `with_dynamic` is
    /// false (IR-DYN parsing starts from the context's static chain).
    pub headers: PacketHeaders,
    pub extras: ChainExtras,
    pub crc8: u8,
}

fn buffer_check(out: &[u8], needed: usize, context: ParseContext) -> Result<(), RohcBuildingError> {
    if out.len() < needed {
        Err(RohcBuildingError::BufferTooSmall {
            needed,
            available: out.len(),
            context,
        })
    } else {
        Ok(())
    }
}

fn input_check(data: &[u8], needed: usize, context: ParseContext) -> Result<(), RohcParsingError> {
    if data.len() < needed {
        Err(RohcParsingError::NotEnoughData {
            needed,
            got: data.len(),
            context,
        })
    } else {
        Ok(())
    }
}

/// Serializes the static chain for `headers` at `out`, returning the length.
pub fn serialize_static_chain(
    headers: &PacketHeaders,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let ctx = ParseContext::StaticChain;
    let mut at = 0;
    match &headers.ip {
        IpHeader::V4(h) => {
            buffer_check(out, at + 10, ctx)?;
            out[at] = 4;
            out[at + 1] = h.protocol;
            out[at + 2..at + 6].copy_from_slice(&h.src.octets());
            out[at + 6..at + 10].copy_from_slice(&h.dst.octets());
            at += 10;
        }
        IpHeader::V6(h) => {
            buffer_check(out, at + 37, ctx)?;
            out[at] = 6;
            out[at + 1] = h.next_header;
            let fl = h.flow_label.to_be_bytes();
            out[at + 2..at + 5].copy_from_slice(&fl[1..4]);
            out[at + 5..at + 21].copy_from_slice(&h.src.octets());
            out[at + 21..at + 37].copy_from_slice(&h.dst.octets());
            at += 37;
        }
    }
    match &headers.transport {
        Some(Transport::Udp(u)) => {
            buffer_check(out, at + 4, ctx)?;
            out[at..at + 2].copy_from_slice(&u.src_port.to_be_bytes());
            out[at + 2..at + 4].copy_from_slice(&u.dst_port.to_be_bytes());
            at += 4;
        }
        Some(Transport::UdpLite(u)) => {
            buffer_check(out, at + 4, ctx)?;
            out[at..at + 2].copy_from_slice(&u.src_port.to_be_bytes());
            out[at + 2..at + 4].copy_from_slice(&u.dst_port.to_be_bytes());
            at += 4;
        }
        Some(Transport::Esp(e)) => {
            buffer_check(out, at + 4, ctx)?;
            out[at..at + 4].copy_from_slice(&e.spi.to_be_bytes());
            at += 4;
        }
        None => {}
    }
    if let Some(rtp) = &headers.rtp {
        buffer_check(out, at + 4, ctx)?;
        out[at..at + 4].copy_from_slice(&rtp.ssrc.to_be_bytes());
        at += 4;
    }
    Ok(at)
}

/// Parses a static chain for `profile`, returning a header skeleton with
/// dynamic fields defaulted, plus the bytes consumed.
pub fn parse_static_chain(
    profile: RohcProfile,
    data: &[u8],
) -> Result<(PacketHeaders, usize), RohcParsingError> {
    let ctx = ParseContext::StaticChain;
    input_check(data, 1, ctx)?;
    let mut at = 0;
    let ip = match data[0] {
        4 => {
            input_check(data, 10, ctx)?;
            let ip = IpHeader::V4(Ipv4Header {
                dscp: 0,
                ecn: 0,
                total_length: 0,
                identification: IpId::new(0),
                dont_fragment: false,
                more_fragments: false,
                fragment_offset: 0,
                ttl: 0,
                protocol: data[1],
                checksum: 0,
                src: Ipv4Addr::new(data[2], data[3], data[4], data[5]),
                dst: Ipv4Addr::new(data[6], data[7], data[8], data[9]),
            });
            at += 10;
            ip
        }
        6 => {
            input_check(data, 37, ctx)?;
            let flow_label =
                ((data[2] as u32) << 16) | ((data[3] as u32) << 8) | data[4] as u32;
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&data[5..21]);
            dst.copy_from_slice(&data[21..37]);
            at += 37;
            IpHeader::V6(Ipv6Header {
                dscp: 0,
                ecn: 0,
                flow_label,
                payload_length: 0,
                next_header: data[1],
                hop_limit: 0,
                src: Ipv6Addr::from(src),
                dst: Ipv6Addr::from(dst),
            })
        }
        got => {
            return Err(RohcParsingError::InvalidIpVersion { expected: 4, got });
        }
    };

    let transport = match profile {
        RohcProfile::Udp | RohcProfile::Rtp => {
            input_check(data, at + 4, ctx)?;
            let t = Transport::Udp(UdpHeader {
                src_port: u16::from_be_bytes([data[at], data[at + 1]]),
                dst_port: u16::from_be_bytes([data[at + 2], data[at + 3]]),
                length: 0,
                checksum: 0,
            });
            at += 4;
            Some(t)
        }
        RohcProfile::UdpLite => {
            input_check(data, at + 4, ctx)?;
            let t = Transport::UdpLite(UdpLiteHeader {
                src_port: u16::from_be_bytes([data[at], data[at + 1]]),
                dst_port: u16::from_be_bytes([data[at + 2], data[at + 3]]),
                checksum_coverage: 0,
                checksum: 0,
            });
            at += 4;
            Some(t)
        }
        RohcProfile::Esp => {
            input_check(data, at + 4, ctx)?;
            let t = Transport::Esp(EspHeader {
                spi: Spi::new(u32::from_be_bytes([
                    data[at],
                    data[at + 1],
                    data[at + 2],
                    data[at + 3],
                ])),
                sequence_number: 0,
            });
            at += 4;
            Some(t)
        }
        _ => None,
    };

    let rtp = if profile.has_rtp() {
        input_check(data, at + 4, ctx)?;
        let ssrc = Ssrc::new(u32::from_be_bytes([
            data[at],
            data[at + 1],
            data[at + 2],
            data[at + 3],
        ]));
        at += 4;
        Some(RtpHeader {
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: Timestamp::new(0),
            ssrc,
            csrc_list: Vec::new(),
        })
    } else {
        None
    };

    let mut headers = PacketHeaders {
        ip,
        transport,
        rtp,
        header_len: 0,
    };
    headers.set_inferred_lengths(0);
    Ok((headers, at))
}

/// Serializes the dynamic chain for `headers` into `out`.
pub fn serialize_dynamic_chain(
    profile: RohcProfile,
    headers: &PacketHeaders,
    extras: &ChainExtras,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let ctx = ParseContext::DynamicChain;
    let mut at = 0;

    buffer_check(out, at + 3, ctx)?;
    out[at] = headers.ip.tos();
    out[at + 1] = headers.ip.ttl();
    let df = match &headers.ip {
        IpHeader::V4(h) => h.dont_fragment,
        IpHeader::V6(_) => false,
    };
    out[at + 2] = ((df as u8) << 7) | extras.ipid_behavior.to_bits();
    at += 3;
    if let IpHeader::V4(h) = &headers.ip {
        buffer_check(out, at + 2, ctx)?;
        out[at..at + 2].copy_from_slice(&h.identification.value().to_be_bytes());
        at += 2;
    }

    match &headers.transport {
        Some(Transport::Udp(u)) => {
            buffer_check(out, at + 2, ctx)?;
            out[at..at + 2].copy_from_slice(&u.checksum.to_be_bytes());
            at += 2;
        }
        Some(Transport::UdpLite(u)) => {
            buffer_check(out, at + 4, ctx)?;
            out[at..at + 2].copy_from_slice(&u.checksum_coverage.to_be_bytes());
            out[at + 2..at + 4].copy_from_slice(&u.checksum.to_be_bytes());
            at += 4;
        }
        Some(Transport::Esp(e)) => {
            buffer_check(out, at + 4, ctx)?;
            out[at..at + 4].copy_from_slice(&e.sequence_number.to_be_bytes());
            at += 4;
        }
        None => {}
    }

    if let Some(rtp) = &headers.rtp {
        let cc = rtp.csrc_list.len() as u8;
        debug_assert!(cc <= RTP_MAX_CSRC_COUNT);
        buffer_check(out, at + 9 + cc as usize * 4, ctx)?;
        out[at] = ((rtp.marker as u8) << 7)
            | ((rtp.padding as u8) << 6)
            | ((rtp.extension as u8) << 5)
            | (cc & 0x0F);
        out[at + 1] = rtp.payload_type & 0x7F;
        out[at + 2..at + 4].copy_from_slice(&rtp.sequence_number.to_be_bytes());
        out[at + 4..at + 8].copy_from_slice(&rtp.timestamp.to_be_bytes());
        at += 8;
        for csrc in &rtp.csrc_list {
            out[at..at + 4].copy_from_slice(&csrc.to_be_bytes());
            at += 4;
        }
        out[at] = extras.ts_stride.is_some() as u8;
        at += 1;
        if let Some(stride) = extras.ts_stride {
            at += sdvl_encode(stride, &mut out[at..])?;
        }
    }

    if profile.uses_synthetic_sn() {
        buffer_check(out, at + 2, ctx)?;
        let sn = extras.synthetic_sn.ok_or(RohcBuildingError::ContextInsufficient {
            field: Field::SnLsb,
        })?;
        out[at..at + 2].copy_from_slice(&sn.to_be_bytes());
        at += 2;
    }
    Ok(at)
}

/// Parses a dynamic chain into `headers`, returning the extras and the
/// bytes consumed.
pub fn parse_dynamic_chain(
    profile: RohcProfile,
    data: &[u8],
    headers: &mut PacketHeaders,
) -> Result<(ChainExtras, usize), RohcParsingError> {
    let ctx = ParseContext::DynamicChain;
    let mut extras = ChainExtras::default();
    let mut at = 0;

    input_check(data, 3, ctx)?;
    let tos = data[0];
    let ttl = data[1];
    let flags = data[2];
    extras.ipid_behavior = IpIdBehavior::from_bits(flags & 0x03)?;
    at += 3;
    match &mut headers.ip {
        IpHeader::V4(h) => {
            h.dscp = tos >> 2;
            h.ecn = tos & 0x03;
            h.ttl = ttl;
            h.dont_fragment = flags & 0x80 != 0;
            input_check(data, at + 2, ctx)?;
            h.identification = IpId::new(u16::from_be_bytes([data[at], data[at + 1]]));
            at += 2;
        }
        IpHeader::V6(h) => {
            h.dscp = tos >> 2;
            h.ecn = tos & 0x03;
            h.hop_limit = ttl;
        }
    }

    match &mut headers.transport {
        Some(Transport::Udp(u)) => {
            input_check(data, at + 2, ctx)?;
            u.checksum = u16::from_be_bytes([data[at], data[at + 1]]);
            at += 2;
        }
        Some(Transport::UdpLite(u)) => {
            input_check(data, at + 4, ctx)?;
            u.checksum_coverage = u16::from_be_bytes([data[at], data[at + 1]]);
            u.checksum = u16::from_be_bytes([data[at + 2], data[at + 3]]);
            at += 4;
        }
        Some(Transport::Esp(e)) => {
            input_check(data, at + 4, ctx)?;
            e.sequence_number =
                u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
            at += 4;
        }
        None => {}
    }

    if let Some(rtp) = &mut headers.rtp {
        input_check(data, at + 8, ctx)?;
        let flags = data[at];
        rtp.marker = flags & 0x80 != 0;
        rtp.padding = flags & 0x40 != 0;
        rtp.extension = flags & 0x20 != 0;
        let cc = flags & 0x0F;
        rtp.payload_type = data[at + 1] & 0x7F;
        rtp.sequence_number = u16::from_be_bytes([data[at + 2], data[at + 3]]);
        rtp.timestamp = Timestamp::new(u32::from_be_bytes([
            data[at + 4],
            data[at + 5],
            data[at + 6],
            data[at + 7],
        ]));
        at += 8;
        input_check(data, at + cc as usize * 4 + 1, ctx)?;
        rtp.csrc_list = (0..cc as usize)
            .map(|i| {
                u32::from_be_bytes([
                    data[at + i * 4],
                    data[at + i * 4 + 1],
                    data[at + i * 4 + 2],
                    data[at + i * 4 + 3],
                ])
            })
            .collect();
        at += cc as usize * 4;
        let has_stride = data[at];
        at += 1;
        if has_stride == 1 {
            let (stride, len) = sdvl_decode(&data[at..])?;
            extras.ts_stride = Some(stride);
            at += len;
        } else if has_stride > 1 {
            return Err(RohcParsingError::InvalidFieldValue {
                field: Field::TsStride,
                context: ctx,
                expected: 1,
                got: has_stride as u32,
            });
        }
    }

    if profile.uses_synthetic_sn() {
        input_check(data, at + 2, ctx)?;
        extras.synthetic_sn = Some(u16::from_be_bytes([data[at], data[at + 1]]));
        at += 2;
    }
    Ok((extras, at))
}

/// Serializes a full IR packet core: `[1111110D][profile][crc8][chains]`.
pub fn serialize_ir(
    profile: RohcProfile,
    headers: &PacketHeaders,
    extras: &ChainExtras,
    with_dynamic: bool,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    buffer_check(out, 3, ParseContext::IrPacket)?;
    out[0] = IR_PACKET_TYPE_BASE | (with_dynamic as u8);
    out[1] = profile.into();
    out[2] = 0;
    let mut at = 3;
    at += serialize_static_chain(headers, &mut out[at..])?;
    if with_dynamic {
        at += serialize_dynamic_chain(profile, headers, extras, &mut out[at..])?;
    }
    out[2] = crc.crc8_with_zeroed_byte(&out[..at], 2);
    Ok(at)
}

/// Serializes an IR-DYN packet core: `[11111000][profile][crc8][dynamic]`.
pub fn serialize_ir_dyn(
    profile: RohcProfile,
    headers: &PacketHeaders,
    extras: &ChainExtras,
    crc: &CrcCalculators,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    buffer_check(out, 3, ParseContext::IrDynPacket)?;
    out[0] = IR_DYN_PACKET_TYPE;
    out[1] = profile.into();
    out[2] = 0;
    let mut at = 3;
    at += serialize_dynamic_chain(profile, headers, extras, &mut out[at..])?;
    out[2] = crc.crc8_with_zeroed_byte(&out[..at], 2);
    Ok(at)
}

fn validate_ir_crc(
    core: &[u8],
    len: usize,
    crc: &CrcCalculators,
) -> Result<u8, RohcParsingError> {
    let expected = core[2];
    let calculated = crc.crc8_with_zeroed_byte(&core[..len], 2);
    if expected != calculated {
        return Err(RohcParsingError::CrcMismatch {
            expected,
            calculated,
            crc_type: CrcType::Crc8Ir,
        });
    }
    Ok(expected)
}

/// Parses an IR packet core, validating its CRC-8 over the consumed bytes.
///
/// Returns the packet and the number of core bytes consumed (payload
/// follows).
pub fn parse_ir(
    core: &[u8],
    crc: &CrcCalculators,
) -> Result<(IrPacket, usize), RohcParsingError> {
    input_check(core, 3, ParseContext::IrPacket)?;
    debug_assert_eq!(core[0] & !IR_PACKET_TYPE_D_BIT, IR_PACKET_TYPE_BASE);
    let with_dynamic = core[0] & IR_PACKET_TYPE_D_BIT != 0;
    let profile = RohcProfile::from(core[1]);
    let mut at = 3;
    let (mut headers, static_len) = parse_static_chain(profile, &core[at..])?;
    at += static_len;
    let mut extras = ChainExtras::default();
    if with_dynamic {
        let (parsed_extras, dyn_len) = parse_dynamic_chain(profile, &core[at..], &mut headers)?;
        extras = parsed_extras;
        at += dyn_len;
        // The CSRC list arrived with the dynamic chain; lengths follow it.
        headers.set_inferred_lengths(0);
    }
    let crc8 = validate_ir_crc(core, at, crc)?;
    Ok((
        IrPacket {
            profile,
            with_dynamic,
            headers,
            extras,
            crc8,
        },
        at,
    ))
}

/// Parses an IR-DYN packet core against the context's static chain.
pub fn parse_ir_dyn(
    core: &[u8],
    static_headers: &PacketHeaders,
    crc: &CrcCalculators,
) -> Result<(IrPacket, usize), RohcParsingError> {
    input_check(core, 3, ParseContext::IrDynPacket)?;
    debug_assert_eq!(core[0], IR_DYN_PACKET_TYPE);
    let profile = RohcProfile::from(core[1]);
    let mut headers = static_headers.clone();
    let (extras, dyn_len) = parse_dynamic_chain(profile, &core[3..], &mut headers)?;
    let at = 3 + dyn_len;
    headers.set_inferred_lengths(0);
    let crc8 = validate_ir_crc(core, at, crc)?;
    Ok((
        IrPacket {
            profile,
            with_dynamic: true,
            headers,
            extras,
            crc8,
        },
        at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{IP_PROTOCOL_ESP, IP_PROTOCOL_UDP};
    use crate::headers::parse_headers;

    fn rtp_headers() -> PacketHeaders {
        let mut headers = PacketHeaders {
            ip: IpHeader::V4(Ipv4Header {
                dscp: 0,
                ecn: 0,
                total_length: 0,
                identification: IpId::new(0x0102),
                dont_fragment: true,
                more_fragments: false,
                fragment_offset: 0,
                ttl: 64,
                protocol: IP_PROTOCOL_UDP,
                checksum: 0,
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 2),
            }),
            transport: Some(Transport::Udp(UdpHeader {
                src_port: 1234,
                dst_port: 5004,
                length: 0,
                checksum: 0xCAFE,
            })),
            rtp: Some(RtpHeader {
                padding: false,
                extension: false,
                marker: true,
                payload_type: 8,
                sequence_number: 1000,
                timestamp: Timestamp::new(160000),
                ssrc: Ssrc::new(0x12345678),
                csrc_list: vec![0xAABBCCDD],
            }),
            header_len: 0,
        };
        headers.set_inferred_lengths(0);
        headers
    }

    #[test]
    fn ir_round_trip_rtp_profile() {
        let headers = rtp_headers();
        let extras = ChainExtras {
            ipid_behavior: IpIdBehavior::Sequential,
            ts_stride: Some(160),
            synthetic_sn: None,
        };
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 128];
        let len =
            serialize_ir(RohcProfile::Rtp, &headers, &extras, true, &crc, &mut buf).unwrap();
        assert_eq!(buf[0], 0xFD);
        assert_eq!(buf[1], 0x01);

        let (parsed, consumed) = parse_ir(&buf[..len], &crc).unwrap();
        assert_eq!(consumed, len);
        assert_eq!(parsed.profile, RohcProfile::Rtp);
        assert!(parsed.with_dynamic);
        assert_eq!(parsed.extras.ts_stride, Some(160));
        assert_eq!(parsed.extras.ipid_behavior, IpIdBehavior::Sequential);
        assert_eq!(parsed.headers, headers);
    }

    #[test]
    fn ir_static_only_round_trip() {
        let headers = rtp_headers();
        let extras = ChainExtras::default();
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 128];
        let len =
            serialize_ir(RohcProfile::Rtp, &headers, &extras, false, &crc, &mut buf).unwrap();
        assert_eq!(buf[0], 0xFC);
        let (parsed, _) = parse_ir(&buf[..len], &crc).unwrap();
        assert!(!parsed.with_dynamic);
        // Static identity survives; dynamic fields are defaults.
        assert_eq!(parsed.headers.rtp.as_ref().unwrap().ssrc, 0x12345678);
        assert_eq!(parsed.headers.rtp.as_ref().unwrap().sequence_number, 0);
    }

    #[test]
    fn ir_crc_failure_is_detected() {
        let headers = rtp_headers();
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 128];
        let len = serialize_ir(
            RohcProfile::Rtp,
            &headers,
            &ChainExtras::default(),
            true,
            &crc,
            &mut buf,
        )
        .unwrap();
        buf[10] ^= 0x01;
        let err = parse_ir(&buf[..len], &crc).unwrap_err();
        assert!(matches!(
            err,
            RohcParsingError::CrcMismatch {
                crc_type: CrcType::Crc8Ir,
                ..
            }
        ));
    }

    #[test]
    fn ir_dyn_round_trip_against_static_context() {
        let headers = rtp_headers();
        let crc = CrcCalculators::new();
        let extras = ChainExtras {
            ts_stride: None,
            ..ChainExtras::default()
        };
        let mut buf = [0u8; 128];
        let len =
            serialize_ir_dyn(RohcProfile::Rtp, &headers, &extras, &crc, &mut buf).unwrap();
        assert_eq!(buf[0], IR_DYN_PACKET_TYPE);

        // The decompressor knows the static chain from an earlier IR.
        let (static_skeleton, _) = {
            let mut chain = [0u8; 64];
            let static_len = serialize_static_chain(&headers, &mut chain).unwrap();
            parse_static_chain(RohcProfile::Rtp, &chain[..static_len]).unwrap()
        };
        let (parsed, consumed) = parse_ir_dyn(&buf[..len], &static_skeleton, &crc).unwrap();
        assert_eq!(consumed, len);
        assert_eq!(parsed.headers.rtp.as_ref().unwrap().sequence_number, 1000);
        assert_eq!(
            parsed.headers.rtp.as_ref().unwrap().timestamp,
            Timestamp::new(160000)
        );
        assert_eq!(parsed.headers.ip.ttl(), 64);
    }

    #[test]
    fn esp_chains_round_trip_over_ipv6() {
        let mut headers = PacketHeaders {
            ip: IpHeader::V6(Ipv6Header {
                dscp: 1,
                ecn: 0,
                flow_label: 0x12345,
                payload_length: 0,
                next_header: IP_PROTOCOL_ESP,
                hop_limit: 61,
                src: "fd00::1".parse().unwrap(),
                dst: "fd00::2".parse().unwrap(),
            }),
            transport: Some(Transport::Esp(EspHeader {
                spi: Spi::new(0xDEADBEEF),
                sequence_number: 42,
            })),
            rtp: None,
            header_len: 0,
        };
        headers.set_inferred_lengths(0);

        let crc = CrcCalculators::new();
        let mut buf = [0u8; 128];
        let len = serialize_ir(
            RohcProfile::Esp,
            &headers,
            &ChainExtras::default(),
            true,
            &crc,
            &mut buf,
        )
        .unwrap();
        let (parsed, _) = parse_ir(&buf[..len], &crc).unwrap();
        assert_eq!(parsed.headers, headers);
        assert_eq!(parsed.headers.esp().unwrap().sequence_number, 42);
    }

    #[test]
    fn synthetic_sn_travels_in_udp_dynamic_chain() {
        let packet = {
            // Build a plain UDP packet via the header builder.
            let mut h = PacketHeaders {
                ip: IpHeader::V4(Ipv4Header {
                    dscp: 0,
                    ecn: 0,
                    total_length: 0,
                    identification: IpId::new(7),
                    dont_fragment: false,
                    more_fragments: false,
                    fragment_offset: 0,
                    ttl: 64,
                    protocol: IP_PROTOCOL_UDP,
                    checksum: 0,
                    src: Ipv4Addr::new(1, 1, 1, 1),
                    dst: Ipv4Addr::new(2, 2, 2, 2),
                }),
                transport: Some(Transport::Udp(UdpHeader {
                    src_port: 53,
                    dst_port: 53,
                    length: 0,
                    checksum: 0,
                })),
                rtp: None,
                header_len: 0,
            };
            h.set_inferred_lengths(4);
            let mut out = vec![0u8; 64];
            let n = crate::headers::build_headers(&h, &mut out).unwrap();
            out.truncate(n);
            out.extend_from_slice(&[1, 2, 3, 4]);
            out
        };
        let headers = parse_headers(&packet, &[]).unwrap();
        let extras = ChainExtras {
            synthetic_sn: Some(99),
            ..ChainExtras::default()
        };
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 128];
        let len =
            serialize_ir(RohcProfile::Udp, &headers, &extras, true, &crc, &mut buf).unwrap();
        let (parsed, _) = parse_ir(&buf[..len], &crc).unwrap();
        assert_eq!(parsed.extras.synthetic_sn, Some(99));
        // Length fields are inferred, not transmitted; compare the chain
        // with its lengths normalized to an empty payload.
        let mut expected = headers.clone();
        expected.set_inferred_lengths(0);
        assert_eq!(parsed.headers, expected);
    }

    #[test]
    fn dynamic_chain_rejects_bad_ipid_behavior() {
        let headers = rtp_headers();
        let crc = CrcCalculators::new();
        let mut buf = [0u8; 128];
        let len = serialize_ir(
            RohcProfile::Rtp,
            &headers,
            &ChainExtras::default(),
            true,
            &crc,
            &mut buf,
        )
        .unwrap();
        // Static chain for RTP/IPv4 is 10 + 4 + 4 bytes; flags octet is the
        // third dynamic byte.
        let flags_at = 3 + 18 + 2;
        buf[flags_at] = (buf[flags_at] & !0x03) | 0x03;
        buf[2] = crc.crc8_with_zeroed_byte(&buf[..len], 2);
        let err = parse_ir(&buf[..len], &crc).unwrap_err();
        assert!(matches!(err, RohcParsingError::InvalidFieldValue { .. }));
    }
}
