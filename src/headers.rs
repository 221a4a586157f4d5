//! Uncompressed protocol header parsing and building.
//!
//! Covers the header chains the profiles compress: IPv4, IPv6 with its
//! extension-header chain, UDP, UDP-Lite, ESP and RTP. Parsing walks the
//! chain with explicit bounds checks against the enclosing packet length;
//! the IPv6 extension walker yields `(hdr_type, offset, length)` tuples and
//! refuses to step past the buffer, so a truncated chain is an error rather
//! than a wild read.

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::constants::{
    ESP_HEADER_LENGTH, IPV4_MIN_HEADER_LENGTH, IPV4_STANDARD_IHL, IPV6_HEADER_LENGTH,
    IP_PROTOCOL_AH, IP_PROTOCOL_DSTOPTS, IP_PROTOCOL_ESP, IP_PROTOCOL_FRAGMENT,
    IP_PROTOCOL_HOPOPTS, IP_PROTOCOL_ROUTING, IP_PROTOCOL_UDP, IP_PROTOCOL_UDP_LITE,
    RTP_MAX_CSRC_COUNT, RTP_MIN_HEADER_LENGTH, RTP_VERSION, UDP_HEADER_LENGTH,
    UDP_LITE_HEADER_LENGTH,
};
use crate::error::{Field, ParseContext, RohcBuildingError, RohcParsingError};
use crate::types::{IpId, Spi, Ssrc, Timestamp};

/// Parsed IPv4 header (no options; an IHL above 5 is not compressible).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    /// Differentiated services code point.
    pub dscp: u8,
    /// Explicit congestion notification bits.
    pub ecn: u8,
    /// Total datagram length in bytes.
    pub total_length: u16,
    /// Identification field.
    pub identification: IpId,
    /// Don't-fragment flag.
    pub dont_fragment: bool,
    /// More-fragments flag.
    pub more_fragments: bool,
    /// Fragment offset in 8-byte units.
    pub fragment_offset: u16,
    /// Time to live.
    pub ttl: u8,
    /// Next protocol number.
    pub protocol: u8,
    /// Header checksum as received (recomputed on build).
    pub checksum: u16,
    /// Source address.
    #[serde_as(as = "DisplayFromStr")]
    pub src: Ipv4Addr,
    /// Destination address.
    #[serde_as(as = "DisplayFromStr")]
    pub dst: Ipv4Addr,
}

/// Parsed fixed IPv6 header.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Header {
    /// Differentiated services code point (high 6 traffic-class bits).
    pub dscp: u8,
    /// Explicit congestion notification (low 2 traffic-class bits).
    pub ecn: u8,
    /// Flow label (20 bits).
    pub flow_label: u32,
    /// Payload length in bytes.
    pub payload_length: u16,
    /// Next header number.
    pub next_header: u8,
    /// Hop limit.
    pub hop_limit: u8,
    /// Source address.
    #[serde_as(as = "DisplayFromStr")]
    pub src: Ipv6Addr,
    /// Destination address.
    #[serde_as(as = "DisplayFromStr")]
    pub dst: Ipv6Addr,
}

/// Either IP version, with accessors for the fields the profiles share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

impl IpHeader {
    /// IP version number (4 or 6).
    pub fn version(&self) -> u8 {
        match self {
            IpHeader::V4(_) => 4,
            IpHeader::V6(_) => 6,
        }
    }

    /// Protocol / next-header field.
    pub fn protocol(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.protocol,
            IpHeader::V6(h) => h.next_header,
        }
    }

    /// TTL or hop limit.
    pub fn ttl(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.ttl,
            IpHeader::V6(h) => h.hop_limit,
        }
    }

    /// Combined traffic octet (DSCP << 2 | ECN).
    pub fn tos(&self) -> u8 {
        match self {
            IpHeader::V4(h) => (h.dscp << 2) | h.ecn,
            IpHeader::V6(h) => (h.dscp << 2) | h.ecn,
        }
    }

    /// On-wire header length in bytes.
    pub fn header_len(&self) -> usize {
        match self {
            IpHeader::V4(_) => IPV4_MIN_HEADER_LENGTH,
            IpHeader::V6(_) => IPV6_HEADER_LENGTH,
        }
    }
}

/// Parsed UDP header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Segment length (header + data).
    pub length: u16,
    /// Checksum; zero means unused (IPv4 only).
    pub checksum: u16,
}

/// Parsed UDP-Lite header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpLiteHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Checksum coverage in bytes; zero covers the whole datagram.
    pub checksum_coverage: u16,
    pub checksum: u16,
}

/// Parsed ESP header (SPI and sequence number only; the payload is opaque).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EspHeader {
    pub spi: Spi,
    pub sequence_number: u32,
}

/// Parsed RTP header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: Timestamp,
    pub ssrc: Ssrc,
    pub csrc_list: Vec<u32>,
}

impl RtpHeader {
    /// On-wire header length in bytes.
    pub fn header_len(&self) -> usize {
        RTP_MIN_HEADER_LENGTH + self.csrc_list.len() * 4
    }
}

/// Transport layer above IP, when recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Udp(UdpHeader),
    UdpLite(UdpLiteHeader),
    Esp(EspHeader),
}

impl Transport {
    /// On-wire header length in bytes.
    pub fn header_len(&self) -> usize {
        match self {
            Transport::Udp(_) => UDP_HEADER_LENGTH,
            Transport::UdpLite(_) => UDP_LITE_HEADER_LENGTH,
            Transport::Esp(_) => ESP_HEADER_LENGTH,
        }
    }
}

/// The full parsed header chain of one packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeaders {
    pub ip: IpHeader,
    pub transport: Option<Transport>,
    pub rtp: Option<RtpHeader>,
    /// Total length of all parsed headers; the payload starts here.
    pub header_len: usize,
}

impl PacketHeaders {
    /// UDP header, whichever transport variant carries one.
    pub fn udp(&self) -> Option<&UdpHeader> {
        match &self.transport {
            Some(Transport::Udp(u)) => Some(u),
            _ => None,
        }
    }

    /// ESP header, if present.
    pub fn esp(&self) -> Option<&EspHeader> {
        match &self.transport {
            Some(Transport::Esp(e)) => Some(e),
            _ => None,
        }
    }

    /// IPv4 identification, if the outer header is IPv4.
    pub fn ip_id(&self) -> Option<IpId> {
        match &self.ip {
            IpHeader::V4(h) => Some(h.identification),
            IpHeader::V6(_) => None,
        }
    }

    /// Recomputes the length fields implied by `payload_len` (ROHC infers
    /// them from the link layer rather than transmitting them).
    pub fn set_inferred_lengths(&mut self, payload_len: usize) {
        let transport_len = self.transport.as_ref().map_or(0, Transport::header_len)
            + self.rtp.as_ref().map_or(0, RtpHeader::header_len);
        match &mut self.ip {
            IpHeader::V4(h) => {
                h.total_length = (IPV4_MIN_HEADER_LENGTH + transport_len + payload_len) as u16;
            }
            IpHeader::V6(h) => {
                h.payload_length = (transport_len + payload_len) as u16;
            }
        }
        if let Some(Transport::Udp(u)) = &mut self.transport {
            u.length = (UDP_HEADER_LENGTH
                + self.rtp.as_ref().map_or(0, RtpHeader::header_len)
                + payload_len) as u16;
        }
        self.header_len = self.ip.header_len() + transport_len;
    }
}

/// One IPv6 extension header located by the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionHeader {
    /// Protocol number of this extension header.
    pub hdr_type: u8,
    /// Byte offset from the start of the extension area.
    pub offset: usize,
    /// Length of this extension header in bytes.
    pub len: usize,
}

/// Bounds-checked iterator over an IPv6 extension-header chain.
///
/// `buf` is the packet bytes immediately after the fixed IPv6 header. The
/// walker stops at the first non-extension protocol; every step validates
/// the header's declared length against the remaining bytes before moving,
/// so the cumulative length can never exceed the enclosing packet.
#[derive(Debug, Clone)]
pub struct Ipv6ExtWalker<'a> {
    buf: &'a [u8],
    offset: usize,
    next_header: u8,
    failed: bool,
}

/// Whether `protocol` is an IPv6 extension header the walker traverses.
pub fn is_ipv6_extension(protocol: u8) -> bool {
    matches!(
        protocol,
        IP_PROTOCOL_HOPOPTS
            | IP_PROTOCOL_ROUTING
            | IP_PROTOCOL_FRAGMENT
            | IP_PROTOCOL_DSTOPTS
            | IP_PROTOCOL_AH
    )
}

impl<'a> Ipv6ExtWalker<'a> {
    /// Starts a walk at `first_next_header` over `buf`.
    pub fn new(first_next_header: u8, buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            next_header: first_next_header,
            failed: false,
        }
    }

    /// Consumes the walker, returning the final (non-extension) protocol and
    /// the total extension chain length.
    pub fn final_protocol(mut self) -> Result<(u8, usize), RohcParsingError> {
        for step in self.by_ref() {
            step?;
        }
        Ok((self.next_header, self.offset))
    }
}

impl<'a> Iterator for Ipv6ExtWalker<'a> {
    type Item = Result<ExtensionHeader, RohcParsingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !is_ipv6_extension(self.next_header) {
            return None;
        }
        let hdr_type = self.next_header;
        let remaining = &self.buf[self.offset.min(self.buf.len())..];
        if remaining.len() < 2 {
            self.failed = true;
            return Some(Err(RohcParsingError::NotEnoughData {
                needed: self.offset + 2,
                got: self.buf.len(),
                context: ParseContext::Ipv6ExtensionChain,
            }));
        }
        let len = match hdr_type {
            IP_PROTOCOL_FRAGMENT => 8,
            IP_PROTOCOL_AH => (remaining[1] as usize + 2) * 4,
            _ => (remaining[1] as usize + 1) * 8,
        };
        if remaining.len() < len {
            self.failed = true;
            return Some(Err(RohcParsingError::NotEnoughData {
                needed: self.offset + len,
                got: self.buf.len(),
                context: ParseContext::Ipv6ExtensionChain,
            }));
        }
        let item = ExtensionHeader {
            hdr_type,
            offset: self.offset,
            len,
        };
        self.next_header = remaining[0];
        self.offset += len;
        Some(Ok(item))
    }
}

fn need(buf: &[u8], len: usize, context: ParseContext) -> Result<(), RohcParsingError> {
    if buf.len() < len {
        Err(RohcParsingError::NotEnoughData {
            needed: len,
            got: buf.len(),
            context,
        })
    } else {
        Ok(())
    }
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn parse_ipv4(packet: &[u8]) -> Result<Ipv4Header, RohcParsingError> {
    need(packet, IPV4_MIN_HEADER_LENGTH, ParseContext::Ipv4Header)?;
    let ihl = packet[0] & 0x0F;
    if ihl != IPV4_STANDARD_IHL {
        return Err(RohcParsingError::InvalidFieldValue {
            field: Field::IpVersion,
            context: ParseContext::Ipv4Header,
            expected: IPV4_STANDARD_IHL as u32,
            got: ihl as u32,
        });
    }
    let flags_frag = be16(packet, 6);
    Ok(Ipv4Header {
        dscp: packet[1] >> 2,
        ecn: packet[1] & 0x03,
        total_length: be16(packet, 2),
        identification: IpId::new(be16(packet, 4)),
        dont_fragment: flags_frag & 0x4000 != 0,
        more_fragments: flags_frag & 0x2000 != 0,
        fragment_offset: flags_frag & 0x1FFF,
        ttl: packet[8],
        protocol: packet[9],
        checksum: be16(packet, 10),
        src: Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]),
        dst: Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]),
    })
}

fn parse_ipv6(packet: &[u8]) -> Result<Ipv6Header, RohcParsingError> {
    need(packet, IPV6_HEADER_LENGTH, ParseContext::Ipv6Header)?;
    let tc = ((packet[0] & 0x0F) << 4) | (packet[1] >> 4);
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&packet[8..24]);
    dst.copy_from_slice(&packet[24..40]);
    Ok(Ipv6Header {
        dscp: tc >> 2,
        ecn: tc & 0x03,
        flow_label: (((packet[1] & 0x0F) as u32) << 16) | ((packet[2] as u32) << 8) | packet[3] as u32,
        payload_length: be16(packet, 4),
        next_header: packet[6],
        hop_limit: packet[7],
        src: Ipv6Addr::from(src),
        dst: Ipv6Addr::from(dst),
    })
}

fn parse_rtp(payload: &[u8]) -> Result<RtpHeader, RohcParsingError> {
    need(payload, RTP_MIN_HEADER_LENGTH, ParseContext::RtpHeader)?;
    let version = payload[0] >> 6;
    if version != RTP_VERSION {
        return Err(RohcParsingError::InvalidFieldValue {
            field: Field::RtpVersion,
            context: ParseContext::RtpHeader,
            expected: RTP_VERSION as u32,
            got: version as u32,
        });
    }
    let csrc_count = payload[0] & 0x0F;
    if csrc_count > RTP_MAX_CSRC_COUNT {
        return Err(RohcParsingError::InvalidFieldValue {
            field: Field::RtpVersion,
            context: ParseContext::RtpHeader,
            expected: RTP_MAX_CSRC_COUNT as u32,
            got: csrc_count as u32,
        });
    }
    let total = RTP_MIN_HEADER_LENGTH + csrc_count as usize * 4;
    need(payload, total, ParseContext::RtpHeader)?;
    let csrc_list = (0..csrc_count as usize)
        .map(|i| be32(payload, RTP_MIN_HEADER_LENGTH + i * 4))
        .collect();
    Ok(RtpHeader {
        padding: payload[0] & 0x20 != 0,
        extension: payload[0] & 0x10 != 0,
        marker: payload[1] & 0x80 != 0,
        payload_type: payload[1] & 0x7F,
        sequence_number: be16(payload, 2),
        timestamp: Timestamp::new(be32(payload, 4)),
        ssrc: Ssrc::new(be32(payload, 8)),
        csrc_list,
    })
}

/// Parses the header chain of an uncompressed packet.
///
/// `rtp_ports` hints which UDP destination ports carry RTP; a matching port
/// with a version-2 payload of RTP size promotes the flow to the RTP chain.
///
/// # Errors
/// - [`RohcParsingError`] - Truncation, bad version nibble, non-standard
///   IHL, or an extension chain that overruns the packet
pub fn parse_headers(
    packet: &[u8],
    rtp_ports: &[u16],
) -> Result<PacketHeaders, RohcParsingError> {
    let first = *packet.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::RohcPacketInput,
    })?;
    let version = first >> 4;
    let (ip, ip_len, protocol) = match version {
        4 => {
            let h = parse_ipv4(packet)?;
            let protocol = h.protocol;
            (IpHeader::V4(h), IPV4_MIN_HEADER_LENGTH, protocol)
        }
        6 => {
            let h = parse_ipv6(packet)?;
            let walker = Ipv6ExtWalker::new(h.next_header, &packet[IPV6_HEADER_LENGTH..]);
            let (protocol, ext_len) = walker.final_protocol()?;
            if ext_len > 0 {
                // Extension chains are validated but not compressed; the
                // caller falls back to the Uncompressed profile.
                return Err(RohcParsingError::UnsupportedProtocol {
                    protocol_id: h.next_header,
                    context: ParseContext::Ipv6ExtensionChain,
                });
            }
            (IpHeader::V6(h), IPV6_HEADER_LENGTH, protocol)
        }
        got => {
            return Err(RohcParsingError::InvalidIpVersion { expected: 4, got });
        }
    };

    let after_ip = &packet[ip_len..];
    let (transport, transport_len, rtp) = match protocol {
        IP_PROTOCOL_UDP => {
            need(after_ip, UDP_HEADER_LENGTH, ParseContext::UdpHeader)?;
            let udp = UdpHeader {
                src_port: be16(after_ip, 0),
                dst_port: be16(after_ip, 2),
                length: be16(after_ip, 4),
                checksum: be16(after_ip, 6),
            };
            let udp_payload = &after_ip[UDP_HEADER_LENGTH..];
            let rtp = if rtp_ports.contains(&udp.dst_port) {
                Some(parse_rtp(udp_payload)?)
            } else {
                None
            };
            (Some(Transport::Udp(udp)), UDP_HEADER_LENGTH, rtp)
        }
        IP_PROTOCOL_UDP_LITE => {
            need(after_ip, UDP_LITE_HEADER_LENGTH, ParseContext::UdpLiteHeader)?;
            let lite = UdpLiteHeader {
                src_port: be16(after_ip, 0),
                dst_port: be16(after_ip, 2),
                checksum_coverage: be16(after_ip, 4),
                checksum: be16(after_ip, 6),
            };
            (Some(Transport::UdpLite(lite)), UDP_LITE_HEADER_LENGTH, None)
        }
        IP_PROTOCOL_ESP => {
            need(after_ip, ESP_HEADER_LENGTH, ParseContext::EspHeader)?;
            let esp = EspHeader {
                spi: Spi::new(be32(after_ip, 0)),
                sequence_number: be32(after_ip, 4),
            };
            (Some(Transport::Esp(esp)), ESP_HEADER_LENGTH, None)
        }
        _ => (None, 0, None),
    };

    let header_len =
        ip_len + transport_len + rtp.as_ref().map_or(0, RtpHeader::header_len);
    Ok(PacketHeaders {
        ip,
        transport,
        rtp,
        header_len,
    })
}

/// Standard internet checksum over an IPv4 header with its checksum zeroed.
fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum = 0u32;
    for i in (0..header.len()).step_by(2) {
        let word = if i == 10 {
            0 // checksum field treated as zero
        } else {
            be16(header, i) as u32
        };
        sum += word;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Serializes the header chain into `out`, returning the bytes written.
///
/// The IPv4 checksum is always recomputed; every other field is taken from
/// the structs verbatim.
///
/// # Errors
/// - [`RohcBuildingError::BufferTooSmall`] - `out` shorter than the chain
pub fn build_headers(
    headers: &PacketHeaders,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    let total = headers.ip.header_len()
        + headers.transport.as_ref().map_or(0, Transport::header_len)
        + headers.rtp.as_ref().map_or(0, RtpHeader::header_len);
    if out.len() < total {
        return Err(RohcBuildingError::BufferTooSmall {
            needed: total,
            available: out.len(),
            context: ParseContext::Ipv4Header,
        });
    }

    let mut at = 0;
    match &headers.ip {
        IpHeader::V4(h) => {
            out[0] = 0x40 | IPV4_STANDARD_IHL;
            out[1] = (h.dscp << 2) | h.ecn;
            out[2..4].copy_from_slice(&h.total_length.to_be_bytes());
            out[4..6].copy_from_slice(&h.identification.value().to_be_bytes());
            let mut flags_frag = h.fragment_offset & 0x1FFF;
            if h.dont_fragment {
                flags_frag |= 0x4000;
            }
            if h.more_fragments {
                flags_frag |= 0x2000;
            }
            out[6..8].copy_from_slice(&flags_frag.to_be_bytes());
            out[8] = h.ttl;
            out[9] = h.protocol;
            out[10..12].fill(0);
            out[12..16].copy_from_slice(&h.src.octets());
            out[16..20].copy_from_slice(&h.dst.octets());
            let checksum = ipv4_checksum(&out[..IPV4_MIN_HEADER_LENGTH]);
            out[10..12].copy_from_slice(&checksum.to_be_bytes());
            at = IPV4_MIN_HEADER_LENGTH;
        }
        IpHeader::V6(h) => {
            let tc = (h.dscp << 2) | h.ecn;
            out[0] = 0x60 | (tc >> 4);
            out[1] = ((tc & 0x0F) << 4) | ((h.flow_label >> 16) as u8 & 0x0F);
            out[2] = (h.flow_label >> 8) as u8;
            out[3] = h.flow_label as u8;
            out[4..6].copy_from_slice(&h.payload_length.to_be_bytes());
            out[6] = h.next_header;
            out[7] = h.hop_limit;
            out[8..24].copy_from_slice(&h.src.octets());
            out[24..40].copy_from_slice(&h.dst.octets());
            at = IPV6_HEADER_LENGTH;
        }
    }

    match &headers.transport {
        Some(Transport::Udp(u)) => {
            out[at..at + 2].copy_from_slice(&u.src_port.to_be_bytes());
            out[at + 2..at + 4].copy_from_slice(&u.dst_port.to_be_bytes());
            out[at + 4..at + 6].copy_from_slice(&u.length.to_be_bytes());
            out[at + 6..at + 8].copy_from_slice(&u.checksum.to_be_bytes());
            at += UDP_HEADER_LENGTH;
        }
        Some(Transport::UdpLite(u)) => {
            out[at..at + 2].copy_from_slice(&u.src_port.to_be_bytes());
            out[at + 2..at + 4].copy_from_slice(&u.dst_port.to_be_bytes());
            out[at + 4..at + 6].copy_from_slice(&u.checksum_coverage.to_be_bytes());
            out[at + 6..at + 8].copy_from_slice(&u.checksum.to_be_bytes());
            at += UDP_LITE_HEADER_LENGTH;
        }
        Some(Transport::Esp(e)) => {
            out[at..at + 4].copy_from_slice(&e.spi.to_be_bytes());
            out[at + 4..at + 8].copy_from_slice(&e.sequence_number.to_be_bytes());
            at += ESP_HEADER_LENGTH;
        }
        None => {}
    }

    if let Some(rtp) = &headers.rtp {
        let mut b0 = RTP_VERSION << 6;
        if rtp.padding {
            b0 |= 0x20;
        }
        if rtp.extension {
            b0 |= 0x10;
        }
        b0 |= rtp.csrc_list.len() as u8 & 0x0F;
        out[at] = b0;
        out[at + 1] = ((rtp.marker as u8) << 7) | (rtp.payload_type & 0x7F);
        out[at + 2..at + 4].copy_from_slice(&rtp.sequence_number.to_be_bytes());
        out[at + 4..at + 8].copy_from_slice(&rtp.timestamp.to_be_bytes());
        out[at + 8..at + 12].copy_from_slice(&rtp.ssrc.to_be_bytes());
        at += RTP_MIN_HEADER_LENGTH;
        for csrc in &rtp.csrc_list {
            out[at..at + 4].copy_from_slice(&csrc.to_be_bytes());
            at += 4;
        }
    }

    debug_assert_eq!(at, total);
    Ok(at)
}

/// Maximum size of a CRC guard input buffer. Sized for the widest chain:
/// IPv6 static part, transport, RTP with a full CSRC list.
pub const CRC_INPUT_MAX: usize = 128;

/// Assembles the STATIC+DYNAMIC CRC input for a header chain.
///
/// The per-packet CRC-3/CRC-7 guards cover the fields of the uncompressed
/// header that the context must reproduce: addresses, protocol and ports on
/// the static side; traffic octet, TTL, flags, IP-ID, checksums, sequence
/// numbers, timestamps and markers on the dynamic side. Length and checksum
/// fields that are inferred from the link layer are excluded.
pub fn crc_input(headers: &PacketHeaders, buf: &mut [u8; CRC_INPUT_MAX]) -> usize {
    let mut at = 0;
    let mut push = |bytes: &[u8], at: &mut usize| {
        buf[*at..*at + bytes.len()].copy_from_slice(bytes);
        *at += bytes.len();
    };

    // STATIC part.
    match &headers.ip {
        IpHeader::V4(h) => {
            push(&[4, h.protocol], &mut at);
            push(&h.src.octets(), &mut at);
            push(&h.dst.octets(), &mut at);
        }
        IpHeader::V6(h) => {
            push(&[6, h.next_header], &mut at);
            let fl = h.flow_label.to_be_bytes();
            push(&fl[1..4], &mut at);
            push(&h.src.octets(), &mut at);
            push(&h.dst.octets(), &mut at);
        }
    }
    match &headers.transport {
        Some(Transport::Udp(u)) => {
            push(&u.src_port.to_be_bytes(), &mut at);
            push(&u.dst_port.to_be_bytes(), &mut at);
        }
        Some(Transport::UdpLite(u)) => {
            push(&u.src_port.to_be_bytes(), &mut at);
            push(&u.dst_port.to_be_bytes(), &mut at);
        }
        Some(Transport::Esp(e)) => {
            push(&e.spi.to_be_bytes(), &mut at);
        }
        None => {}
    }
    if let Some(rtp) = &headers.rtp {
        push(&rtp.ssrc.to_be_bytes(), &mut at);
    }

    // DYNAMIC part.
    match &headers.ip {
        IpHeader::V4(h) => {
            push(
                &[
                    (h.dscp << 2) | h.ecn,
                    h.ttl,
                    h.dont_fragment as u8,
                ],
                &mut at,
            );
            push(&h.identification.value().to_be_bytes(), &mut at);
        }
        IpHeader::V6(h) => {
            push(&[(h.dscp << 2) | h.ecn, h.hop_limit], &mut at);
        }
    }
    match &headers.transport {
        Some(Transport::Udp(u)) => push(&u.checksum.to_be_bytes(), &mut at),
        Some(Transport::UdpLite(u)) => {
            push(&u.checksum_coverage.to_be_bytes(), &mut at);
            push(&u.checksum.to_be_bytes(), &mut at);
        }
        Some(Transport::Esp(e)) => push(&e.sequence_number.to_be_bytes(), &mut at),
        None => {}
    }
    if let Some(rtp) = &headers.rtp {
        push(
            &[((rtp.marker as u8) << 7) | (rtp.payload_type & 0x7F)],
            &mut at,
        );
        push(&rtp.sequence_number.to_be_bytes(), &mut at);
        push(&rtp.timestamp.to_be_bytes(), &mut at);
        for csrc in &rtp.csrc_list {
            push(&csrc.to_be_bytes(), &mut at);
        }
    }
    at
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rtp_packet() -> Vec<u8> {
        let headers = PacketHeaders {
            ip: IpHeader::V4(Ipv4Header {
                dscp: 0,
                ecn: 0,
                total_length: 0,
                identification: IpId::new(0x1234),
                dont_fragment: true,
                more_fragments: false,
                fragment_offset: 0,
                ttl: 64,
                protocol: IP_PROTOCOL_UDP,
                checksum: 0,
                src: Ipv4Addr::new(192, 168, 1, 10),
                dst: Ipv4Addr::new(192, 168, 1, 20),
            }),
            transport: Some(Transport::Udp(UdpHeader {
                src_port: 10010,
                dst_port: 5004,
                length: 0,
                checksum: 0xBEEF,
            })),
            rtp: Some(RtpHeader {
                padding: false,
                extension: false,
                marker: true,
                payload_type: 96,
                sequence_number: 1000,
                timestamp: Timestamp::new(2000),
                ssrc: Ssrc::new(0x11223344),
                csrc_list: vec![],
            }),
            header_len: 0,
        };
        let payload = [0xAAu8; 20];
        let mut fixed = headers.clone();
        fixed.set_inferred_lengths(payload.len());
        let mut out = vec![0u8; 128];
        let len = build_headers(&fixed, &mut out).unwrap();
        out.truncate(len);
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn ipv4_udp_rtp_parse_build_round_trip() {
        let packet = sample_rtp_packet();
        let parsed = parse_headers(&packet, &[5004]).unwrap();
        assert_eq!(parsed.ip.version(), 4);
        assert!(parsed.rtp.is_some());
        assert_eq!(parsed.header_len, 40);
        let rtp = parsed.rtp.as_ref().unwrap();
        assert_eq!(rtp.sequence_number, 1000);
        assert!(rtp.marker);

        let mut rebuilt = vec![0u8; 128];
        let len = build_headers(&parsed, &mut rebuilt).unwrap();
        assert_eq!(&rebuilt[..len], &packet[..parsed.header_len]);
    }

    #[test]
    fn rtp_not_parsed_without_port_hint() {
        let packet = sample_rtp_packet();
        let parsed = parse_headers(&packet, &[]).unwrap();
        assert!(parsed.rtp.is_none());
        assert_eq!(parsed.header_len, 28);
    }

    #[test]
    fn ipv6_esp_parse_build_round_trip() {
        let mut headers = PacketHeaders {
            ip: IpHeader::V6(Ipv6Header {
                dscp: 0,
                ecn: 0,
                flow_label: 0xBEEF5,
                payload_length: 0,
                next_header: IP_PROTOCOL_ESP,
                hop_limit: 64,
                src: "2001:db8::1".parse().unwrap(),
                dst: "2001:db8::2".parse().unwrap(),
            }),
            transport: Some(Transport::Esp(EspHeader {
                spi: Spi::new(0xDEADBEEF),
                sequence_number: 1,
            })),
            rtp: None,
            header_len: 0,
        };
        headers.set_inferred_lengths(32);
        let mut out = vec![0u8; 128];
        let len = build_headers(&headers, &mut out).unwrap();
        assert_eq!(len, 48);

        let mut packet = out[..len].to_vec();
        packet.extend_from_slice(&[0u8; 32]);
        let parsed = parse_headers(&packet, &[]).unwrap();
        assert_eq!(parsed, headers);
        assert_eq!(parsed.esp().unwrap().spi, 0xDEADBEEF);
    }

    #[test]
    fn bad_ip_version_is_rejected() {
        let err = parse_headers(&[0x50, 0, 0, 0], &[]).unwrap_err();
        assert!(matches!(
            err,
            RohcParsingError::InvalidIpVersion { got: 5, .. }
        ));
    }

    #[test]
    fn truncated_ipv4_is_rejected() {
        let err = parse_headers(&[0x45, 0, 0], &[]).unwrap_err();
        assert!(matches!(err, RohcParsingError::NotEnoughData { .. }));
    }

    #[test]
    fn ipv4_options_are_not_compressible() {
        let mut packet = sample_rtp_packet();
        packet[0] = 0x46; // IHL = 6
        assert!(parse_headers(&packet, &[]).is_err());
    }

    #[test]
    fn ext_walker_yields_typed_tuples() {
        // hop-by-hop (8 bytes) then destination options (8 bytes) then UDP.
        let mut ext = vec![IP_PROTOCOL_DSTOPTS, 0, 0, 0, 0, 0, 0, 0];
        ext.extend_from_slice(&[IP_PROTOCOL_UDP, 0, 0, 0, 0, 0, 0, 0]);
        let walker = Ipv6ExtWalker::new(IP_PROTOCOL_HOPOPTS, &ext);
        let steps: Vec<_> = walker.map(|s| s.unwrap()).collect();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].hdr_type, IP_PROTOCOL_HOPOPTS);
        assert_eq!(steps[0].offset, 0);
        assert_eq!(steps[0].len, 8);
        assert_eq!(steps[1].hdr_type, IP_PROTOCOL_DSTOPTS);
        assert_eq!(steps[1].offset, 8);

        let (protocol, total) =
            Ipv6ExtWalker::new(IP_PROTOCOL_HOPOPTS, &ext).final_protocol().unwrap();
        assert_eq!(protocol, IP_PROTOCOL_UDP);
        assert_eq!(total, 16);
    }

    #[test]
    fn ext_walker_checks_cumulative_length() {
        // Declared length of 24 bytes but only 8 present.
        let ext = [IP_PROTOCOL_UDP, 2, 0, 0, 0, 0, 0, 0];
        let mut walker = Ipv6ExtWalker::new(IP_PROTOCOL_ROUTING, &ext);
        let err = walker.next().unwrap().unwrap_err();
        assert!(matches!(err, RohcParsingError::NotEnoughData { .. }));
        assert!(walker.next().is_none());
    }

    #[test]
    fn ext_walker_truncated_mid_header() {
        let ext = [IP_PROTOCOL_UDP];
        let mut walker = Ipv6ExtWalker::new(IP_PROTOCOL_HOPOPTS, &ext);
        assert!(walker.next().unwrap().is_err());
    }

    #[test]
    fn ipv4_checksum_matches_reference() {
        // RFC 1071 style check: rebuild a known header and verify the
        // checksum field validates to zero when summed back.
        let packet = sample_rtp_packet();
        let mut sum = 0u32;
        for i in (0..IPV4_MIN_HEADER_LENGTH).step_by(2) {
            sum += be16(&packet, i) as u32;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        assert_eq!(sum as u16, 0xFFFF);
    }

    #[test]
    fn crc_input_changes_with_dynamic_fields() {
        let packet = sample_rtp_packet();
        let parsed = parse_headers(&packet, &[5004]).unwrap();
        let mut buf_a = [0u8; CRC_INPUT_MAX];
        let len_a = crc_input(&parsed, &mut buf_a);

        let mut bumped = parsed.clone();
        if let Some(rtp) = &mut bumped.rtp {
            rtp.sequence_number += 1;
        }
        let mut buf_b = [0u8; CRC_INPUT_MAX];
        let len_b = crc_input(&bumped, &mut buf_b);
        assert_eq!(len_a, len_b);
        assert_ne!(&buf_a[..len_a], &buf_b[..len_b]);
    }

    #[test]
    fn headers_serde_round_trip() {
        let packet = sample_rtp_packet();
        let parsed = parse_headers(&packet, &[5004]).unwrap();
        let json = serde_json::to_string(&parsed).unwrap();
        let back: PacketHeaders = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, back);
    }
}
