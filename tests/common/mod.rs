//! Shared builders for integration tests: well-formed packets with
//! consistent lengths and checksums, and endpoint pairs.

#![allow(dead_code)]

use std::sync::Arc;

use rohcflow::config::{CompressorConfig, DecompressorConfig};
use rohcflow::headers::{
    build_headers, EspHeader, IpHeader, Ipv4Header, Ipv6Header, PacketHeaders, RtpHeader,
    Transport, UdpHeader, UdpLiteHeader,
};
use rohcflow::time::mock_clock::MockClock;
use rohcflow::{Compressor, Decompressor};

pub const RTP_PORT: u16 = 5004;

/// Assembles header chain plus payload into wire bytes.
pub fn to_wire(mut headers: PacketHeaders, payload: &[u8]) -> Vec<u8> {
    headers.set_inferred_lengths(payload.len());
    let mut out = vec![0u8; 256];
    let len = build_headers(&headers, &mut out).expect("test header build");
    out.truncate(len);
    out.extend_from_slice(payload);
    out
}

/// RTP/UDP/IPv4 packet with sequential IP-ID and zero UDP checksum.
pub fn rtp_packet(sn: u16, ts: u32, marker: bool, ipid: u16, payload: &[u8]) -> Vec<u8> {
    let headers = PacketHeaders {
        ip: IpHeader::V4(Ipv4Header {
            dscp: 0,
            ecn: 0,
            total_length: 0,
            identification: ipid.into(),
            dont_fragment: true,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: rohcflow::constants::IP_PROTOCOL_UDP,
            checksum: 0,
            src: "192.168.1.10".parse().unwrap(),
            dst: "192.168.1.20".parse().unwrap(),
        }),
        transport: Some(Transport::Udp(UdpHeader {
            src_port: 10010,
            dst_port: RTP_PORT,
            length: 0,
            checksum: 0,
        })),
        rtp: Some(RtpHeader {
            padding: false,
            extension: false,
            marker,
            payload_type: 96,
            sequence_number: sn,
            timestamp: ts.into(),
            ssrc: 0xAABBCCDD.into(),
            csrc_list: vec![],
        }),
        header_len: 0,
    };
    to_wire(headers, payload)
}

/// IPv6/ESP packet keyed by SPI.
pub fn esp_packet(spi: u32, sn: u32, payload: &[u8]) -> Vec<u8> {
    let headers = PacketHeaders {
        ip: IpHeader::V6(Ipv6Header {
            dscp: 0,
            ecn: 0,
            flow_label: 0x4567,
            payload_length: 0,
            next_header: rohcflow::constants::IP_PROTOCOL_ESP,
            hop_limit: 64,
            src: "2001:db8::10".parse().unwrap(),
            dst: "2001:db8::20".parse().unwrap(),
        }),
        transport: Some(Transport::Esp(EspHeader {
            spi: spi.into(),
            sequence_number: sn,
        })),
        rtp: None,
        header_len: 0,
    };
    to_wire(headers, payload)
}

/// Plain UDP/IPv4 packet.
pub fn udp_packet(ipid: u16, checksum: u16, payload: &[u8]) -> Vec<u8> {
    let headers = PacketHeaders {
        ip: IpHeader::V4(Ipv4Header {
            dscp: 0,
            ecn: 0,
            total_length: 0,
            identification: ipid.into(),
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 61,
            protocol: rohcflow::constants::IP_PROTOCOL_UDP,
            checksum: 0,
            src: "10.1.0.1".parse().unwrap(),
            dst: "10.1.0.2".parse().unwrap(),
        }),
        transport: Some(Transport::Udp(UdpHeader {
            src_port: 40000,
            dst_port: 53,
            length: 0,
            checksum,
        })),
        rtp: None,
        header_len: 0,
    };
    to_wire(headers, payload)
}

/// UDP-Lite/IPv4 packet with explicit checksum coverage.
pub fn udp_lite_packet(ipid: u16, coverage: u16, checksum: u16, payload: &[u8]) -> Vec<u8> {
    let headers = PacketHeaders {
        ip: IpHeader::V4(Ipv4Header {
            dscp: 0,
            ecn: 0,
            total_length: 0,
            identification: ipid.into(),
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: rohcflow::constants::IP_PROTOCOL_UDP_LITE,
            checksum: 0,
            src: "10.2.0.1".parse().unwrap(),
            dst: "10.2.0.2".parse().unwrap(),
        }),
        transport: Some(Transport::UdpLite(UdpLiteHeader {
            src_port: 9000,
            dst_port: 9001,
            checksum_coverage: coverage,
            checksum,
        })),
        rtp: None,
        header_len: 0,
    };
    to_wire(headers, payload)
}

/// IPv4 packet with an uncommon next protocol (IP-only profile).
pub fn ip_only_packet(ipid: u16, payload: &[u8]) -> Vec<u8> {
    let headers = PacketHeaders {
        ip: IpHeader::V4(Ipv4Header {
            dscp: 4,
            ecn: 0,
            total_length: 0,
            identification: ipid.into(),
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 63,
            protocol: 47, // GRE: no transport profile claims it
            checksum: 0,
            src: "172.16.0.1".parse().unwrap(),
            dst: "172.16.0.2".parse().unwrap(),
        }),
        transport: None,
        rtp: None,
        header_len: 0,
    };
    to_wire(headers, payload)
}

/// Compressor/decompressor pair on a shared mock clock, RTP hints set.
pub fn endpoint_pair() -> (Compressor, Decompressor, Arc<MockClock>) {
    endpoint_pair_with(
        CompressorConfig {
            rtp_ports: vec![RTP_PORT],
            ..CompressorConfig::default()
        },
        DecompressorConfig::default(),
    )
}

/// Pair with explicit configurations on a shared mock clock.
pub fn endpoint_pair_with(
    comp: CompressorConfig,
    decomp: DecompressorConfig,
) -> (Compressor, Decompressor, Arc<MockClock>) {
    let clock = Arc::new(MockClock::default());
    let compressor = Compressor::new(comp, clock.clone()).expect("compressor config");
    let decompressor = Decompressor::new(decomp, clock.clone()).expect("decompressor config");
    (compressor, decompressor, clock)
}

/// Compress then decompress one packet, asserting byte equality.
pub fn round_trip(
    compressor: &mut Compressor,
    decompressor: &mut Decompressor,
    packet: &[u8],
) -> usize {
    let mut compressed = [0u8; 2048];
    let mut output = [0u8; 2048];
    let len = compressor
        .compress(packet, &mut compressed)
        .expect("compression");
    match decompressor
        .decompress(&compressed[..len], &mut output)
        .expect("decompression")
    {
        rohcflow::DecompressedKind::Packet(out_len) => {
            assert_eq!(&output[..out_len], packet, "round trip not byte-exact");
            len
        }
        other => panic!("expected packet, got {:?}", other),
    }
}
