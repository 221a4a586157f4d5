//! Fuzz harnesses for robustness testing.
//!
//! Each harness feeds attacker-controlled bytes to a decompressor endpoint
//! and must never panic or corrupt sibling contexts; any return value from
//! the error set is acceptable. The robustness integration tests drive
//! these with random data, and external fuzzers can link them directly.

use std::sync::Arc;

use crate::config::{CompressorConfig, DecompressorConfig};
use crate::engine::{Compressor, Decompressor};
use crate::time::SystemClock;

fn preconditioned_pair() -> Option<(Compressor, Decompressor)> {
    let clock = Arc::new(SystemClock);
    let mut compressor = Compressor::new(
        CompressorConfig {
            rtp_ports: vec![5004],
            ..CompressorConfig::default()
        },
        clock.clone(),
    )
    .ok()?;
    let mut decompressor = Decompressor::new(DecompressorConfig::default(), clock).ok()?;

    // Establish a healthy RTP context so the fuzzer reaches the UO parsing
    // paths, not just the NoContext early-out.
    let sample = sample_rtp_packet();
    let mut compressed = [0u8; 256];
    let mut output = [0u8; 256];
    for _ in 0..4 {
        let len = compressor.compress(&sample, &mut compressed).ok()?;
        decompressor.decompress(&compressed[..len], &mut output).ok()?;
    }
    Some((compressor, decompressor))
}

fn sample_rtp_packet() -> Vec<u8> {
    // IPv4 + UDP(5004) + RTP, fixed fields, checksum computed by build.
    use crate::headers::{
        build_headers, IpHeader, Ipv4Header, PacketHeaders, RtpHeader, Transport, UdpHeader,
    };
    let mut headers = PacketHeaders {
        ip: IpHeader::V4(Ipv4Header {
            dscp: 0,
            ecn: 0,
            total_length: 0,
            identification: 1.into(),
            dont_fragment: true,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: crate::constants::IP_PROTOCOL_UDP,
            checksum: 0,
            src: "10.0.0.1".parse().expect("harness address"),
            dst: "10.0.0.2".parse().expect("harness address"),
        }),
        transport: Some(Transport::Udp(UdpHeader {
            src_port: 4000,
            dst_port: 5004,
            length: 0,
            checksum: 0,
        })),
        rtp: Some(RtpHeader {
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: 1,
            timestamp: 1000.into(),
            ssrc: 0x1234.into(),
            csrc_list: vec![],
        }),
        header_len: 0,
    };
    headers.set_inferred_lengths(8);
    let mut out = vec![0u8; 128];
    let len = build_headers(&headers, &mut out).expect("harness build");
    out.truncate(len);
    out.extend_from_slice(&[0u8; 8]);
    out
}

/// Feeds `data` to a decompressor holding a healthy RTP context.
///
/// Must terminate without panicking for any input.
pub fn decompressor_harness(data: &[u8]) {
    let Some((_, mut decompressor)) = preconditioned_pair() else {
        return;
    };
    let mut output = [0u8; 4096];
    let _ = decompressor.decompress(data, &mut output);
}

/// Feeds `data` to a fresh decompressor with no established context.
pub fn cold_decompressor_harness(data: &[u8]) {
    let Ok(mut decompressor) =
        Decompressor::new(DecompressorConfig::default(), Arc::new(SystemClock))
    else {
        return;
    };
    let mut output = [0u8; 4096];
    let _ = decompressor.decompress(data, &mut output);
}

/// Feeds `data` to the compressor's feedback input.
pub fn feedback_harness(data: &[u8]) {
    let Ok(mut compressor) = Compressor::new(
        CompressorConfig::default(),
        Arc::new(SystemClock),
    ) else {
        return;
    };
    let _ = compressor.feedback_received(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harnesses_survive_basic_garbage() {
        decompressor_harness(&[]);
        decompressor_harness(&[0xFF; 32]);
        cold_decompressor_harness(&[0x00; 16]);
        feedback_harness(&[0xF1, 0x80]);
    }
}
