//! RTP/UDP/IP flow tests: cold start, steady state, field changes.

mod common;

use common::{endpoint_pair, endpoint_pair_with, round_trip, rtp_packet, RTP_PORT};
use rohcflow::config::{CidType, CompressorConfig, DecompressorConfig};
use rohcflow::types::ContextId;

/// Cold start plus steady state: packet 1 is a full IR, the next two carry
/// the dynamic chain, and from packet 4 on a one-byte UO-0 suffices.
#[test]
fn rtp_cold_start_reaches_one_byte_headers() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair();
    let payload = [0x11u8; 20];

    let mut sizes = Vec::new();
    for i in 0..10u16 {
        let packet = rtp_packet(1000 + i, 2000 + i as u32 * 160, false, 50 + i, &payload);
        let len = round_trip(&mut compressor, &mut decompressor, &packet);
        sizes.push(len - payload.len());
    }

    // IR carries both chains.
    assert!(sizes[0] >= 20, "IR too small: {}", sizes[0]);
    // Optimistic approach: two more dynamic-chain packets.
    assert!(sizes[1] > 1 && sizes[2] > 1);
    // Steady state: UO-0, one byte of header.
    for (i, &size) in sizes.iter().enumerate().skip(3) {
        assert_eq!(size, 1, "packet {} should be UO-0, header size {}", i, size);
    }

    let stats = compressor.context_stats(ContextId::new(0)).unwrap();
    assert_eq!(stats.ir_packets, 1);
    assert_eq!(stats.uo0_packets, 7);
}

/// A marker flip cannot ride UO-0; the compressor picks a marker-bearing
/// type and the flip arrives intact.
#[test]
fn marker_flip_round_trips() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair();
    let payload = [0x22u8; 10];

    for i in 0..6u16 {
        let packet = rtp_packet(100 + i, 1000 + i as u32 * 160, false, i, &payload);
        round_trip(&mut compressor, &mut decompressor, &packet);
    }
    // Marker set on this one.
    let packet = rtp_packet(106, 1000 + 6 * 160, true, 6, &payload);
    let len = round_trip(&mut compressor, &mut decompressor, &packet);
    assert!(len > payload.len() + 1, "marker flip needs more than UO-0");

    // And cleared again.
    let packet = rtp_packet(107, 1000 + 7 * 160, false, 7, &payload);
    round_trip(&mut compressor, &mut decompressor, &packet);
}

/// A payload-type change is a dynamic-chain update: the flow drops back to
/// FO and recovers.
#[test]
fn payload_type_change_recovers_through_fo() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair();
    let payload = [0x33u8; 8];

    for i in 0..5u16 {
        let packet = rtp_packet(500 + i, 7000 + i as u32 * 80, false, 10 + i, &payload);
        round_trip(&mut compressor, &mut decompressor, &packet);
    }

    // Change the payload type by rebuilding with a different PT byte.
    let mut packet = rtp_packet(505, 7000 + 5 * 80, false, 15, &payload);
    packet[29] = (packet[29] & 0x80) | 97; // PT field inside the RTP header
    let len = {
        let mut compressed = [0u8; 512];
        let mut output = [0u8; 512];
        let len = compressor.compress(&packet, &mut compressed).unwrap();
        match decompressor
            .decompress(&compressed[..len], &mut output)
            .unwrap()
        {
            rohcflow::DecompressedKind::Packet(out_len) => {
                assert_eq!(&output[..out_len], &packet[..]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        len
    };
    // IR-DYN, not a UO type.
    assert!(len - payload.len() > 2);

    // Flow settles back to UO-0 after the repetitions.
    for i in 6..12u16 {
        let mut packet = rtp_packet(500 + i, 7000 + i as u32 * 80, false, 10 + i, &payload);
        packet[29] = (packet[29] & 0x80) | 97;
        round_trip(&mut compressor, &mut decompressor, &packet);
    }
    let stats = compressor.context_stats(ContextId::new(0)).unwrap();
    assert!(stats.uo0_packets >= 2);
}

/// Large-CID channels place the SDVL CID after the type octet.
#[test]
fn large_cid_flow_round_trips() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair_with(
        CompressorConfig {
            cid_type: CidType::Large,
            max_cid: ContextId::new(300),
            rtp_ports: vec![RTP_PORT],
            ..CompressorConfig::default()
        },
        DecompressorConfig {
            cid_type: CidType::Large,
            max_cid: ContextId::new(300),
            ..DecompressorConfig::default()
        },
    );
    let payload = [0x44u8; 12];
    for i in 0..6u16 {
        let packet = rtp_packet(900 + i, 100 + i as u32 * 160, false, i, &payload);
        round_trip(&mut compressor, &mut decompressor, &packet);
    }
}

/// Periodic IR refresh by packet count re-sends the chains.
#[test]
fn periodic_refresh_re_enters_ir() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair_with(
        CompressorConfig {
            rtp_ports: vec![RTP_PORT],
            ir_timeout_packets: 8,
            ..CompressorConfig::default()
        },
        DecompressorConfig::default(),
    );
    let payload = [0x55u8; 4];
    let mut sizes = Vec::new();
    for i in 0..12u16 {
        let packet = rtp_packet(10 + i, 50 + i as u32 * 160, false, i, &payload);
        let len = round_trip(&mut compressor, &mut decompressor, &packet);
        sizes.push(len - payload.len());
    }
    // Packet 8 (index 8) triggered the refresh.
    assert!(sizes[8] >= 20, "refresh IR expected, got {}", sizes[8]);
    let stats = compressor.context_stats(ContextId::new(0)).unwrap();
    assert_eq!(stats.ir_packets, 2);
}

/// SN monotonicity: decoded sequence equals the compressor's input
/// sequence across the whole run.
#[test]
fn sn_sequence_is_preserved() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair();
    let payload = [0u8; 2];
    let mut decoded = Vec::new();
    for i in 0..20u16 {
        let packet = rtp_packet(65530u16.wrapping_add(i), 9000, false, i, &payload);
        let mut compressed = [0u8; 512];
        let mut output = [0u8; 512];
        let len = compressor.compress(&packet, &mut compressed).unwrap();
        match decompressor
            .decompress(&compressed[..len], &mut output)
            .unwrap()
        {
            rohcflow::DecompressedKind::Packet(out_len) => {
                // RTP SN lives at bytes 30..32 of the rebuilt packet.
                decoded.push(u16::from_be_bytes([output[30], output[31]]));
                assert_eq!(&output[..out_len], &packet[..]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
    let expected: Vec<u16> = (0..20u16).map(|i| 65530u16.wrapping_add(i)).collect();
    assert_eq!(decoded, expected);
}
