//! Timestamp wraparound across the 2^32 boundary (scaled-TS re-init).

mod common;

use common::{endpoint_pair, round_trip, rtp_packet};

/// When the RTP timestamp crosses 2^32 with a stride that does not divide
/// the wrap point, TS_OFFSET moves and the scaled encoder must re-declare
/// the stride before scaling resumes. The flow stays byte-exact
/// throughout, dips back to chain-bearing packets for the re-declaration,
/// and then returns to one-byte headers.
#[test]
fn ts_wraparound_redeclares_stride_then_resumes_uo0() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair();
    let payload = [0x66u8; 8];
    let stride = 160u32;

    // Start a few strides below the last multiple of 160 under 2^32.
    let last_multiple = u32::MAX - (u32::MAX % stride);
    let start_ts = last_multiple - 6 * stride;
    let mut sizes = Vec::new();

    for i in 0..12u32 {
        let ts = start_ts.wrapping_add(i * stride);
        let packet = rtp_packet(20000 + i as u16, ts, false, 500 + i as u16, &payload);
        let len = round_trip(&mut compressor, &mut decompressor, &packet);
        sizes.push(len - payload.len());
    }

    // Pre-wrap steady state reached.
    assert_eq!(sizes[4], 1);
    assert_eq!(sizes[5], 1);
    // The wrap happens at i = 7 (ts walks past the last multiple).
    let wrap_index = sizes
        .iter()
        .enumerate()
        .skip(5)
        .find(|(_, &s)| s > 1)
        .map(|(i, _)| i)
        .expect("wrap must force chain packets");
    // Three stride declarations, then UO-0 again.
    assert!(sizes[wrap_index] > 2);
    assert!(sizes[wrap_index + 1] > 2);
    assert!(sizes[wrap_index + 2] > 2);
    assert_eq!(sizes[wrap_index + 3], 1);
    assert_eq!(sizes[wrap_index + 4], 1);
}

/// A sequence number wrap in steady state stays in UO-0: the W-LSB
/// interpretation interval is modular.
#[test]
fn sn_wraparound_stays_compressed() {
    let (mut compressor, mut decompressor, _clock) = endpoint_pair();
    let payload = [0x67u8; 8];

    let mut sizes = Vec::new();
    for i in 0..10u16 {
        let sn = 65532u16.wrapping_add(i);
        let packet = rtp_packet(sn, 7777, false, 100 + i, &payload);
        let len = round_trip(&mut compressor, &mut decompressor, &packet);
        sizes.push(len - payload.len());
    }
    for &size in &sizes[3..] {
        assert_eq!(size, 1);
    }
}
