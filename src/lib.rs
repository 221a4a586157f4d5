//! `rohcflow`: RObust Header Compression (ROHC, RFC 3095) in safe Rust.
//!
//! A pair of cooperating endpoints - a [`Compressor`] and a
//! [`Decompressor`] - shrink IP/UDP/RTP/ESP/UDP-Lite header chains over
//! lossy, long-latency links by keeping per-flow synchronized state,
//! transmitting only differences from an established reference, and
//! recovering from loss with CRC guards and feedback.
//!
//! ## Core concepts
//!
//! - **Endpoints**: [`Compressor::compress`] turns an uncompressed packet
//!   into ROHC bytes; [`Decompressor::decompress`] reverses it. Each
//!   endpoint owns its CID namespace and per-flow contexts.
//! - **Profiles**: RTP/UDP/IP, UDP/IP, ESP/IP, IP-only, UDP-Lite and
//!   Uncompressed, registered as [`ProfileHandler`]s over a shared generic
//!   core.
//! - **Feedback**: in the bidirectional modes the decompressor emits
//!   ACK/NACK/STATIC-NACK elements that the caller moves to the co-located
//!   compressor, typically piggybacked on the reverse compressed stream.
//!
//! ## Quick start
//!
//! ```rust
//! use rohcflow::{Compressor, Decompressor, DecompressedKind};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut compressor = Compressor::with_defaults();
//!     let mut decompressor = Decompressor::with_defaults();
//!
//!     // A minimal IPv4/UDP packet (20 + 8 byte headers, 4 byte payload).
//!     let packet: Vec<u8> = {
//!         let mut p = vec![
//!             0x45, 0x00, 0x00, 0x20, 0x00, 0x07, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00,
//!             10, 0, 0, 1, 10, 0, 0, 2, // addresses
//!             0x10, 0x00, 0x00, 0x35, 0x00, 0x0C, 0x00, 0x00, // UDP
//!             1, 2, 3, 4,
//!         ];
//!         // A valid header checksum is required for byte-exact round trips.
//!         let mut sum = 0u32;
//!         for i in (0..20).step_by(2) {
//!             sum += u16::from_be_bytes([p[i], p[i + 1]]) as u32;
//!         }
//!         while sum >> 16 != 0 {
//!             sum = (sum & 0xFFFF) + (sum >> 16);
//!         }
//!         p[10..12].copy_from_slice(&(!(sum as u16)).to_be_bytes());
//!         p
//!     };
//!
//!     let mut compressed = [0u8; 256];
//!     let len = compressor.compress(&packet, &mut compressed)?;
//!
//!     let mut output = [0u8; 256];
//!     match decompressor.decompress(&compressed[..len], &mut output)? {
//!         DecompressedKind::Packet(n) => assert_eq!(&output[..n], &packet[..]),
//!         other => panic!("unexpected outcome: {other:?}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod bitstream;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod context_manager;
pub mod crc;
pub mod encodings;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod fuzz_harnesses;
pub mod headers;
pub mod packets;
pub mod profiles;
pub mod sdvl;
pub mod segment;
pub mod time;
pub mod traits;
pub mod ts_scaled;
pub mod types;

pub use config::{CidType, CompressorConfig, DecompressorConfig, Features, RohcMode};
pub use engine::{Compressor, DecompressedKind, Decompressor, TraceFn};
pub use error::{
    CompressionError, CrcType, DecompressionError, Field, ParseContext, RohcBuildingError,
    RohcError, RohcParsingError,
};
pub use profiles::RohcProfile;
pub use time::{mock_clock::MockClock, Clock, SystemClock};
pub use traits::{
    DecompressOutcome, ProfileHandler, RohcCompressorContext, RohcDecompressorContext,
};
pub use types::ContextId;
