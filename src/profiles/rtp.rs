//! Profile 0x0001: RTP/UDP/IP.
//!
//! The flagship profile: 16-bit RTP sequence numbers, scaled timestamps,
//! the marker bit, and the full UO-0 / UO-1-RTP / UO-1-ID / UO-1-TS /
//! UOR-2-RTP packet family. RTP streams are recognized through the
//! compressor's configured UDP port hints.

use crate::generic_profile_handler;
use crate::profiles::RohcProfile;

generic_profile_handler!(
    /// Handler for RTP/UDP/IP flows.
    RtpHandler => RohcProfile::Rtp
);
