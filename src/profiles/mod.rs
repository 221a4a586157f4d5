//! ROHC profile identifiers and handler implementations.
//!
//! Profiles are thin: the per-flow state machines, chain formats and packet
//! codecs live in [`generic`], and each profile module configures that core
//! with its own plan (sequence number source and width, RTP machinery,
//! checksum coverage). This mirrors the classic generic/specialized split of
//! ROHC implementations while keeping the handler registry a flat table of
//! trait objects.

pub mod esp;
pub mod generic;
pub mod ip_only;
pub mod rtp;
pub mod udp;
pub mod udp_lite;
pub mod uncompressed;

use serde::{Deserialize, Serialize};

use crate::constants::{
    PROFILE_ID_ESP, PROFILE_ID_IP, PROFILE_ID_RTP, PROFILE_ID_TCP, PROFILE_ID_UDP,
    PROFILE_ID_UDP_LITE, PROFILE_ID_UNCOMPRESSED,
};
use crate::headers::{PacketHeaders, Transport};
use crate::traits::ProfileHandler;

/// ROHC profile identifiers (IANA assigned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RohcProfile {
    /// 0x0000: headers passed through unchanged.
    Uncompressed,
    /// 0x0001: RTP/UDP/IP.
    Rtp,
    /// 0x0002: UDP/IP.
    Udp,
    /// 0x0003: ESP/IP.
    Esp,
    /// 0x0004: IP-only.
    Ip,
    /// 0x0006: TCP/IP; recognized but not implemented here.
    Tcp,
    /// 0x0008: UDP-Lite/IP.
    UdpLite,
    /// Any identifier outside the known set.
    Unknown(u8),
}

impl From<u8> for RohcProfile {
    fn from(value: u8) -> Self {
        match value {
            PROFILE_ID_UNCOMPRESSED => RohcProfile::Uncompressed,
            PROFILE_ID_RTP => RohcProfile::Rtp,
            PROFILE_ID_UDP => RohcProfile::Udp,
            PROFILE_ID_ESP => RohcProfile::Esp,
            PROFILE_ID_IP => RohcProfile::Ip,
            PROFILE_ID_TCP => RohcProfile::Tcp,
            PROFILE_ID_UDP_LITE => RohcProfile::UdpLite,
            other => RohcProfile::Unknown(other),
        }
    }
}

impl From<RohcProfile> for u8 {
    fn from(profile: RohcProfile) -> Self {
        match profile {
            RohcProfile::Uncompressed => PROFILE_ID_UNCOMPRESSED,
            RohcProfile::Rtp => PROFILE_ID_RTP,
            RohcProfile::Udp => PROFILE_ID_UDP,
            RohcProfile::Esp => PROFILE_ID_ESP,
            RohcProfile::Ip => PROFILE_ID_IP,
            RohcProfile::Tcp => PROFILE_ID_TCP,
            RohcProfile::UdpLite => PROFILE_ID_UDP_LITE,
            RohcProfile::Unknown(value) => value,
        }
    }
}

impl RohcProfile {
    /// Width in bits of this profile's sequence number space.
    pub fn sn_width(self) -> u8 {
        match self {
            RohcProfile::Esp => 32,
            _ => 16,
        }
    }

    /// Whether the profile carries the RTP machinery (TS, marker, SSRC).
    pub fn has_rtp(self) -> bool {
        matches!(self, RohcProfile::Rtp)
    }

    /// Whether the SN is generated by the compressor rather than taken from
    /// a header field (UDP, IP-only and UDP-Lite flows have no native SN).
    pub fn uses_synthetic_sn(self) -> bool {
        matches!(
            self,
            RohcProfile::Udp | RohcProfile::Ip | RohcProfile::UdpLite
        )
    }
}

/// Picks the most specific profile for a parsed header chain.
pub fn detect_profile(headers: &PacketHeaders) -> RohcProfile {
    if headers.rtp.is_some() {
        return RohcProfile::Rtp;
    }
    match &headers.transport {
        Some(Transport::Udp(_)) => RohcProfile::Udp,
        Some(Transport::UdpLite(_)) => RohcProfile::UdpLite,
        Some(Transport::Esp(_)) => RohcProfile::Esp,
        None => RohcProfile::Ip,
    }
}

/// Handlers for every implemented profile, for registry bootstrap.
pub fn default_handlers() -> Vec<Box<dyn ProfileHandler>> {
    vec![
        Box::new(uncompressed::UncompressedHandler::new()),
        Box::new(rtp::RtpHandler::new()),
        Box::new(udp::UdpHandler::new()),
        Box::new(esp::EspHandler::new()),
        Box::new(ip_only::IpOnlyHandler::new()),
        Box::new(udp_lite::UdpLiteHandler::new()),
    ]
}
