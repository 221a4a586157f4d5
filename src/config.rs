//! Endpoint configuration.
//!
//! Both endpoints of a channel must agree on `cid_type` and `max_cid`; the
//! remaining knobs are local. Defaults follow RFC 3095 guidance and the
//! operational values listed in the interface contract.

use std::time::Duration;

use crate::constants::{
    DEFAULT_IR_TIMEOUT_FO_PACKETS, DEFAULT_IR_TIMEOUT_PACKETS, DEFAULT_IR_TIMEOUT_SECS,
    DEFAULT_K1, DEFAULT_N1, DEFAULT_OA_REPETITIONS, DEFAULT_WLSB_WINDOW_WIDTH,
    MAX_RTP_PORT_HINTS,
};
use crate::types::ContextId;

/// CID namespace of a channel, fixed at endpoint creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CidType {
    /// CIDs 0-15, carried in an Add-CID octet.
    #[default]
    Small,
    /// CIDs 0-16383, SDVL-coded after the packet type octet.
    Large,
}

impl CidType {
    /// Highest CID this namespace can express.
    pub fn max_cid(self) -> ContextId {
        match self {
            CidType::Small => ContextId::MAX_SMALL_CID,
            CidType::Large => ContextId::MAX_LARGE_CID,
        }
    }
}

/// Decompressor operating mode (RFC 3095, Section 4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RohcMode {
    /// No feedback channel.
    #[default]
    Unidirectional,
    /// Bidirectional optimistic: sparse ACKs, NACKs on damage.
    Optimistic,
    /// Bidirectional reliable: frequent ACKs.
    Reliable,
}

impl RohcMode {
    /// Wire encoding of the mode bits in FEEDBACK-2.
    pub fn to_bits(self) -> u8 {
        match self {
            RohcMode::Unidirectional => 0,
            RohcMode::Optimistic => 1,
            RohcMode::Reliable => 2,
        }
    }

    /// Decodes mode bits; values 0-2 are defined.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(RohcMode::Unidirectional),
            1 => Some(RohcMode::Optimistic),
            2 => Some(RohcMode::Reliable),
            _ => None,
        }
    }
}

/// Optional behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Attempt SN+1/SN+2 reconstruction when a UO packet fails its CRC.
    pub crc_repair: bool,
    /// Tolerate Add-CID padding octets emitted by pre-1.7 peers.
    pub compat_v1_6: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            crc_repair: false,
            compat_v1_6: false,
        }
    }
}

/// Compressor endpoint configuration.
#[derive(Debug, Clone)]
pub struct CompressorConfig {
    /// Highest CID to allocate; bounded by the namespace.
    pub max_cid: ContextId,
    pub cid_type: CidType,
    /// W-LSB window width; power of two in 1..=256.
    pub wlsb_window_width: usize,
    /// Optimistic-approach repetition count L.
    pub oa_repetitions: u32,
    /// Periodic IR refresh in packets; 0 disables.
    pub ir_timeout_packets: u32,
    /// FO-state refresh in packets; 0 disables.
    pub ir_timeout_fo_packets: u32,
    /// Periodic IR refresh by wallclock.
    pub ir_timeout: Duration,
    /// UDP ports hinting RTP streams; at most 15 entries are honored.
    pub rtp_ports: Vec<u16>,
    /// Largest reconstructed unit when segmenting; 0 disables segmentation.
    pub mrru: u16,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            max_cid: ContextId::MAX_SMALL_CID,
            cid_type: CidType::Small,
            wlsb_window_width: DEFAULT_WLSB_WINDOW_WIDTH,
            oa_repetitions: DEFAULT_OA_REPETITIONS,
            ir_timeout_packets: DEFAULT_IR_TIMEOUT_PACKETS,
            ir_timeout_fo_packets: DEFAULT_IR_TIMEOUT_FO_PACKETS,
            ir_timeout: Duration::from_secs(DEFAULT_IR_TIMEOUT_SECS),
            rtp_ports: Vec::new(),
            mrru: 0,
        }
    }
}

impl CompressorConfig {
    /// Clamps and validates the configuration.
    ///
    /// Returns `None` when a value cannot be honored: non-power-of-two
    /// window, `max_cid` outside the namespace, or too many RTP ports.
    pub fn validated(mut self) -> Option<Self> {
        if !self.wlsb_window_width.is_power_of_two()
            || self.wlsb_window_width == 0
            || self.wlsb_window_width > 256
        {
            return None;
        }
        if self.max_cid > self.cid_type.max_cid() {
            return None;
        }
        if self.rtp_ports.len() > MAX_RTP_PORT_HINTS {
            return None;
        }
        if self.oa_repetitions == 0 {
            self.oa_repetitions = DEFAULT_OA_REPETITIONS;
        }
        Some(self)
    }
}

/// Decompressor endpoint configuration.
#[derive(Debug, Clone)]
pub struct DecompressorConfig {
    pub max_cid: ContextId,
    pub cid_type: CidType,
    pub mode: RohcMode,
    /// k1 failures out of n1 packets downgrade FC -> SC.
    pub k1: u8,
    pub n1: u8,
    /// k2 failures out of n2 packets downgrade SC -> NC; n2 also paces ACKs.
    pub k2: u8,
    pub n2: u8,
    /// Largest reconstructed unit; 0 disables segment reassembly.
    pub mrru: u16,
    pub features: Features,
    /// Bound on queued feedback elements awaiting the reverse channel.
    pub feedback_queue_capacity: usize,
}

impl Default for DecompressorConfig {
    fn default() -> Self {
        Self {
            max_cid: ContextId::MAX_SMALL_CID,
            cid_type: CidType::Small,
            mode: RohcMode::Unidirectional,
            k1: DEFAULT_K1,
            n1: DEFAULT_N1,
            k2: DEFAULT_K1,
            n2: DEFAULT_N1,
            mrru: 0,
            features: Features::default(),
            feedback_queue_capacity: 8,
        }
    }
}

impl DecompressorConfig {
    /// Validates namespace and window parameters.
    pub fn validated(self) -> Option<Self> {
        if self.max_cid > self.cid_type.max_cid() {
            return None;
        }
        if self.n1 == 0 || self.n1 > 32 || self.n2 == 0 || self.n2 > 32 {
            return None;
        }
        if self.k1 == 0 || self.k2 == 0 {
            return None;
        }
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(CompressorConfig::default().validated().is_some());
        assert!(DecompressorConfig::default().validated().is_some());
    }

    #[test]
    fn window_width_must_be_power_of_two() {
        let config = CompressorConfig {
            wlsb_window_width: 3,
            ..CompressorConfig::default()
        };
        assert!(config.validated().is_none());
    }

    #[test]
    fn small_namespace_rejects_large_cid() {
        let config = CompressorConfig {
            max_cid: ContextId::new(100),
            ..CompressorConfig::default()
        };
        assert!(config.validated().is_none());

        let config = CompressorConfig {
            max_cid: ContextId::new(100),
            cid_type: CidType::Large,
            ..CompressorConfig::default()
        };
        assert!(config.validated().is_some());
    }

    #[test]
    fn rtp_port_hint_list_is_bounded() {
        let config = CompressorConfig {
            rtp_ports: (0..16).map(|i| 5000 + i).collect(),
            ..CompressorConfig::default()
        };
        assert!(config.validated().is_none());
    }

    #[test]
    fn mode_bits_round_trip() {
        for mode in [
            RohcMode::Unidirectional,
            RohcMode::Optimistic,
            RohcMode::Reliable,
        ] {
            assert_eq!(RohcMode::from_bits(mode.to_bits()), Some(mode));
        }
        assert_eq!(RohcMode::from_bits(3), None);
    }
}
