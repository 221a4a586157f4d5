//! Per-flow compression and decompression contexts shared by the profiles.
//!
//! A context pairs the reference header chains with the W-LSB and scaled-TS
//! codecs and the state machine counters. Profile handlers own one of these
//! per CID and drive it through the generic compressor/decompressor logic.

use std::any::Any;
use std::time::{Duration, Instant};

use crate::config::{CompressorConfig, DecompressorConfig, RohcMode};
use crate::encodings::{LsbOffset, WlsbDecoder, WlsbEncoder};
use crate::headers::PacketHeaders;
use crate::profiles::generic::chains::IpIdBehavior;
use crate::profiles::RohcProfile;
use crate::traits::{RohcCompressorContext, RohcDecompressorContext};
use crate::ts_scaled::{TsScaledDecoder, TsScaledEncoder};
use crate::types::{ContextId, SequenceNumber};

/// Compressor per-flow states (RFC 3095, Section 4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressorState {
    /// Initialization and refresh: full header chains.
    #[default]
    Ir,
    /// First order: dynamic chain updates.
    Fo,
    /// Second order: SN (and small deltas) plus CRC only.
    So,
}

/// Decompressor per-flow states (RFC 3095, Section 4.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecompressorState {
    /// Nothing established; only IR accepted.
    #[default]
    NoContext,
    /// Static chain known; IR and IR-DYN accepted.
    StaticContext,
    /// Everything known; all packet types accepted.
    FullContext,
}

/// Sliding k-out-of-n failure window driving state downgrades.
#[derive(Debug, Clone, Copy)]
pub struct FailureWindow {
    bits: u32,
    filled: u8,
    k: u8,
    n: u8,
}

impl FailureWindow {
    /// Window tracking `k` failures out of the last `n` outcomes.
    pub fn new(k: u8, n: u8) -> Self {
        debug_assert!(n >= 1 && n <= 32 && k >= 1);
        Self {
            bits: 0,
            filled: 0,
            k,
            n,
        }
    }

    /// Records one outcome; returns true when the threshold is crossed.
    pub fn record(&mut self, failed: bool) -> bool {
        self.bits = (self.bits << 1) | failed as u32;
        if self.filled < self.n {
            self.filled += 1;
        }
        let mask = if self.n >= 32 {
            u32::MAX
        } else {
            (1u32 << self.n) - 1
        };
        (self.bits & mask).count_ones() >= self.k as u32
    }

    /// Clears the window (after a state change).
    pub fn reset(&mut self) {
        self.bits = 0;
        self.filled = 0;
    }
}

/// Running statistics of one compressor context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressorStats {
    pub packets: u64,
    pub ir_packets: u64,
    pub ir_dyn_packets: u64,
    pub uo0_packets: u64,
    pub uo1_packets: u64,
    pub uor2_packets: u64,
    pub header_bytes_in: u64,
    pub header_bytes_out: u64,
}

/// Generic compressor context, parameterized only by the profile plan.
#[derive(Debug)]
pub struct GenericCompressorContext {
    pub profile: RohcProfile,
    pub cid: ContextId,
    pub state: CompressorState,
    /// Reference chain of the last transmitted packet; `None` until the
    /// first packet initializes the context.
    pub reference: Option<PacketHeaders>,
    pub sn_window: WlsbEncoder,
    pub ipid_window: WlsbEncoder,
    pub ts_codec: Option<TsScaledEncoder>,
    pub ipid_behavior: IpIdBehavior,
    pub last_sn: SequenceNumber,
    /// Compressor-generated SN for profiles without a native one.
    pub synthetic_sn: u16,
    /// Full-chain transmissions since the last disruptive change; gates
    /// FO -> SO at `oa_repetitions`.
    pub chain_repeats: u32,
    /// Whether the last transmitted chain declared a TS_STRIDE, i.e. the
    /// decompressor can reconstruct scaled timestamps.
    pub stride_synced: bool,
    pub packets_since_ir: u32,
    pub fo_packets_since_ir: u32,
    pub last_ir_at: Instant,
    /// Highest SN acknowledged by the peer, for feedback idempotence.
    pub last_acked_sn: Option<u32>,
    pub oa_repetitions: u32,
    pub ir_timeout_packets: u32,
    pub ir_timeout_fo_packets: u32,
    pub ir_timeout: Duration,
    pub stats: CompressorStats,
    pub created_at: Instant,
    pub last_accessed: Instant,
}

impl GenericCompressorContext {
    /// Creates a fresh context in IR state.
    pub fn new(
        profile: RohcProfile,
        cid: ContextId,
        config: &CompressorConfig,
        now: Instant,
    ) -> Self {
        let sn_width = profile.sn_width();
        let window = config.wlsb_window_width;
        Self {
            profile,
            cid,
            state: CompressorState::Ir,
            reference: None,
            sn_window: WlsbEncoder::new(window, sn_width, LsbOffset::Constant(0)),
            ipid_window: WlsbEncoder::new(window, 16, LsbOffset::Constant(0)),
            ts_codec: profile
                .has_rtp()
                .then(|| TsScaledEncoder::new(config.oa_repetitions, window)),
            ipid_behavior: IpIdBehavior::Sequential,
            last_sn: SequenceNumber::new(0),
            synthetic_sn: 0,
            chain_repeats: 0,
            stride_synced: false,
            packets_since_ir: 0,
            fo_packets_since_ir: 0,
            last_ir_at: now,
            last_acked_sn: None,
            oa_repetitions: config.oa_repetitions,
            ir_timeout_packets: config.ir_timeout_packets,
            ir_timeout_fo_packets: config.ir_timeout_fo_packets,
            ir_timeout: config.ir_timeout,
            stats: CompressorStats::default(),
            created_at: now,
            last_accessed: now,
        }
    }

    /// Drops all dynamic knowledge and returns to IR (static change or
    /// STATIC-NACK).
    pub fn reinitialize(&mut self) {
        self.state = CompressorState::Ir;
        self.reference = None;
        self.sn_window.clear();
        self.ipid_window.clear();
        if let Some(ts) = &mut self.ts_codec {
            ts.reset();
        }
        self.ipid_behavior = IpIdBehavior::Sequential;
        self.chain_repeats = 0;
        self.stride_synced = false;
        self.packets_since_ir = 0;
        self.fo_packets_since_ir = 0;
        self.last_acked_sn = None;
    }

    /// Demotes to FO after a NACK or a dynamic change the SO formats cannot
    /// carry.
    pub fn demote_to_fo(&mut self) {
        if self.state == CompressorState::So {
            self.state = CompressorState::Fo;
        }
        self.chain_repeats = 0;
    }
}

impl RohcCompressorContext for GenericCompressorContext {
    fn profile_id(&self) -> RohcProfile {
        self.profile
    }
    fn cid(&self) -> ContextId {
        self.cid
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn last_accessed(&self) -> Instant {
        self.last_accessed
    }
    fn set_last_accessed(&mut self, now: Instant) {
        self.last_accessed = now;
    }
}

/// Running statistics of one decompressor context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecompressorStats {
    pub packets_ok: u64,
    pub crc_failures: u64,
    pub crc_repairs: u64,
    pub feedback_sent: u64,
}

/// Generic decompressor context.
#[derive(Debug)]
pub struct GenericDecompressorContext {
    pub profile: RohcProfile,
    pub cid: ContextId,
    pub state: DecompressorState,
    pub mode: RohcMode,
    /// Reference chain updated on every CRC-validated packet.
    pub reference: Option<PacketHeaders>,
    pub sn_decoder: WlsbDecoder,
    pub ipid_decoder: WlsbDecoder,
    pub ts_decoder: TsScaledDecoder,
    pub ipid_behavior: IpIdBehavior,
    pub last_sn: SequenceNumber,
    pub synthetic_sn: u16,
    /// k1/n1 window: FC -> SC downgrade.
    pub fc_window: FailureWindow,
    /// k2/n2 window: SC -> NC downgrade; its n also paces ACKs.
    pub sc_window: FailureWindow,
    pub crc_repair_enabled: bool,
    /// Successes between paced ACKs (O/R modes), following n2.
    pub ack_interval: u32,
    /// Successes since the last ACK emitted (O/R modes).
    pub successes_since_ack: u32,
    pub stats: DecompressorStats,
    pub created_at: Instant,
    pub last_accessed: Instant,
}

impl GenericDecompressorContext {
    /// Creates a context in NoContext state.
    pub fn new(
        profile: RohcProfile,
        cid: ContextId,
        config: &DecompressorConfig,
        now: Instant,
    ) -> Self {
        Self {
            profile,
            cid,
            state: DecompressorState::NoContext,
            mode: config.mode,
            reference: None,
            sn_decoder: WlsbDecoder::new(profile.sn_width(), LsbOffset::Constant(0)),
            ipid_decoder: WlsbDecoder::new(16, LsbOffset::Constant(0)),
            ts_decoder: TsScaledDecoder::new(),
            ipid_behavior: IpIdBehavior::Sequential,
            last_sn: SequenceNumber::new(0),
            synthetic_sn: 0,
            fc_window: FailureWindow::new(config.k1, config.n1),
            sc_window: FailureWindow::new(config.k2, config.n2),
            crc_repair_enabled: config.features.crc_repair,
            ack_interval: config.n2 as u32,
            successes_since_ack: 0,
            stats: DecompressorStats::default(),
            created_at: now,
            last_accessed: now,
        }
    }

    /// Downgrades FC -> SC: dynamic knowledge is stale, static survives.
    pub fn downgrade_to_static(&mut self) {
        self.state = DecompressorState::StaticContext;
        self.sn_decoder.clear();
        self.ipid_decoder.clear();
        self.ts_decoder.clear();
        self.fc_window.reset();
    }

    /// Downgrades SC -> NC: everything is forgotten.
    pub fn downgrade_to_no_context(&mut self) {
        self.state = DecompressorState::NoContext;
        self.reference = None;
        self.sn_decoder.clear();
        self.ipid_decoder.clear();
        self.ts_decoder.clear();
        self.fc_window.reset();
        self.sc_window.reset();
    }
}

impl RohcDecompressorContext for GenericDecompressorContext {
    fn profile_id(&self) -> RohcProfile {
        self.profile
    }
    fn cid(&self) -> ContextId {
        self.cid
    }
    fn set_cid(&mut self, cid: ContextId) {
        self.cid = cid;
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn last_accessed(&self) -> Instant {
        self.last_accessed
    }
    fn set_last_accessed(&mut self, now: Instant) {
        self.last_accessed = now;
    }
}
