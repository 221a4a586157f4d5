//! The compressor and decompressor endpoints.
//!
//! An endpoint owns its CID namespace, profile handler registry, context
//! store and CRC tables. Endpoints are single-threaded state machines: the
//! caller serializes `compress`/`decompress` invocations and moves feedback
//! payloads between a decompressor and its co-located compressor.
//!
//! Channel layout produced by [`Compressor::compress`]:
//! piggybacked feedback elements, an Add-CID octet (small CIDs above 0) or
//! an SDVL CID after the type octet (large CIDs), then the profile-specific
//! core packet and payload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::classifier::{signature_for, Classifier, FlowSignature};
use crate::config::{CidType, CompressorConfig, DecompressorConfig};
use crate::constants::{
    ADD_CID_PREFIX_MASK, ADD_CID_PREFIX_VALUE, FEEDBACK_PREFIX_MASK, FEEDBACK_PREFIX_VALUE,
    IR_PACKET_TYPE_BASE, IR_PACKET_TYPE_D_BIT, SEGMENT_TYPE_FINAL, SEGMENT_TYPE_NON_FINAL,
    SMALL_CID_MASK,
};
use crate::context_manager::ContextManager;
use crate::crc::CrcCalculators;
use crate::error::{
    DecompressionError, ParseContext, RohcError, RohcParsingError,
};
use crate::feedback::{
    frame_feedback, parse_feedback, serialize_feedback, strip_feedback, FeedbackElement,
    FeedbackQueue,
};
use crate::headers::{parse_headers, IpHeader, Ipv4Header, PacketHeaders};
use crate::packets::{add_cid_octet, insert_large_cid};
use crate::profiles::generic::compressor::apply_feedback;
use crate::profiles::generic::context::{
    CompressorStats, DecompressorStats, GenericCompressorContext, GenericDecompressorContext,
};
use crate::profiles::{default_handlers, detect_profile, RohcProfile};
use crate::sdvl::sdvl_decode;
use crate::segment::{ReassemblyBuffer, SegmentOutcome, Segmenter};
use crate::time::{Clock, SystemClock};
use crate::traits::ProfileHandler;
use crate::types::ContextId;

/// Trace callback injected at endpoint creation.
pub type TraceFn = Box<dyn Fn(&str) + Send + Sync>;

/// What one `decompress` call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressedKind {
    /// A reconstructed packet of this many bytes is in the output buffer.
    Packet(usize),
    /// The input carried only feedback; nothing was written.
    FeedbackOnly,
    /// A non-final segment was buffered; more segments expected.
    SegmentBuffered,
}

fn register_defaults(
    handlers: &mut HashMap<RohcProfile, Box<dyn ProfileHandler>>,
) {
    for handler in default_handlers() {
        handlers.insert(handler.profile_id(), handler);
    }
}

/// Placeholder chain for packets no profile could parse; the Uncompressed
/// handler never reads it.
fn opaque_headers() -> PacketHeaders {
    PacketHeaders {
        ip: IpHeader::V4(Ipv4Header {
            dscp: 0,
            ecn: 0,
            total_length: 0,
            identification: 0.into(),
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 0,
            protocol: 0,
            checksum: 0,
            src: std::net::Ipv4Addr::UNSPECIFIED,
            dst: std::net::Ipv4Addr::UNSPECIFIED,
        }),
        transport: None,
        rtp: None,
        header_len: 0,
    }
}

fn opaque_signature() -> FlowSignature {
    signature_for(&opaque_headers(), RohcProfile::Uncompressed)
}

/// The ROHC compressor endpoint.
pub struct Compressor {
    config: CompressorConfig,
    handlers: HashMap<RohcProfile, Box<dyn ProfileHandler>>,
    classifier: Classifier,
    contexts: ContextManager,
    crc: CrcCalculators,
    clock: Arc<dyn Clock>,
    trace: Option<TraceFn>,
    piggyback: FeedbackQueue,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("contexts", &self.contexts.compressor_context_count())
            .field("max_cid", &self.config.max_cid)
            .finish()
    }
}

impl Compressor {
    /// Creates a compressor with the given configuration and clock; the
    /// default profile handlers are pre-registered.
    ///
    /// # Errors
    /// - [`RohcError::Internal`] - Configuration fails validation
    pub fn new(config: CompressorConfig, clock: Arc<dyn Clock>) -> Result<Self, RohcError> {
        let config = config
            .validated()
            .ok_or(RohcError::Internal("invalid compressor configuration"))?;
        let mut handlers = HashMap::new();
        register_defaults(&mut handlers);
        Ok(Self {
            config,
            handlers,
            classifier: Classifier::new(),
            contexts: ContextManager::new(),
            crc: CrcCalculators::new(),
            clock,
            trace: None,
            piggyback: FeedbackQueue::new(8),
        })
    }

    /// Compressor with default configuration and the system clock.
    pub fn with_defaults() -> Self {
        Self::new(CompressorConfig::default(), Arc::new(SystemClock))
            .expect("default configuration is valid")
    }

    /// Installs a trace callback.
    pub fn set_trace(&mut self, trace: TraceFn) {
        self.trace = Some(trace);
    }

    fn emit_trace(&self, message: &str) {
        if let Some(trace) = &self.trace {
            trace(message);
        }
    }

    /// Replaces or adds a profile handler.
    pub fn register_profile_handler(&mut self, handler: Box<dyn ProfileHandler>) {
        self.handlers.insert(handler.profile_id(), handler);
    }

    /// Borrow of the active configuration.
    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Queues a serialized feedback element for piggybacking onto the next
    /// compressed packet. Dropped when the piggyback queue is full.
    pub fn piggyback_feedback(&mut self, element: Vec<u8>) -> bool {
        self.piggyback.push(element)
    }

    /// Compresses one uncompressed packet into `out`, prefixing queued
    /// feedback. Returns the total bytes written.
    ///
    /// # Errors
    /// - [`RohcError`] - Classification, context or building failure; the
    ///   affected context is unchanged
    pub fn compress(&mut self, packet: &[u8], out: &mut [u8]) -> Result<usize, RohcError> {
        let now = self.clock.now();

        // Piggybacked feedback first.
        let mut at = 0;
        while let Some(element) = self.piggyback.pop() {
            at += frame_feedback(&element, &mut out[at..]).map_err(RohcError::Building)?;
        }

        // Classify.
        let parsed = parse_headers(packet, &self.config.rtp_ports).ok();
        let (profile, headers, payload, signature) = match parsed {
            Some(headers) => {
                let mut profile = detect_profile(&headers);
                if !self.handlers.contains_key(&profile) {
                    profile = RohcProfile::Uncompressed;
                }
                if profile == RohcProfile::Uncompressed {
                    (profile, opaque_headers(), packet, opaque_signature())
                } else {
                    let signature = signature_for(&headers, profile);
                    let payload = &packet[headers.header_len..];
                    (profile, headers, payload, signature)
                }
            }
            None => (
                RohcProfile::Uncompressed,
                opaque_headers(),
                packet,
                opaque_signature(),
            ),
        };
        let handler = self
            .handlers
            .get(&profile)
            .ok_or(RohcError::UnsupportedProfile(profile.into()))?;

        // CID allocation with LRU eviction.
        let allocation = self
            .classifier
            .lookup_or_allocate(&signature, self.config.max_cid);
        if let Some(evicted) = allocation.evicted {
            self.contexts.remove_compressor_context(evicted);
            self.emit_trace("compressor context evicted");
        }
        let cid = allocation.cid;
        if allocation.created {
            let context = handler.create_compressor_context(cid, &self.config, now);
            self.contexts.add_compressor_context(cid, context);
            self.emit_trace("compressor context created");
        }

        // CID prefix (small) and core packet.
        let core_start = if self.config.cid_type == CidType::Small && cid.value() > 0 {
            if out.len() < at + 1 {
                return Err(RohcError::Building(
                    crate::error::RohcBuildingError::BufferTooSmall {
                        needed: at + 1,
                        available: out.len(),
                        context: ParseContext::CidParsing,
                    },
                ));
            }
            out[at] = add_cid_octet(cid);
            at + 1
        } else {
            at
        };

        let context = self.contexts.compressor_context_mut(cid)?;
        let mut core_len = handler.compress(
            context.as_mut(),
            &self.crc,
            &headers,
            payload,
            now,
            &mut out[core_start..],
        )?;
        context.set_last_accessed(now);

        if self.config.cid_type == CidType::Large {
            core_len = insert_large_cid(&mut out[core_start..], core_len, cid)
                .map_err(RohcError::Building)?;
        }
        Ok(core_start + core_len)
    }

    /// Delivers reverse-channel feedback (framed or raw elements) to the
    /// affected contexts. Duplicate ACKs are no-ops.
    ///
    /// # Errors
    /// - [`RohcError::Parsing`] - Malformed feedback
    pub fn feedback_received(&mut self, data: &[u8]) -> Result<(), RohcError> {
        let elements: Vec<Vec<u8>> = if data
            .first()
            .is_some_and(|&b| b & FEEDBACK_PREFIX_MASK == FEEDBACK_PREFIX_VALUE)
        {
            let (elements, _) = strip_feedback(data).map_err(RohcError::Parsing)?;
            elements.iter().map(|e| e.to_vec()).collect()
        } else {
            vec![data.to_vec()]
        };

        for payload in elements {
            let element = parse_feedback(&payload, self.config.cid_type, &self.crc)
                .map_err(RohcError::Parsing)?;
            self.apply_feedback_element(&element);
        }
        Ok(())
    }

    fn apply_feedback_element(&mut self, element: &FeedbackElement) {
        let Ok(context) = self.contexts.compressor_context_mut(element.cid) else {
            return; // Feedback for a forgotten context is stale, not fatal.
        };
        if let Some(ctx) = context
            .as_any_mut()
            .downcast_mut::<GenericCompressorContext>()
        {
            apply_feedback(ctx, element);
            self.emit_trace("feedback applied");
        }
    }

    /// Splits an oversized compressed packet into MRRU segments, or `None`
    /// when it fits `mtu` or segmentation is disabled.
    pub fn segments<'a>(&self, rohc_packet: &'a [u8], mtu: usize) -> Option<Segmenter<'a>> {
        Segmenter::new(rohc_packet, mtu, self.config.mrru)
    }

    /// Removes contexts idle longer than `timeout`.
    pub fn prune_stale_contexts(&mut self, timeout: Duration) {
        let now = self.clock.now();
        let Some(deadline) = now.checked_sub(timeout) else {
            return;
        };
        for cid in self.contexts.stale_compressor_cids(deadline) {
            self.contexts.remove_compressor_context(cid);
            self.classifier.release(cid);
        }
    }

    /// Active context count.
    pub fn context_count(&self) -> usize {
        self.contexts.compressor_context_count()
    }

    /// Statistics of one context.
    pub fn context_stats(&self, cid: ContextId) -> Option<CompressorStats> {
        self.contexts
            .compressor_context(cid)
            .ok()?
            .as_any()
            .downcast_ref::<GenericCompressorContext>()
            .map(|ctx| ctx.stats)
    }
}

/// The ROHC decompressor endpoint.
pub struct Decompressor {
    config: DecompressorConfig,
    handlers: HashMap<RohcProfile, Box<dyn ProfileHandler>>,
    contexts: ContextManager,
    crc: CrcCalculators,
    clock: Arc<dyn Clock>,
    trace: Option<TraceFn>,
    /// Feedback generated locally, awaiting the reverse channel.
    generated_feedback: FeedbackQueue,
    /// Feedback found piggybacked on the forward channel, for the
    /// co-located compressor.
    received_feedback: FeedbackQueue,
    reassembly: ReassemblyBuffer,
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decompressor")
            .field("contexts", &self.contexts.decompressor_context_count())
            .field("max_cid", &self.config.max_cid)
            .finish()
    }
}

impl Decompressor {
    /// Creates a decompressor with the given configuration and clock; the
    /// default profile handlers are pre-registered.
    ///
    /// # Errors
    /// - [`RohcError::Internal`] - Configuration fails validation
    pub fn new(config: DecompressorConfig, clock: Arc<dyn Clock>) -> Result<Self, RohcError> {
        let config = config
            .validated()
            .ok_or(RohcError::Internal("invalid decompressor configuration"))?;
        let mut handlers = HashMap::new();
        register_defaults(&mut handlers);
        let feedback_capacity = config.feedback_queue_capacity;
        let mrru = config.mrru;
        Ok(Self {
            config,
            handlers,
            contexts: ContextManager::new(),
            crc: CrcCalculators::new(),
            clock,
            trace: None,
            generated_feedback: FeedbackQueue::new(feedback_capacity),
            received_feedback: FeedbackQueue::new(feedback_capacity),
            reassembly: ReassemblyBuffer::new(mrru),
        })
    }

    /// Decompressor with default configuration and the system clock.
    pub fn with_defaults() -> Self {
        Self::new(DecompressorConfig::default(), Arc::new(SystemClock))
            .expect("default configuration is valid")
    }

    /// Installs a trace callback.
    pub fn set_trace(&mut self, trace: TraceFn) {
        self.trace = Some(trace);
    }

    fn emit_trace(&self, message: &str) {
        if let Some(trace) = &self.trace {
            trace(message);
        }
    }

    /// Replaces or adds a profile handler.
    pub fn register_profile_handler(&mut self, handler: Box<dyn ProfileHandler>) {
        self.handlers.insert(handler.profile_id(), handler);
    }

    /// Borrow of the active configuration.
    pub fn config(&self) -> &DecompressorConfig {
        &self.config
    }

    /// Oldest locally generated feedback element, for the reverse channel.
    pub fn take_generated_feedback(&mut self) -> Option<Vec<u8>> {
        self.generated_feedback.pop()
    }

    /// Oldest feedback element found piggybacked on the forward channel,
    /// for delivery to the co-located compressor.
    pub fn take_received_feedback(&mut self) -> Option<Vec<u8>> {
        self.received_feedback.pop()
    }

    fn queue_generated(&mut self, element: &FeedbackElement) {
        let mut buf = [0u8; 32];
        if let Ok(len) = serialize_feedback(element, self.config.cid_type, &self.crc, &mut buf) {
            self.generated_feedback.push(buf[..len].to_vec());
        }
    }

    /// Decompresses one ROHC packet into `out`.
    ///
    /// Piggybacked feedback is collected, segments are reassembled, and the
    /// core packet is routed to its context. Any random byte input returns
    /// an error rather than corrupting state.
    ///
    /// # Errors
    /// - [`RohcError`] - Malformed input, missing context, CRC failure
    pub fn decompress(
        &mut self,
        packet: &[u8],
        out: &mut [u8],
    ) -> Result<DecompressedKind, RohcError> {
        // Collect piggybacked feedback.
        let (feedback_elements, mut rest) =
            strip_feedback(packet).map_err(RohcError::Parsing)?;
        for element in feedback_elements {
            self.received_feedback.push(element.to_vec());
        }
        if rest.is_empty() {
            if packet.is_empty() {
                return Err(RohcError::Parsing(RohcParsingError::NotEnoughData {
                    needed: 1,
                    got: 0,
                    context: ParseContext::RohcPacketInput,
                }));
            }
            return Ok(DecompressedKind::FeedbackOnly);
        }

        // Pre-1.7 peers may pad with Add-CID zero octets.
        if self.config.features.compat_v1_6 {
            while rest.len() > 1 && rest[0] == ADD_CID_PREFIX_VALUE {
                rest = &rest[1..];
            }
        }

        // Segments reassemble before normal processing.
        if rest[0] == SEGMENT_TYPE_NON_FINAL || rest[0] == SEGMENT_TYPE_FINAL {
            return match self.reassembly.push(rest).map_err(RohcError::Decompression)? {
                SegmentOutcome::Pending => Ok(DecompressedKind::SegmentBuffered),
                SegmentOutcome::Complete(unit) => {
                    let len = self.process_packet(&unit, out)?;
                    Ok(DecompressedKind::Packet(len))
                }
            };
        }

        let len = self.process_packet(rest, out)?;
        Ok(DecompressedKind::Packet(len))
    }

    fn process_packet(&mut self, packet: &[u8], out: &mut [u8]) -> Result<usize, RohcError> {
        let first = *packet.first().ok_or(RohcError::Parsing(
            RohcParsingError::NotEnoughData {
                needed: 1,
                got: 0,
                context: ParseContext::CidParsing,
            },
        ))?;
        // Large CIDs sit between the type octet and the rest of the core,
        // so that layout is stitched back together before dispatch.
        let (cid, stitched): (ContextId, Option<Vec<u8>>) = match self.config.cid_type {
            CidType::Small => {
                if first & ADD_CID_PREFIX_MASK == ADD_CID_PREFIX_VALUE {
                    (ContextId::new((first & SMALL_CID_MASK) as u16), None)
                } else {
                    (ContextId::new(0), None)
                }
            }
            CidType::Large => {
                let (cid_value, cid_len) =
                    sdvl_decode(&packet[1..]).map_err(RohcError::Parsing)?;
                let mut core = Vec::with_capacity(packet.len() - cid_len);
                core.push(first);
                core.extend_from_slice(&packet[1 + cid_len..]);
                (ContextId::new(cid_value as u16), Some(core))
            }
        };
        let core: &[u8] = match &stitched {
            Some(core) => core,
            None => {
                if first & ADD_CID_PREFIX_MASK == ADD_CID_PREFIX_VALUE {
                    &packet[1..]
                } else {
                    packet
                }
            }
        };
        if cid > self.config.max_cid {
            return Err(RohcError::Decompression(DecompressionError::NoContext {
                cid,
            }));
        }
        if core.is_empty() {
            return Err(RohcError::Parsing(RohcParsingError::NotEnoughData {
                needed: 1,
                got: 0,
                context: ParseContext::CorePacketAfterCid,
            }));
        }

        let now = self.clock.now();
        if !self.contexts.has_decompressor_context(cid) {
            // Only an IR can create a context.
            let first = core[0];
            if first & !IR_PACKET_TYPE_D_BIT != IR_PACKET_TYPE_BASE {
                let element = FeedbackElement::static_nack(cid, self.config.mode);
                if !matches!(self.config.mode, crate::config::RohcMode::Unidirectional) {
                    self.queue_generated(&element);
                }
                return Err(RohcError::Decompression(DecompressionError::NoContext {
                    cid,
                }));
            }
            if core.len() < 2 {
                return Err(RohcError::Parsing(RohcParsingError::NotEnoughData {
                    needed: 2,
                    got: core.len(),
                    context: ParseContext::IrPacket,
                }));
            }
            let profile = RohcProfile::from(core[1]);
            let handler = self
                .handlers
                .get(&profile)
                .ok_or(RohcError::UnsupportedProfile(core[1]))?;
            let context = handler.create_decompressor_context(cid, &self.config, now);
            self.contexts.add_decompressor_context(cid, context);
            self.emit_trace("decompressor context created");
        }

        let profile = self.contexts.decompressor_context(cid)?.profile_id();
        let handler = self
            .handlers
            .get(&profile)
            .ok_or(RohcError::UnsupportedProfile(profile.into()))?;

        let context = self.contexts.decompressor_context_mut(cid)?;
        let outcome = handler.decompress(context.as_mut(), &self.crc, core, out);
        if outcome.result.is_ok() {
            context.set_last_accessed(now);
        }
        if let Some(element) = &outcome.feedback {
            self.queue_generated(element);
        }
        if outcome.result.is_err() {
            self.emit_trace("decompression failed");
        }
        outcome.result
    }

    /// Removes contexts idle longer than `timeout`.
    pub fn prune_stale_contexts(&mut self, timeout: Duration) {
        let now = self.clock.now();
        let Some(deadline) = now.checked_sub(timeout) else {
            return;
        };
        for cid in self.contexts.stale_decompressor_cids(deadline) {
            self.contexts.remove_decompressor_context(cid);
        }
    }

    /// Active context count.
    pub fn context_count(&self) -> usize {
        self.contexts.decompressor_context_count()
    }

    /// Statistics of one context.
    pub fn context_stats(&self, cid: ContextId) -> Option<DecompressorStats> {
        self.contexts
            .decompressor_context(cid)
            .ok()?
            .as_any()
            .downcast_ref::<GenericDecompressorContext>()
            .map(|ctx| ctx.stats)
    }
}
