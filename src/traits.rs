//! Core traits binding the endpoints to the profile implementations.
//!
//! The engine is generic over profiles: handlers create contexts, compress
//! parsed header chains into ROHC bytes and decompress core packets back
//! into full packets. Contexts are stored as trait objects and downcast by
//! their owning handler.

use std::any::Any;
use std::fmt::Debug;
use std::time::Instant;

use crate::config::{CompressorConfig, DecompressorConfig};
use crate::crc::CrcCalculators;
use crate::error::RohcError;
use crate::feedback::FeedbackElement;
use crate::headers::PacketHeaders;
use crate::profiles::RohcProfile;
use crate::types::ContextId;

/// Capabilities of a compressor-side per-flow context.
pub trait RohcCompressorContext: Send + Debug {
    /// Profile this context is configured for.
    fn profile_id(&self) -> RohcProfile;
    /// CID of this flow.
    fn cid(&self) -> ContextId;
    /// Context as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Context as `&mut dyn Any` for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Last successful access time.
    fn last_accessed(&self) -> Instant;
    /// Updates the last access time.
    fn set_last_accessed(&mut self, now: Instant);
}

/// Capabilities of a decompressor-side per-flow context.
pub trait RohcDecompressorContext: Send + Debug {
    /// Profile this context is configured for.
    fn profile_id(&self) -> RohcProfile;
    /// CID of this flow.
    fn cid(&self) -> ContextId;
    /// Re-keys the context (engine-assigned CID).
    fn set_cid(&mut self, cid: ContextId);
    /// Context as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Context as `&mut dyn Any` for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Last successful access time.
    fn last_accessed(&self) -> Instant;
    /// Updates the last access time.
    fn set_last_accessed(&mut self, now: Instant);
}

/// Result of one decompression step.
///
/// Feedback can accompany both success (ACK pacing) and failure (NACK,
/// STATIC-NACK), so it travels beside the result rather than inside it.
#[derive(Debug)]
pub struct DecompressOutcome {
    /// Bytes written to the output buffer, or why decompression failed.
    pub result: Result<usize, RohcError>,
    /// Feedback the decompressor wants on the reverse channel.
    pub feedback: Option<FeedbackElement>,
}

impl DecompressOutcome {
    /// Successful outcome without feedback.
    pub fn ok(len: usize) -> Self {
        Self {
            result: Ok(len),
            feedback: None,
        }
    }

    /// Failed outcome without feedback.
    pub fn err(error: RohcError) -> Self {
        Self {
            result: Err(error),
            feedback: None,
        }
    }
}

/// A ROHC profile implementation.
pub trait ProfileHandler: Send + Sync + Debug {
    /// Profile identifier this handler implements.
    fn profile_id(&self) -> RohcProfile;

    /// Creates a compressor context for a new flow.
    fn create_compressor_context(
        &self,
        cid: ContextId,
        config: &CompressorConfig,
        now: Instant,
    ) -> Box<dyn RohcCompressorContext>;

    /// Creates a decompressor context for a new CID.
    fn create_decompressor_context(
        &self,
        cid: ContextId,
        config: &DecompressorConfig,
        now: Instant,
    ) -> Box<dyn RohcDecompressorContext>;

    /// Compresses one packet (parsed headers plus opaque payload) into
    /// `out`, returning the bytes written.
    ///
    /// # Errors
    /// - [`RohcError`] - Context mismatch or output buffer exhaustion
    fn compress(
        &self,
        context: &mut dyn RohcCompressorContext,
        crc: &CrcCalculators,
        headers: &PacketHeaders,
        payload: &[u8],
        now: Instant,
        out: &mut [u8],
    ) -> Result<usize, RohcError>;

    /// Decompresses one core packet (CID already stripped) into `out`.
    ///
    /// Failures are reported inside the outcome so that feedback generated
    /// on the failure path still reaches the reverse channel.
    fn decompress(
        &self,
        context: &mut dyn RohcDecompressorContext,
        crc: &CrcCalculators,
        core_packet: &[u8],
        out: &mut [u8],
    ) -> DecompressOutcome;
}
