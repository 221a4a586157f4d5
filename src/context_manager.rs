//! Generic context storage.
//!
//! Holds compressor and decompressor contexts as trait objects keyed by
//! CID, independent of any specific profile. Context creation belongs to
//! the profile handlers; lifecycle policy (eviction, pruning) belongs to
//! the endpoints.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Instant;

use crate::error::{CompressionError, DecompressionError};
use crate::traits::{RohcCompressorContext, RohcDecompressorContext};
use crate::types::ContextId;

/// CID-keyed stores for both context kinds.
#[derive(Debug, Default)]
pub struct ContextManager {
    compressor_contexts: HashMap<ContextId, Box<dyn RohcCompressorContext>>,
    decompressor_contexts: HashMap<ContextId, Box<dyn RohcDecompressorContext>>,
}

impl ContextManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a compressor context.
    pub fn add_compressor_context(
        &mut self,
        cid: ContextId,
        context: Box<dyn RohcCompressorContext>,
    ) {
        self.compressor_contexts.insert(cid, context);
    }

    /// Inserts (or replaces) a decompressor context.
    pub fn add_decompressor_context(
        &mut self,
        cid: ContextId,
        context: Box<dyn RohcDecompressorContext>,
    ) {
        self.decompressor_contexts.insert(cid, context);
    }

    /// Mutable compressor context for `cid`.
    ///
    /// # Errors
    /// - [`CompressionError::ContextNotFound`] - No such context
    pub fn compressor_context_mut(
        &mut self,
        cid: ContextId,
    ) -> Result<&mut Box<dyn RohcCompressorContext>, CompressionError> {
        self.compressor_contexts
            .get_mut(&cid)
            .ok_or(CompressionError::ContextNotFound { cid })
    }

    /// Shared compressor context for `cid`.
    pub fn compressor_context(
        &self,
        cid: ContextId,
    ) -> Result<&dyn RohcCompressorContext, CompressionError> {
        self.compressor_contexts
            .get(&cid)
            .map(|boxed| &**boxed)
            .ok_or(CompressionError::ContextNotFound { cid })
    }

    /// Mutable decompressor context for `cid`.
    ///
    /// # Errors
    /// - [`DecompressionError::NoContext`] - No such context
    pub fn decompressor_context_mut(
        &mut self,
        cid: ContextId,
    ) -> Result<&mut Box<dyn RohcDecompressorContext>, DecompressionError> {
        self.decompressor_contexts
            .get_mut(&cid)
            .ok_or(DecompressionError::NoContext { cid })
    }

    /// Shared decompressor context for `cid`.
    pub fn decompressor_context(
        &self,
        cid: ContextId,
    ) -> Result<&dyn RohcDecompressorContext, DecompressionError> {
        self.decompressor_contexts
            .get(&cid)
            .map(|boxed| &**boxed)
            .ok_or(DecompressionError::NoContext { cid })
    }

    /// Whether a decompressor context exists for `cid`.
    pub fn has_decompressor_context(&self, cid: ContextId) -> bool {
        self.decompressor_contexts.contains_key(&cid)
    }

    /// Removes a compressor context.
    pub fn remove_compressor_context(
        &mut self,
        cid: ContextId,
    ) -> Option<Box<dyn RohcCompressorContext>> {
        self.compressor_contexts.remove(&cid)
    }

    /// Removes a decompressor context.
    pub fn remove_decompressor_context(
        &mut self,
        cid: ContextId,
    ) -> Option<Box<dyn RohcDecompressorContext>> {
        self.decompressor_contexts.remove(&cid)
    }

    /// Active compressor context count.
    pub fn compressor_context_count(&self) -> usize {
        self.compressor_contexts.len()
    }

    /// Active decompressor context count.
    pub fn decompressor_context_count(&self) -> usize {
        self.decompressor_contexts.len()
    }

    /// Compressor CIDs whose last access predates `deadline`.
    pub fn stale_compressor_cids(&self, deadline: Instant) -> Vec<ContextId> {
        self.compressor_contexts
            .iter()
            .filter(|(_, context)| context.last_accessed() < deadline)
            .map(|(cid, _)| *cid)
            .collect()
    }

    /// Decompressor CIDs whose last access predates `deadline`.
    pub fn stale_decompressor_cids(&self, deadline: Instant) -> Vec<ContextId> {
        self.decompressor_contexts
            .iter()
            .filter(|(_, context)| context.last_accessed() < deadline)
            .map(|(cid, _)| *cid)
            .collect()
    }

    /// Removes every context of both kinds.
    pub fn clear(&mut self) {
        self.compressor_contexts.clear();
        self.decompressor_contexts.clear();
    }
}
