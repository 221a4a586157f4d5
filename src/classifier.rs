//! Flow classification and CID allocation.
//!
//! The compressor keys each flow by a profile-dependent signature tuple and
//! maps it to a CID. The CID space is bounded by `max_cid`; when it fills,
//! the least-recently-used flow is evicted and its CID reassigned.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::headers::{IpHeader, PacketHeaders, Transport};
use crate::profiles::RohcProfile;
use crate::types::ContextId;

/// Per-flow identity tuple.
///
/// Fields that a profile does not use stay zero so the tuple remains
/// `Hash`/`Eq` across all profiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowSignature {
    pub profile: RohcProfile,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub spi: u32,
    pub flow_label: u32,
    pub ssrc: u32,
}

/// Builds the signature of a parsed packet under `profile`.
pub fn signature_for(headers: &PacketHeaders, profile: RohcProfile) -> FlowSignature {
    let (src, dst, flow_label) = match &headers.ip {
        IpHeader::V4(h) => (IpAddr::V4(h.src), IpAddr::V4(h.dst), 0),
        IpHeader::V6(h) => (IpAddr::V6(h.src), IpAddr::V6(h.dst), h.flow_label),
    };
    let (src_port, dst_port, spi) = match &headers.transport {
        Some(Transport::Udp(u)) => (u.src_port, u.dst_port, 0),
        Some(Transport::UdpLite(u)) => (u.src_port, u.dst_port, 0),
        Some(Transport::Esp(e)) => (0, 0, e.spi.value()),
        None => (0, 0, 0),
    };
    FlowSignature {
        profile,
        src,
        dst,
        protocol: headers.ip.protocol(),
        src_port,
        dst_port,
        spi,
        flow_label,
        ssrc: headers.rtp.as_ref().map_or(0, |r| r.ssrc.value()),
    }
}

/// What `lookup_or_allocate` decided.
#[derive(Debug, PartialEq, Eq)]
pub struct Allocation {
    pub cid: ContextId,
    /// True when the CID was newly assigned to this flow.
    pub created: bool,
    /// A flow that lost its CID to make room, if any.
    pub evicted: Option<ContextId>,
}

/// Signature-to-CID table with LRU eviction.
#[derive(Debug, Default)]
pub struct Classifier {
    by_signature: HashMap<FlowSignature, ContextId>,
    by_cid: HashMap<ContextId, FlowSignature>,
    /// CIDs from least to most recently used.
    recency: Vec<ContextId>,
}

impl Classifier {
    /// Creates an empty classifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active flows.
    pub fn len(&self) -> usize {
        self.by_cid.len()
    }

    /// True when no flow is tracked.
    pub fn is_empty(&self) -> bool {
        self.by_cid.is_empty()
    }

    fn touch(&mut self, cid: ContextId) {
        if let Some(pos) = self.recency.iter().position(|&c| c == cid) {
            self.recency.remove(pos);
        }
        self.recency.push(cid);
    }

    /// Finds the CID of `signature` or assigns one, evicting the LRU flow
    /// when all of `0..=max_cid` are taken. The returned eviction must be
    /// propagated to the context store.
    pub fn lookup_or_allocate(
        &mut self,
        signature: &FlowSignature,
        max_cid: ContextId,
    ) -> Allocation {
        if let Some(&cid) = self.by_signature.get(signature) {
            self.touch(cid);
            return Allocation {
                cid,
                created: false,
                evicted: None,
            };
        }

        let capacity = max_cid.value() as usize + 1;
        let (cid, evicted) = if self.by_cid.len() < capacity {
            let free = (0..=max_cid.value())
                .map(ContextId::new)
                .find(|cid| !self.by_cid.contains_key(cid))
                .expect("capacity check guarantees a free CID");
            (free, None)
        } else {
            let victim = self.recency[0];
            self.release(victim);
            (victim, Some(victim))
        };

        self.by_signature.insert(signature.clone(), cid);
        self.by_cid.insert(cid, signature.clone());
        self.touch(cid);
        Allocation {
            cid,
            created: true,
            evicted,
        }
    }

    /// Removes a flow by CID.
    pub fn release(&mut self, cid: ContextId) {
        if let Some(signature) = self.by_cid.remove(&cid) {
            self.by_signature.remove(&signature);
        }
        if let Some(pos) = self.recency.iter().position(|&c| c == cid) {
            self.recency.remove(pos);
        }
    }

    /// Drops every flow.
    pub fn clear(&mut self) {
        self.by_signature.clear();
        self.by_cid.clear();
        self.recency.clear();
    }
}
