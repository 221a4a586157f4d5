//! ROHC error types and utilities.
//!
//! Errors are split by activity: parsing incoming bytes, building outgoing
//! packets, and the compression/decompression operations that drive them.
//! The `thiserror` crate provides the derive plumbing. No error here is fatal
//! at the endpoint level; a failing context re-enters No Context without
//! affecting sibling flows.

use thiserror::Error;

use crate::types::ContextId;

/// Location tags for parsing errors, kept coarse enough to stay `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseContext {
    RohcPacketInput,
    CorePacketAfterCid,
    CidParsing,
    Sdvl,
    Ipv4Header,
    Ipv6Header,
    Ipv6ExtensionChain,
    UdpHeader,
    UdpLiteHeader,
    EspHeader,
    RtpHeader,
    IrPacket,
    IrDynPacket,
    StaticChain,
    DynamicChain,
    UoPacket,
    Extension,
    FeedbackElement,
    SegmentPacket,
    BitStream,
}

impl std::fmt::Display for ParseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RohcPacketInput => "ROHC packet input",
            Self::CorePacketAfterCid => "core ROHC packet after CID processing",
            Self::CidParsing => "CID parsing",
            Self::Sdvl => "SDVL value",
            Self::Ipv4Header => "IPv4 header",
            Self::Ipv6Header => "IPv6 header",
            Self::Ipv6ExtensionChain => "IPv6 extension chain",
            Self::UdpHeader => "UDP header",
            Self::UdpLiteHeader => "UDP-Lite header",
            Self::EspHeader => "ESP header",
            Self::RtpHeader => "RTP header",
            Self::IrPacket => "IR packet",
            Self::IrDynPacket => "IR-DYN packet",
            Self::StaticChain => "static chain",
            Self::DynamicChain => "dynamic chain",
            Self::UoPacket => "UO/UOR packet",
            Self::Extension => "packet extension",
            Self::FeedbackElement => "feedback element",
            Self::SegmentPacket => "segment packet",
            Self::BitStream => "bit stream",
        };
        write!(f, "{}", s)
    }
}

/// Field tags for structured error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Cid,
    ProfileId,
    NumLsbBits,
    ReceivedLsbs,
    IpVersion,
    IpProtocol,
    RtpVersion,
    SnLsb,
    TsLsb,
    IpIdLsb,
    TsScaled,
    TsStride,
    Crc,
    Sdvl,
    BufferSize,
    FeedbackOption,
    SegmentLength,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cid => "CID",
            Self::ProfileId => "profile ID",
            Self::NumLsbBits => "num_lsb_bits",
            Self::ReceivedLsbs => "received_lsbs",
            Self::IpVersion => "IP version",
            Self::IpProtocol => "IP protocol",
            Self::RtpVersion => "RTP version",
            Self::SnLsb => "sn_lsb",
            Self::TsLsb => "ts_lsb",
            Self::IpIdLsb => "ip_id_lsb",
            Self::TsScaled => "ts_scaled",
            Self::TsStride => "ts_stride",
            Self::Crc => "CRC",
            Self::Sdvl => "SDVL",
            Self::BufferSize => "buffer size",
            Self::FeedbackOption => "feedback option",
            Self::SegmentLength => "segment length",
        };
        write!(f, "{}", s)
    }
}

/// CRC kinds used across the packet formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcType {
    Crc2Extension,
    Crc3Uo,
    Crc7Uor2,
    Crc8Ir,
    Crc8Feedback,
}

impl std::fmt::Display for CrcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Crc2Extension => "CRC-2 (extension)",
            Self::Crc3Uo => "CRC-3 (UO)",
            Self::Crc7Uor2 => "CRC-7 (UOR-2)",
            Self::Crc8Ir => "CRC-8 (IR)",
            Self::Crc8Feedback => "CRC-8 (feedback)",
        };
        write!(f, "{}", s)
    }
}

/// Errors raised while parsing ROHC or uncompressed packet bytes.
///
/// These cover the `Malformed` error class: truncated headers, bad IP
/// versions, SDVL overflows. The originating context is never modified when
/// one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RohcParsingError {
    /// Insufficient data to parse a complete field or structure.
    #[error("incomplete data: needed {needed} bytes, got {got} for {context}")]
    NotEnoughData {
        needed: usize,
        got: usize,
        context: ParseContext,
    },

    /// SDVL code exceeds the representable range or ends mid-sequence.
    #[error("malformed SDVL value in {context}")]
    MalformedSdvl { context: ParseContext },

    /// Unrecognized packet type discriminator for the current profile/state.
    #[error("invalid packet type discriminator 0x{discriminator:02X} for profile {profile_id:?}")]
    InvalidPacketType {
        discriminator: u8,
        profile_id: Option<u8>,
    },

    /// Invalid IP version nibble.
    #[error("invalid IP version: expected {expected}, got {got}")]
    InvalidIpVersion { expected: u8, got: u8 },

    /// Protocol in a header that the profile cannot carry.
    #[error("unsupported protocol {protocol_id} in {context}")]
    UnsupportedProtocol {
        protocol_id: u8,
        context: ParseContext,
    },

    /// CRC validation failed; data corruption or context mismatch.
    #[error("CRC mismatch: expected 0x{expected:X}, computed 0x{calculated:X} for {crc_type}")]
    CrcMismatch {
        expected: u8,
        calculated: u8,
        crc_type: CrcType,
    },

    /// LSB encoding or decoding misused or unresolvable.
    #[error("invalid LSB operation on '{field}': {description}")]
    InvalidLsbOperation { field: Field, description: String },

    /// A field carried a value outside its valid range.
    #[error("invalid value for '{field}' in {context}: expected {expected}, got {got}")]
    InvalidFieldValue {
        field: Field,
        context: ParseContext,
        expected: u32,
        got: u32,
    },

    /// Profile-specific parsing failure.
    #[error("profile 0x{profile_id:02X} parsing error: {description}")]
    ProfileSpecific {
        profile_id: u8,
        description: &'static str,
    },

    /// Packet's profile identifier does not match the decompression context's profile.
    #[error("invalid profile id 0x{0:02X} for decompression context")]
    InvalidProfileId(u8),
}

/// Errors raised while constructing ROHC packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RohcBuildingError {
    /// Caller-provided buffer is too small for the packet being built.
    #[error("output buffer too small: needed {needed} bytes, have {available} for {context}")]
    BufferTooSmall {
        needed: usize,
        available: usize,
        context: ParseContext,
    },

    /// Context lacks information required to build the packet.
    #[error("context insufficient for building: missing {field}")]
    ContextInsufficient { field: Field },

    /// Field value does not fit the on-wire encoding.
    #[error("value {value} for '{field}' exceeds the {max_bits}-bit field")]
    InvalidFieldValue {
        field: Field,
        value: u32,
        max_bits: u8,
    },
}

/// Errors raised by compression operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompressionError {
    /// Context not found for the given CID.
    #[error("compressor context {cid} not found")]
    ContextNotFound { cid: ContextId },

    /// No profile matched the packet and Uncompressed is disabled.
    #[error("packet matches no enabled profile")]
    NoMatchingProfile,

    /// Context table exhausted and eviction could not free a slot.
    #[error("context table full: {active} active contexts, max CID {max_cid}")]
    ContextTableFull { active: usize, max_cid: u16 },

    /// Packet building failed.
    #[error("packet building failed: {0}")]
    BuildingFailed(#[from] RohcBuildingError),
}

/// Errors raised by decompression operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompressionError {
    /// Non-IR packet received for an unknown CID; the packet is dropped and
    /// a STATIC-NACK is queued in bidirectional modes.
    #[error("no decompressor context for {cid}")]
    NoContext { cid: ContextId },

    /// Header CRC failed after decoding, repair (when enabled) included.
    #[error("CRC mismatch in context {cid}: expected 0x{expected:02X}, computed 0x{actual:02X}")]
    CrcMismatch {
        cid: ContextId,
        expected: u8,
        actual: u8,
    },

    /// Packet type not acceptable in the context's current state.
    #[error("packet type 0x{packet_type:02X} not acceptable for context {cid} in current state")]
    InvalidStateForPacket { cid: ContextId, packet_type: u8 },

    /// LSB decoding could not resolve a value.
    #[error("LSB decoding failed for {field} in context {cid}")]
    LsbDecodingFailed { cid: ContextId, field: Field },

    /// Segment reassembly exceeded the configured MRRU.
    #[error("reassembled segment length {got} exceeds MRRU {mrru}")]
    MrruExceeded { got: usize, mrru: usize },

    /// Packet parsing failed.
    #[error("packet parsing failed: {0}")]
    ParsingFailed(#[from] RohcParsingError),
}

/// Top-level error type unifying all ROHC failure modes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RohcError {
    /// Compression-side failure.
    #[error("compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Decompression-side failure.
    #[error("decompression error: {0}")]
    Decompression(#[from] DecompressionError),

    /// Parsing failure.
    #[error("parsing error: {0}")]
    Parsing(#[from] RohcParsingError),

    /// Building failure.
    #[error("building error: {0}")]
    Building(#[from] RohcBuildingError),

    /// IR carried a profile identifier with no registered handler.
    #[error("unsupported ROHC profile: 0x{0:02X}")]
    UnsupportedProfile(u8),

    /// Broken internal invariant (wrong context type for a handler).
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl RohcError {
    /// Whether this error is expected under packet loss or corruption and
    /// should be handled gracefully rather than treated as a defect.
    pub fn is_expected_with_packet_loss(&self) -> bool {
        matches!(
            self,
            RohcError::Parsing(RohcParsingError::CrcMismatch { .. })
                | RohcError::Decompression(DecompressionError::CrcMismatch { .. })
                | RohcError::Decompression(DecompressionError::NoContext { .. })
                | RohcError::Decompression(DecompressionError::InvalidStateForPacket { .. })
                | RohcError::Decompression(DecompressionError::LsbDecodingFailed { .. })
        )
    }
}
