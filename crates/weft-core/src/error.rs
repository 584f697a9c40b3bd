//! Core error types.

use thiserror::Error;

/// Errors produced while building, encoding, or decoding messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Header magic did not match the wire constant.
    #[error("bad header magic: expected {expected:#010x}, got {found:#010x}")]
    BadMagic {
        /// The required magic value.
        expected: u32,
        /// The value found on the wire.
        found: u32,
    },

    /// Header carried an unsupported protocol version.
    #[error("unsupported wire version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// The version found on the wire.
        found: u8,
        /// The version this build speaks.
        supported: u8,
    },

    /// Priority byte outside 0..=5.
    #[error("invalid priority class {0}")]
    InvalidPriority(u8),

    /// Unknown message type discriminant.
    #[error("invalid message type {0}")]
    InvalidMsgType(u8),

    /// Payload exceeds the per-message cap.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Actual payload length.
        len: usize,
        /// Maximum permitted length.
        max: usize,
    },

    /// Input shorter than the fixed header.
    #[error("truncated header: {len} bytes, need {need}")]
    TruncatedHeader {
        /// Bytes available.
        len: usize,
        /// Bytes required.
        need: usize,
    },

    /// Payload shorter than the header's `payload_len` claims.
    #[error("truncated payload: header claims {expected} bytes, {actual} present")]
    TruncatedPayload {
        /// Length claimed by the header.
        expected: usize,
        /// Length actually present.
        actual: usize,
    },

    /// A non-broadcast message was built or decoded with no targets.
    #[error("message type {0} requires at least one target")]
    MissingTargets(&'static str),

    /// Correlation id inconsistent with the message type and flags.
    #[error("correlation id {correlation_id} invalid for message type {msg_type}")]
    InvalidCorrelation {
        /// The offending correlation id.
        correlation_id: u64,
        /// The message type it appeared on.
        msg_type: &'static str,
    },

    /// Agent display name exceeds 31 bytes.
    #[error("agent name of {len} bytes exceeds maximum of 31")]
    NameTooLong {
        /// Byte length of the rejected name.
        len: usize,
    },

    /// Topic prefix missing, over-long, or not valid UTF-8.
    #[error("invalid topic prefix: {0}")]
    InvalidTopic(&'static str),

    /// Fragment metadata inconsistent (zero total, index out of range).
    #[error("invalid fragment metadata: fragment {index} of {total}")]
    InvalidFragment {
        /// Fragment index carried in the metadata.
        index: u16,
        /// Total fragment count carried in the metadata.
        total: u16,
    },

    /// Externalized target list shorter than `target_count` claims.
    #[error("externalized target list truncated: need {need} bytes, {have} present")]
    TruncatedTargets {
        /// Bytes required for the declared target count.
        need: usize,
        /// Bytes actually present in the payload prefix.
        have: usize,
    },
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
