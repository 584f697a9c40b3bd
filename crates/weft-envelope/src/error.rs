//! Envelope error types.

use thiserror::Error;
use weft_core::AgentId;
use weft_identity::IdentityError;

/// Per-message authentication and authorization failures.
///
/// These are per-message outcomes: the message is dropped and an audit
/// event emitted; the fabric itself never stalls on them.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The header's source has no identity binding.
    #[error("unknown source {0}")]
    UnknownSource(AgentId),

    /// The source's binding has been revoked.
    #[error("identity revoked for source {0}")]
    Revoked(AgentId),

    /// Recomputed authentication tag did not match.
    #[error("authentication tag mismatch from {sender} (msg {msg_id})")]
    BadMac {
        /// Claimed source.
        sender: AgentId,
        /// Claimed message id.
        msg_id: u64,
    },

    /// Message id already accepted, or below the replay window.
    #[error("replay detected from {sender} (msg {msg_id})")]
    ReplayDetected {
        /// Claimed source.
        sender: AgentId,
        /// The replayed message id.
        msg_id: u64,
    },

    /// The source lacks the required permission for the resource.
    #[error("permission denied: {sender} lacks {permission} on {resource:?}")]
    PermissionDenied {
        /// The agent that failed the check.
        sender: AgentId,
        /// The permission that was required.
        permission: weft_core::Permission,
        /// The resource being gated, when one was named.
        resource: Option<String>,
    },

    /// Underlying identity store failure not covered above.
    #[error(transparent)]
    Identity(IdentityError),
}

/// Result alias for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

impl EnvelopeError {
    /// Collapse an identity error into the envelope taxonomy for `source`.
    #[must_use]
    pub fn from_identity(err: IdentityError, source: AgentId) -> Self {
        match err {
            IdentityError::UnknownAgent(id) => Self::UnknownSource(id),
            IdentityError::IdentityRevoked(id) => Self::Revoked(id),
            other => Self::Identity(other),
        }
    }

    /// Short stable name for audit records and counters.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownSource(_) => "unknown_source",
            Self::Revoked(_) => "revoked",
            Self::BadMac { .. } => "bad_mac",
            Self::ReplayDetected { .. } => "replay_detected",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Identity(_) => "identity",
        }
    }
}
