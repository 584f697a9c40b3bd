//! Identity store error types.

use thiserror::Error;
use weft_core::AgentId;

/// Errors surfaced by the key and identity store.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The requested display name is already bound.
    #[error("agent name {0:?} already in use")]
    NameInUse(String),

    /// Every assignable agent id is taken.
    #[error("agent id space exhausted")]
    OutOfIds,

    /// No binding exists for the agent.
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// The binding exists but has been revoked.
    #[error("identity revoked for {0}")]
    IdentityRevoked(AgentId),

    /// Token expired.
    #[error("token expired at {expired_at}")]
    Expired {
        /// Unix seconds at which the token expired.
        expired_at: i64,
    },

    /// Token or record MAC did not verify.
    #[error("authentication code mismatch")]
    BadMac,

    /// Token structure could not be parsed.
    #[error("malformed token: {0}")]
    MalformedToken(&'static str),

    /// Invalid resource pattern supplied at registration.
    #[error("invalid resource pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The master key could not be loaded from the environment.
    #[error("master key unavailable: {0}")]
    MasterKeyMissing(String),

    /// Persisted binding state failed structural validation. Fatal at boot.
    #[error("malformed persisted state: {0}")]
    MalformedState(String),

    /// Display name failed core validation.
    #[error(transparent)]
    Name(#[from] weft_core::CoreError),

    /// I/O failure reading or writing the binding file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
