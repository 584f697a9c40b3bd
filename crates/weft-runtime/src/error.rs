//! Runtime error types.

use thiserror::Error;
use weft_core::{AgentId, MsgType};

/// Errors surfaced by the agent runtime host.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Message construction failed core validation.
    #[error(transparent)]
    Core(#[from] weft_core::CoreError),

    /// Identity store failure (registration, revocation, tokens).
    #[error(transparent)]
    Identity(#[from] weft_identity::IdentityError),

    /// Per-message authentication or authorization failure.
    #[error(transparent)]
    Envelope(#[from] weft_envelope::EnvelopeError),

    /// Ring fabric failure (back-pressure, invariant violations).
    #[error(transparent)]
    Fabric(#[from] weft_fabric::FabricError),

    /// Routing failure returned to a direct sender.
    #[error(transparent)]
    Route(#[from] weft_router::RouteError),

    /// Configuration rejected at boot.
    #[error(transparent)]
    Config(#[from] weft_config::ConfigError),

    /// A handler is already registered for the message type.
    #[error("handler already registered for {0}")]
    HandlerExists(MsgType),

    /// Handlers must be installed before the agent starts.
    #[error("agent {0} is already active")]
    AlreadyActive(AgentId),

    /// The agent has been stopped and can no longer send.
    #[error("agent {0} is stopped")]
    Stopped(AgentId),

    /// No response arrived before the RPC deadline.
    #[error("rpc to {target} timed out after {timeout_ms} ms")]
    RpcTimeout {
        /// The callee.
        target: AgentId,
        /// The configured deadline.
        timeout_ms: u64,
    },

    /// The RPC was cancelled (caller dropped it, or shutdown).
    #[error("rpc cancelled")]
    Cancelled,

    /// The fabric is shutting down.
    #[error("fabric shutting down")]
    ShuttingDown,

    /// A control payload failed to parse.
    #[error("malformed control payload: {0}")]
    MalformedControl(String),
}

/// Result alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
