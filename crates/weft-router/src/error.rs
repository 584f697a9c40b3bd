//! Routing error types.

use thiserror::Error;
use weft_core::AgentId;

/// Routing failures surfaced to senders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The addressed target is unknown or stopped.
    #[error("no route to {target}")]
    NoRoute {
        /// The unroutable target.
        target: AgentId,
    },

    /// An event carried no parsable topic prefix.
    #[error("event from {sender} has no valid topic")]
    BadTopic {
        /// The sending agent.
        sender: AgentId,
    },
}

/// Result alias for routing operations.
pub type RouteResult<T> = Result<T, RouteError>;
