//! Fabric error types.

use thiserror::Error;
use weft_core::Priority;

/// Failure to enqueue; the rejected value comes back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueError<T> {
    /// The ring is at capacity. Back-pressure signal: the higher layer
    /// decides whether to drop, spill, block, or surface it.
    Full(T),
    /// The fabric is shutting down; nothing further will be accepted.
    Closed(T),
}

impl<T> EnqueueError<T> {
    /// Recover the rejected value.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    /// Whether this is the capacity signal.
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Fabric-level errors.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Ring capacity must be a power of two of at least 2.
    #[error("invalid ring capacity {got}: must be a power of two >= 2")]
    InvalidCapacity {
        /// The rejected capacity.
        got: usize,
    },

    /// Spill storage is only configured for the Bulk class.
    #[error("spill-to-arena requested for {0}, only bulk may spill")]
    SpillNotBulk(Priority),

    /// The Emergency ring reported full. Fatal invariant violation: the
    /// process must flush audit and terminate.
    #[error("emergency ring full at capacity {capacity}")]
    EmergencyFull {
        /// Configured emergency ring capacity.
        capacity: usize,
    },

    /// A `BlockSender` wait elapsed without capacity freeing.
    #[error("ring {0} still full after back-pressure timeout")]
    WouldBlock(Priority),

    /// Enqueue attempted after shutdown.
    #[error("fabric closed")]
    Closed,
}

/// Result alias for fabric operations.
pub type FabricResult<T> = Result<T, FabricError>;
