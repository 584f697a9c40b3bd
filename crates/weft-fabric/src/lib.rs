//! Weft Fabric - The priority ring fabric (PRF).
//!
//! Six bounded lock-free rings, one per [`weft_core::Priority`] class, each
//! a Vyukov-style array queue with per-slot sequence counters and
//! cache-line-isolated head and tail. On top of the rings sit:
//!
//! - per-ring back-pressure policies (`DropOldest`, `DropNewest`,
//!   `BlockSender`, `SpillToArena`),
//! - an epoch-reclaimed arena backing the bulk spill tier,
//! - the drain scheduler, which visits classes highest-first under
//!   per-class quanta so lower classes cannot starve.
//!
//! Ordering guarantee: FIFO within a (source, class) pair. No ordering
//! across sources or classes. The Emergency class never drops; a full
//! Emergency ring is a fatal invariant violation surfaced as
//! [`FabricError::EmergencyFull`].

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod arena;
mod error;
mod ring;
mod rings;
mod scheduler;

pub use arena::{Arena, ArenaHandle, EpochGuard};
pub use error::{EnqueueError, FabricError, FabricResult};
pub use ring::Ring;
pub use rings::{
    BackpressurePolicy, DEFAULT_RING_CAPACITY, EnqueueOutcome, PriorityRings, RingConfig,
    RingSetup,
};
pub use scheduler::{DEFAULT_QUANTA, DrainScheduler, Quanta};
