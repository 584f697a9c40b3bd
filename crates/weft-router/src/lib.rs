//! Weft Router - The router and pattern engine (RPE).
//!
//! Consumer workers hand dequeued messages to the [`Router`], which
//! resolves recipients per addressing pattern and fans message handles out
//! into per-agent inboxes:
//!
//! - **Direct**: one target; unknown or stopped targets are `NoRoute`,
//!   returned to the sender.
//! - **Multicast**: inline (≤ 4) or externalized target list; per-target
//!   failures are audited without aborting the rest.
//! - **Broadcast**: every registered agent except the source, against a
//!   registry snapshot taken at dispatch time.
//! - **Pub/Sub**: events are matched by exact topic against the
//!   subscription table, snapshotted per dispatch.
//! - **RPC and work-queue** traffic routes as direct messages; correlation
//!   bookkeeping lives with the agent runtime.
//!
//! The registry and subscription table are copy-on-write: one writer swaps
//! an `Arc`'d map, readers clone the `Arc` and never block.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod dispatch;
mod error;
mod registry;
mod subscription;

pub use dispatch::{Router, RouteOutcome};
pub use error::{RouteError, RouteResult};
pub use registry::{AgentEntry, AgentRegistry, AgentState, DEFAULT_INBOX_CAPACITY};
pub use subscription::SubscriptionTable;
