//! Weft Runtime - The agent runtime host (ARH) and fabric assembly.
//!
//! The [`Fabric`] is the single top-level value owning the identity store,
//! the authentication envelope, the priority rings, the router, metrics,
//! and the audit channel; there is no process-global state. Agents are
//! registered against it and interact through an [`AgentHandle`]:
//!
//! ```no_run
//! use std::time::Duration;
//! use weft_config::WeftConfig;
//! use weft_core::{MsgType, Priority, Role};
//! use weft_identity::MasterKey;
//! use weft_runtime::{Fabric, FnHandler};
//!
//! # async fn demo() -> Result<(), weft_runtime::RuntimeError> {
//! let fabric = Fabric::start(WeftConfig::for_tests(), MasterKey::generate())?;
//!
//! let pong = fabric.register_agent("pong", Role::Agent)?;
//! pong.register_handler(
//!     MsgType::Request,
//!     FnHandler::new(|_agent, _msg| async move { Ok(Some(b"pong".to_vec())) }),
//! )?;
//! let pong = pong.start()?;
//!
//! let ping = fabric.register_agent("ping", Role::Agent)?.start()?;
//! let reply = ping
//!     .call(pong.id(), b"ping".to_vec(), Priority::High, Duration::from_millis(50))
//!     .await?;
//! assert_eq!(reply.payload(), b"pong");
//! # fabric.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Scheduling model: the fabric spawns one consumer worker task per
//! configured worker; each runs the drain scheduler and feeds the router.
//! Handlers run on their agent's cooperative drain task and may suspend
//! only on fabric primitives (RPC futures, back-pressure waits, shutdown
//! drain).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod agent;
mod control;
mod error;
mod fabric;
mod handler;
mod workqueue;

pub use agent::{AgentHandle, InactiveAgent};
pub use control::{ControlReply, ControlRequest, install_control_agent};
pub use error::{RuntimeError, RuntimeResult};
pub use fabric::Fabric;
pub use handler::{FnHandler, HandlerFailure, HandlerOutcome, MessageHandler};
pub use workqueue::{DispatchPolicy, WorkQueueCoordinator};
