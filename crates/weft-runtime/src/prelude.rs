//! Convenience re-exports for fabric applications.
//!
//! ```
//! use weft_runtime::prelude::*;
//! ```

pub use weft_config::WeftConfig;
pub use weft_core::{AgentId, Message, MsgFlags, MsgType, Permission, PermissionSet, Priority, Role};
pub use weft_identity::MasterKey;

pub use crate::agent::{AgentHandle, InactiveAgent};
pub use crate::error::{RuntimeError, RuntimeResult};
pub use crate::fabric::Fabric;
pub use crate::handler::{FnHandler, HandlerFailure, HandlerOutcome, MessageHandler};
