//! Weft Core - Message model and wire codec for the agent fabric.
//!
//! This crate provides:
//! - Identity and capability primitives (`AgentId`, `Role`, `PermissionSet`)
//! - The fixed 64-byte message header and its bit-exact little-endian codec
//! - Message construction, target addressing, and topic extraction
//! - Fragmentation of oversized payloads and bounded reassembly
//! - The fabric's monotonic nanosecond clock
//!
//! # Example
//!
//! ```
//! use weft_core::{AgentId, Message, MsgType, Priority};
//!
//! let msg = Message::builder(MsgType::Request, Priority::High)
//!     .source(AgentId::new(10))
//!     .target(AgentId::new(20))
//!     .payload(b"ping".to_vec())
//!     .build()
//!     .unwrap();
//!
//! let bytes = msg.encode();
//! let decoded = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded.payload(), b"ping");
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod clock;
mod error;
mod fragment;
mod header;
mod message;
mod types;

pub use clock::MonotonicClock;
pub use error::{CoreError, CoreResult};
pub use fragment::{FragmentMeta, Reassembler, fragment_payload};
pub use header::{
    HEADER_LEN, MAGIC, MAX_INLINE_TARGETS, MAX_PAYLOAD_LEN, MessageHeader, VERSION,
};
pub use message::{Message, MessageBuilder, TOPIC_MAX_LEN};
pub use types::{AgentId, AgentName, MsgFlags, MsgType, Permission, PermissionSet, Priority, Role};
