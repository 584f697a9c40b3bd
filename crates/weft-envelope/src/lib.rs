//! Weft Envelope - Per-message authentication for the agent fabric.
//!
//! Every message is stamped before enqueue and verified at its receiver:
//!
//! - [`AuthEnvelope::stamp`] assigns the per-source message id and monotonic
//!   timestamp, then computes a truncated HMAC-SHA-256 tag over the
//!   canonical form: the header with the tag field zeroed, followed by the
//!   payload, keyed by the source's session secret.
//! - [`AuthEnvelope::verify`] recomputes the tag and compares it in
//!   constant time.
//! - [`ReplayGuard`] tracks a sliding per-source window of accepted message
//!   ids; duplicates and ids below the window fail `ReplayDetected`.
//! - [`AuthEnvelope::authorize`] gates a message on the source's permission
//!   mask and resource scope.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod envelope;
mod error;
mod replay;

pub use envelope::AuthEnvelope;
pub use error::{EnvelopeError, EnvelopeResult};
pub use replay::{REPLAY_WINDOW, ReplayGuard, ReplayWindow};
