//! Weft Audit - Out-of-band audit events for the agent fabric.
//!
//! Every security-relevant per-message failure (bad MAC, replay, permission
//! denial, unroutable target, orphaned response) is recorded as an
//! [`AuditEvent`] and pushed through a bounded channel to the configured
//! sink. Audit traffic never re-enters the fabric's data path and never
//! blocks it: when the channel is full the event is logged and dropped.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod channel;
mod event;

pub use channel::{AuditChannel, AuditReceiver, DEFAULT_AUDIT_CAPACITY};
pub use event::{AuditEvent, AuditKind};
