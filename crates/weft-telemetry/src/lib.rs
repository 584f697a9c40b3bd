//! Weft Telemetry - Fabric counters, latency histograms, and logging setup.
//!
//! The fabric publishes per-class counters (enqueued, dequeued, dropped),
//! auth-failure and RPC-timeout counters, ring occupancy high-water marks,
//! and per-class end-to-end latency histograms. [`FabricMetrics`] is the
//! shared recording surface; [`MetricsSnapshot`] is the serializable view
//! returned by the `DumpMetrics` control operation.
//!
//! Export to any external telemetry system is the metrics sink agent's
//! business, not this crate's.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;
mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, setup_logging};
pub use metrics::{ClassSnapshot, FabricMetrics, MetricsSnapshot};
