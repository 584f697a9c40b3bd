//! Fabric counters and per-class latency histograms.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use weft_core::Priority;

/// Latency histogram bounds: 100 ns to 10 s, three significant figures.
const LATENCY_LOW_NS: u64 = 100;
const LATENCY_HIGH_NS: u64 = 10_000_000_000;
const LATENCY_SIGFIGS: u8 = 3;

#[derive(Debug, Default)]
struct ClassCounters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
    occupancy_high_water: AtomicU64,
}

/// Shared recording surface for the whole fabric.
///
/// Counters are relaxed atomics; the latency histograms sit behind a
/// mutex taken only on the consumer side, never on enqueue.
pub struct FabricMetrics {
    classes: [ClassCounters; Priority::COUNT],
    latency: [Mutex<Histogram<u64>>; Priority::COUNT],
    auth_failures: AtomicU64,
    rpc_timeouts: AtomicU64,
    no_route: AtomicU64,
    orphan_responses: AtomicU64,
}

impl FabricMetrics {
    /// Create zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            classes: std::array::from_fn(|_| ClassCounters::default()),
            latency: std::array::from_fn(|_| {
                Mutex::new(
                    Histogram::new_with_bounds(LATENCY_LOW_NS, LATENCY_HIGH_NS, LATENCY_SIGFIGS)
                        .expect("static histogram bounds are valid"),
                )
            }),
            auth_failures: AtomicU64::new(0),
            rpc_timeouts: AtomicU64::new(0),
            no_route: AtomicU64::new(0),
            orphan_responses: AtomicU64::new(0),
        }
    }

    /// Record one enqueue into `class`, with the ring occupancy after it.
    pub fn record_enqueue(&self, class: Priority, occupancy: u64) {
        let counters = &self.classes[class.index()];
        counters.enqueued.fetch_add(1, Ordering::Relaxed);
        counters
            .occupancy_high_water
            .fetch_max(occupancy, Ordering::Relaxed);
    }

    /// Record one dequeue from `class`.
    pub fn record_dequeue(&self, class: Priority) {
        self.classes[class.index()]
            .dequeued
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dropped message in `class`.
    pub fn record_drop(&self, class: Priority) {
        self.classes[class.index()]
            .dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an end-to-end latency sample for `class`.
    pub fn record_latency(&self, class: Priority, nanos: u64) {
        if let Ok(mut hist) = self.latency[class.index()].lock() {
            // Saturating: out-of-range samples land on the bound.
            let _ = hist.record(nanos.clamp(LATENCY_LOW_NS, LATENCY_HIGH_NS));
        }
    }

    /// Count one authentication or authorization failure.
    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one RPC deadline expiry.
    pub fn record_rpc_timeout(&self) {
        self.rpc_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one unroutable message.
    pub fn record_no_route(&self) {
        self.no_route.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one response that arrived after its caller gave up.
    pub fn record_orphan_response(&self) {
        self.orphan_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Dropped-message count for one class.
    #[must_use]
    pub fn dropped(&self, class: Priority) -> u64 {
        self.classes[class.index()].dropped.load(Ordering::Relaxed)
    }

    /// Occupancy high-water mark for one class.
    #[must_use]
    pub fn occupancy_high_water(&self, class: Priority) -> u64 {
        self.classes[class.index()]
            .occupancy_high_water
            .load(Ordering::Relaxed)
    }

    /// Take a serializable snapshot of every counter and histogram.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let classes = Priority::ALL.map(|class| {
            let counters = &self.classes[class.index()];
            let (p50_ns, p99_ns, max_ns, samples) = self.latency[class.index()]
                .lock()
                .map(|hist| {
                    (
                        hist.value_at_quantile(0.50),
                        hist.value_at_quantile(0.99),
                        hist.max(),
                        hist.len(),
                    )
                })
                .unwrap_or((0, 0, 0, 0));
            ClassSnapshot {
                class,
                enqueued: counters.enqueued.load(Ordering::Relaxed),
                dequeued: counters.dequeued.load(Ordering::Relaxed),
                dropped: counters.dropped.load(Ordering::Relaxed),
                occupancy_high_water: counters.occupancy_high_water.load(Ordering::Relaxed),
                p50_ns,
                p99_ns,
                max_ns,
                samples,
            }
        });
        MetricsSnapshot {
            classes: classes.to_vec(),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            rpc_timeouts: self.rpc_timeouts.load(Ordering::Relaxed),
            no_route: self.no_route.load(Ordering::Relaxed),
            orphan_responses: self.orphan_responses.load(Ordering::Relaxed),
        }
    }
}

impl Default for FabricMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FabricMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricMetrics").finish_non_exhaustive()
    }
}

/// Per-class slice of a [`MetricsSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSnapshot {
    /// The priority class.
    pub class: Priority,
    /// Messages accepted into the ring.
    pub enqueued: u64,
    /// Messages handed to consumers.
    pub dequeued: u64,
    /// Messages dropped by back-pressure policy.
    pub dropped: u64,
    /// Highest ring occupancy observed.
    pub occupancy_high_water: u64,
    /// Median end-to-end latency in nanoseconds.
    pub p50_ns: u64,
    /// 99th percentile end-to-end latency in nanoseconds.
    pub p99_ns: u64,
    /// Worst observed latency in nanoseconds.
    pub max_ns: u64,
    /// Number of recorded latency samples.
    pub samples: u64,
}

/// Serializable view of the fabric's counters, as returned by the
/// `DumpMetrics` control operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// One entry per priority class, highest first.
    pub classes: Vec<ClassSnapshot>,
    /// Authentication and authorization failures.
    pub auth_failures: u64,
    /// RPC deadline expiries.
    pub rpc_timeouts: u64,
    /// Unroutable messages.
    pub no_route: u64,
    /// Responses that arrived after their caller gave up.
    pub orphan_responses: u64,
}
