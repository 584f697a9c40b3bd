//! The six priority rings, back-pressure policies, and the bulk spill tier.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, trace, warn};

use weft_core::{Message, Priority};
use weft_telemetry::FabricMetrics;

use crate::arena::{Arena, ArenaHandle};
use crate::error::{EnqueueError, FabricError, FabricResult};
use crate::ring::Ring;

/// Default ring capacity: 2^16 slots.
pub const DEFAULT_RING_CAPACITY: usize = 1 << 16;

/// Default spill arena capacity backing the Bulk class.
const DEFAULT_SPILL_CAPACITY: usize = 1 << 14;

/// What to do when a ring is at capacity.
///
/// The Emergency class has no policy: it never drops, and a full Emergency
/// ring is a fatal invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Evict the oldest queued message to admit the new one.
    DropOldest,
    /// Reject the new message.
    DropNewest,
    /// Wait for capacity, bounded by the timeout, then fail `WouldBlock`.
    BlockSender {
        /// Longest a sender may be parked.
        timeout: Duration,
    },
    /// Park overflow in the epoch-reclaimed arena. Bulk only: the spill
    /// tier is not cache-friendly and exists for throughput traffic.
    SpillToArena,
}

/// Per-ring configuration.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Slot count; must be a power of two.
    pub capacity: usize,
    /// Policy applied when the ring is full.
    pub policy: BackpressurePolicy,
}

/// Configuration for all six rings.
#[derive(Debug, Clone, Copy)]
pub struct RingSetup {
    /// One config per priority class, indexed by [`Priority::index`].
    pub rings: [RingConfig; Priority::COUNT],
    /// Spill arena capacity (messages) for the Bulk class.
    pub spill_capacity: usize,
}

impl Default for RingSetup {
    fn default() -> Self {
        let base = RingConfig {
            capacity: DEFAULT_RING_CAPACITY,
            policy: BackpressurePolicy::DropNewest,
        };
        let mut rings = [base; Priority::COUNT];
        // Emergency policy is never consulted; full is fatal.
        rings[Priority::Bulk.index()].policy = BackpressurePolicy::SpillToArena;
        Self {
            rings,
            spill_capacity: DEFAULT_SPILL_CAPACITY,
        }
    }
}

impl RingSetup {
    /// Validate capacities and policy placement.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` for non-power-of-two rings; `SpillNotBulk` when a
    /// non-bulk ring asks for the spill tier.
    pub fn validate(&self) -> FabricResult<()> {
        for class in Priority::ALL {
            let config = &self.rings[class.index()];
            if config.capacity < 2 || !config.capacity.is_power_of_two() {
                return Err(FabricError::InvalidCapacity {
                    got: config.capacity,
                });
            }
            if matches!(config.policy, BackpressurePolicy::SpillToArena)
                && class != Priority::Bulk
            {
                return Err(FabricError::SpillNotBulk(class));
            }
        }
        Ok(())
    }
}

/// How an accepted enqueue was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Went straight into the ring.
    Enqueued,
    /// Parked in the spill arena; will re-enter the ring as it drains.
    Spilled,
    /// Admitted by evicting the oldest queued message.
    EvictedOldest,
    /// Rejected under `DropNewest`; the message was counted and discarded.
    DroppedNewest,
}

/// The priority ring fabric: six rings plus the bulk spill tier.
pub struct PriorityRings {
    rings: [Ring<Message>; Priority::COUNT],
    policies: [BackpressurePolicy; Priority::COUNT],
    spill: Arena<Message>,
    spill_order: Mutex<VecDeque<ArenaHandle>>,
    space: [Notify; Priority::COUNT],
    arrivals: Notify,
    metrics: Arc<FabricMetrics>,
    closed: AtomicBool,
}

impl PriorityRings {
    /// Build the rings from a validated setup.
    ///
    /// # Errors
    ///
    /// Propagates [`RingSetup::validate`] failures.
    pub fn new(setup: &RingSetup, metrics: Arc<FabricMetrics>) -> FabricResult<Self> {
        setup.validate()?;
        let mut rings = Vec::with_capacity(Priority::COUNT);
        for class in Priority::ALL {
            rings.push(Ring::with_capacity(setup.rings[class.index()].capacity)?);
        }
        let rings: [Ring<Message>; Priority::COUNT] = rings
            .try_into()
            .map_err(|_| FabricError::InvalidCapacity { got: 0 })?;
        Ok(Self {
            rings,
            policies: Priority::ALL.map(|class| setup.rings[class.index()].policy),
            spill: Arena::with_capacity(setup.spill_capacity),
            spill_order: Mutex::new(VecDeque::new()),
            space: std::array::from_fn(|_| Notify::new()),
            arrivals: Notify::new(),
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Shared metrics surface.
    #[must_use]
    pub fn metrics(&self) -> &Arc<FabricMetrics> {
        &self.metrics
    }

    /// Wakeup signal for consumer workers: notified on every accepted
    /// enqueue and on close.
    #[must_use]
    pub fn arrivals(&self) -> &Notify {
        &self.arrivals
    }

    /// Enqueue one message on its priority's ring, applying that ring's
    /// back-pressure policy when full.
    ///
    /// # Errors
    ///
    /// - [`FabricError::EmergencyFull`]: the Emergency ring was full. Fatal.
    /// - [`FabricError::WouldBlock`]: `BlockSender` timed out.
    /// - [`FabricError::Closed`]: the fabric is shutting down.
    pub async fn enqueue(&self, msg: Message) -> FabricResult<EnqueueOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FabricError::Closed);
        }
        let class = msg.priority();
        let ring = &self.rings[class.index()];

        // Once the spill tier holds messages, later bulk traffic must
        // follow them through it or per-source FIFO breaks.
        if class == Priority::Bulk
            && matches!(self.policies[class.index()], BackpressurePolicy::SpillToArena)
            && !self.lock_spill_order().is_empty()
        {
            return self.spill_message(msg);
        }

        match ring.try_enqueue(msg) {
            Ok(()) => {
                self.record_enqueue(class);
                Ok(EnqueueOutcome::Enqueued)
            }
            Err(EnqueueError::Full(msg)) => self.handle_full(class, msg).await,
            Err(EnqueueError::Closed(_)) => Err(FabricError::Closed),
        }
    }

    /// Enqueue a batch of same-priority messages with one ring reservation.
    /// The caller guarantees all messages share `class`; when the span does
    /// not fit, the batch falls back to per-message enqueue so back-pressure
    /// policy still applies.
    ///
    /// # Errors
    ///
    /// As [`PriorityRings::enqueue`].
    pub async fn enqueue_batch(
        &self,
        class: Priority,
        batch: Vec<Message>,
    ) -> FabricResult<Vec<EnqueueOutcome>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FabricError::Closed);
        }
        let n = batch.len();
        let spill_active = class == Priority::Bulk && !self.lock_spill_order().is_empty();
        if !spill_active {
            match self.rings[class.index()].try_enqueue_batch(batch) {
                Ok(()) => {
                    for _ in 0..n {
                        self.record_enqueue(class);
                    }
                    return Ok(vec![EnqueueOutcome::Enqueued; n]);
                }
                Err(EnqueueError::Full(batch) | EnqueueError::Closed(batch)) => {
                    return self.enqueue_batch_slow(batch).await;
                }
            }
        }
        self.enqueue_batch_slow(batch).await
    }

    async fn enqueue_batch_slow(
        &self,
        batch: Vec<Message>,
    ) -> FabricResult<Vec<EnqueueOutcome>> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for msg in batch {
            outcomes.push(Box::pin(self.enqueue(msg)).await?);
        }
        Ok(outcomes)
    }

    /// Dequeue one message from `class`. For Bulk, spilled messages are
    /// pulled back into the ring first so spill order is preserved.
    #[must_use]
    pub fn try_dequeue(&self, class: Priority) -> Option<Message> {
        if class == Priority::Bulk {
            self.refill_from_spill();
        }
        let msg = self.rings[class.index()].try_dequeue()?;
        self.metrics.record_dequeue(class);
        self.space[class.index()].notify_one();
        Some(msg)
    }

    /// Approximate occupancy of one ring.
    #[must_use]
    pub fn len(&self, class: Priority) -> usize {
        self.rings[class.index()].len()
    }

    /// Whether every ring and the spill tier are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Priority::ALL.iter().all(|class| self.len(*class) == 0)
            && self.lock_spill_order().is_empty()
    }

    /// Configured capacity of one ring.
    #[must_use]
    pub fn capacity(&self, class: Priority) -> usize {
        self.rings[class.index()].capacity()
    }

    /// Refuse further enqueues. In-flight messages remain drainable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for notify in &self.space {
            notify.notify_waiters();
        }
        self.arrivals.notify_waiters();
    }

    async fn handle_full(&self, class: Priority, msg: Message) -> FabricResult<EnqueueOutcome> {
        if class == Priority::Emergency {
            let capacity = self.capacity(class);
            error!(capacity, "emergency ring full: fatal invariant violation");
            return Err(FabricError::EmergencyFull { capacity });
        }
        match self.policies[class.index()] {
            BackpressurePolicy::DropOldest => {
                let mut msg = msg;
                loop {
                    if let Some(evicted) = self.rings[class.index()].try_dequeue() {
                        self.metrics.record_drop(class);
                        trace!(class = %class, evicted = evicted.header().msg_id, "evicted oldest");
                    }
                    match self.rings[class.index()].try_enqueue(msg) {
                        Ok(()) => {
                            self.record_enqueue(class);
                            return Ok(EnqueueOutcome::EvictedOldest);
                        }
                        Err(EnqueueError::Full(back)) => msg = back,
                        Err(EnqueueError::Closed(_)) => return Err(FabricError::Closed),
                    }
                }
            }
            BackpressurePolicy::DropNewest => {
                self.metrics.record_drop(class);
                trace!(class = %class, "dropped newest under back-pressure");
                Ok(EnqueueOutcome::DroppedNewest)
            }
            BackpressurePolicy::BlockSender { timeout } => {
                let deadline = tokio::time::Instant::now() + timeout;
                let mut msg = msg;
                loop {
                    let wait = self.space[class.index()].notified();
                    match self.rings[class.index()].try_enqueue(msg) {
                        Ok(()) => {
                            self.record_enqueue(class);
                            return Ok(EnqueueOutcome::Enqueued);
                        }
                        Err(EnqueueError::Full(back)) => msg = back,
                        Err(EnqueueError::Closed(_)) => return Err(FabricError::Closed),
                    }
                    if self.closed.load(Ordering::Acquire) {
                        return Err(FabricError::Closed);
                    }
                    if tokio::time::timeout_at(deadline, wait).await.is_err() {
                        return Err(FabricError::WouldBlock(class));
                    }
                }
            }
            BackpressurePolicy::SpillToArena => self.spill_message(msg),
        }
    }

    fn spill_message(&self, msg: Message) -> FabricResult<EnqueueOutcome> {
        let class = msg.priority();
        match self.spill.insert(msg) {
            Ok(handle) => {
                self.lock_spill_order().push_back(handle);
                self.record_enqueue(class);
                Ok(EnqueueOutcome::Spilled)
            }
            Err(_dropped) => {
                // Spill tier exhausted too; bulk traffic is droppable.
                self.metrics.record_drop(class);
                warn!(class = %class, "spill arena full, dropping newest");
                Ok(EnqueueOutcome::DroppedNewest)
            }
        }
    }

    fn refill_from_spill(&self) {
        let mut order = self.lock_spill_order();
        while let Some(&handle) = order.front() {
            let Some(msg) = self.spill.take(handle) else {
                order.pop_front();
                continue;
            };
            match self.rings[Priority::Bulk.index()].try_enqueue(msg) {
                Ok(()) => {
                    order.pop_front();
                }
                Err(EnqueueError::Full(msg) | EnqueueError::Closed(msg)) => {
                    // Ring still full; put the message back where it was.
                    if let Ok(handle_again) = self.spill.insert(msg) {
                        order[0] = handle_again;
                    } else {
                        order.pop_front();
                        self.metrics.record_drop(Priority::Bulk);
                    }
                    break;
                }
            }
        }
        drop(order);
        self.spill.reclaim();
    }

    fn record_enqueue(&self, class: Priority) {
        self.metrics
            .record_enqueue(class, self.rings[class.index()].len() as u64);
        self.arrivals.notify_one();
    }

    fn lock_spill_order(&self) -> std::sync::MutexGuard<'_, VecDeque<ArenaHandle>> {
        self.spill_order
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PriorityRings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("PriorityRings");
        for class in Priority::ALL {
            s.field(class.to_string().as_str(), &self.len(class));
        }
        s.finish()
    }
}
