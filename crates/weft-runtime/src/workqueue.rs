//! Work-queue coordination: policy-driven task distribution.
//!
//! The fabric itself is stateless about work queues: a sender emits a
//! `Task` to a coordinator agent, the coordinator forwards a derived task
//! to a worker it picks, and the worker's `Result` flows back through the
//! coordinator to the original sender under the original correlation id.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::debug;

use weft_core::{AgentId, Priority};

use crate::agent::{AgentHandle, InactiveAgent};
use crate::error::RuntimeResult;
use crate::handler::{FnHandler, HandlerFailure};

/// How the coordinator picks a worker for each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Cycle through workers in order.
    RoundRobin,
    /// Pick the worker with the fewest tasks in flight.
    LeastLoaded,
    /// Hash the task payload so equal keys land on the same worker.
    ShardByKey,
}

/// Coordinator state: the worker pool and the balancing policy.
pub struct WorkQueueCoordinator {
    workers: Vec<AgentId>,
    policy: DispatchPolicy,
    next: AtomicUsize,
    in_flight: Vec<AtomicUsize>,
    task_timeout: Duration,
}

impl WorkQueueCoordinator {
    /// Create a coordinator over a non-empty worker pool.
    #[must_use]
    pub fn new(workers: Vec<AgentId>, policy: DispatchPolicy) -> Arc<Self> {
        let in_flight = workers.iter().map(|_| AtomicUsize::new(0)).collect();
        Arc::new(Self {
            workers,
            policy,
            next: AtomicUsize::new(0),
            in_flight,
            task_timeout: Duration::from_secs(30),
        })
    }

    /// Install the coordination handler on a not-yet-started agent.
    ///
    /// # Errors
    ///
    /// [`crate::RuntimeError::HandlerExists`] when a `Task` handler is
    /// already present.
    pub fn install(self: &Arc<Self>, agent: &InactiveAgent) -> RuntimeResult<()> {
        let coordinator = Arc::clone(self);
        agent.register_handler(
            weft_core::MsgType::Task,
            FnHandler::new(move |agent: AgentHandle, msg| {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    let payload = msg.payload().to_vec();
                    let priority = msg.priority();
                    let (index, worker) = coordinator.pick(&payload);
                    coordinator.in_flight[index].fetch_add(1, Ordering::Relaxed);
                    debug!(worker = %worker, "task dispatched");
                    let outcome = agent
                        .submit_task(worker, payload, priority, coordinator.task_timeout)
                        .await;
                    coordinator.in_flight[index].fetch_sub(1, Ordering::Relaxed);
                    match outcome {
                        // The worker's result bytes become the Result sent
                        // back under the sender's original correlation id.
                        Ok(result) => Ok(Some(result.payload().to_vec())),
                        Err(err) => Err(HandlerFailure::new(err)),
                    }
                }
            }),
        )
    }

    fn pick(&self, payload: &[u8]) -> (usize, AgentId) {
        debug_assert!(!self.workers.is_empty());
        let index = match self.policy {
            DispatchPolicy::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len()
            }
            DispatchPolicy::LeastLoaded => self
                .in_flight
                .iter()
                .enumerate()
                .min_by_key(|(_, load)| load.load(Ordering::Relaxed))
                .map_or(0, |(index, _)| index),
            DispatchPolicy::ShardByKey => {
                let mut hasher = DefaultHasher::new();
                payload.hash(&mut hasher);
                (hasher.finish() as usize) % self.workers.len()
            }
        };
        (index, self.workers[index])
    }
}

impl std::fmt::Debug for WorkQueueCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueueCoordinator")
            .field("workers", &self.workers.len())
            .field("policy", &self.policy)
            .finish()
    }
}
