//! The agent registry: id → inbox, lifecycle state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Notify;

use weft_core::{AgentId, Message};
use weft_fabric::Ring;

/// Default inbox ring capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 1 << 10;

/// Agent lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AgentState {
    /// Registered, handlers still being installed; not yet routable.
    Starting = 0,
    /// Routable.
    Active = 1,
    /// Shutting down; still accepts messages while its inbox drains.
    Draining = 2,
    /// Terminal; routing to it is `NoRoute`.
    Stopped = 3,
}

impl AgentState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Active,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    /// Whether messages may still be delivered in this state.
    #[must_use]
    pub fn accepts_delivery(self) -> bool {
        matches!(self, Self::Active | Self::Draining)
    }
}

/// One registered agent: its inbox ring, wakeup handle, and state.
///
/// The inbox is SPMC with a single consumer, the agent's drain task; the
/// state cell lets lifecycle transitions publish without rebuilding the
/// registry map.
#[derive(Debug)]
pub struct AgentEntry {
    id: AgentId,
    inbox: Ring<Arc<Message>>,
    wake: Notify,
    state: AtomicU8,
}

impl AgentEntry {
    /// Create an entry in `Starting` state.
    ///
    /// # Errors
    ///
    /// Propagates ring-capacity validation.
    pub fn new(id: AgentId, inbox_capacity: usize) -> weft_fabric::FabricResult<Self> {
        Ok(Self {
            id,
            inbox: Ring::with_capacity(inbox_capacity)?,
            wake: Notify::new(),
            state: AtomicU8::new(AgentState::Starting as u8),
        })
    }

    /// The agent this entry belongs to.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// The inbox ring.
    #[must_use]
    pub fn inbox(&self) -> &Ring<Arc<Message>> {
        &self.inbox
    }

    /// Notify handle waking the agent's drain task.
    #[must_use]
    pub fn wake(&self) -> &Notify {
        &self.wake
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Publish a lifecycle transition.
    pub fn set_state(&self, state: AgentState) {
        self.state.store(state as u8, Ordering::Release);
        // A draining agent must wake to notice the transition.
        self.wake.notify_waiters();
    }
}

/// Copy-on-write registry of live agents.
///
/// Single writer (registration and lifecycle are control-plane), wait-free
/// readers: consumer fibers clone the snapshot `Arc` and fan out against
/// it without holding any lock.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    inner: RwLock<Arc<HashMap<AgentId, Arc<AgentEntry>>>>,
}

impl AgentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any previous entry for the id.
    pub fn insert(&self, entry: Arc<AgentEntry>) {
        let mut guard = self.write();
        let mut map = HashMap::clone(&guard);
        map.insert(entry.id(), entry);
        *guard = Arc::new(map);
    }

    /// Remove an entry entirely (after `Stopped`).
    pub fn remove(&self, id: AgentId) {
        let mut guard = self.write();
        let mut map = HashMap::clone(&guard);
        map.remove(&id);
        *guard = Arc::new(map);
    }

    /// Look up one agent in the current snapshot.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<Arc<AgentEntry>> {
        self.snapshot().get(&id).cloned()
    }

    /// The current snapshot; stable for the caller's lifetime of the `Arc`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HashMap<AgentId, Arc<AgentEntry>>> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arc<HashMap<AgentId, Arc<AgentEntry>>>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
