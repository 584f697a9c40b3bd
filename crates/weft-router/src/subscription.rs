//! The subscription table: exact topic → subscriber set.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use weft_core::AgentId;

/// Copy-on-write topic subscriptions.
///
/// Matching is exact-string today; wildcard topics are an extension point
/// and would slot in as a second, pattern-keyed table consulted after the
/// exact map.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    inner: RwLock<Arc<HashMap<String, BTreeSet<AgentId>>>>,
}

impl SubscriptionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an agent to a topic. Idempotent.
    pub fn subscribe(&self, topic: &str, subscriber: AgentId) {
        let mut guard = self.write();
        let mut map = HashMap::clone(&guard);
        map.entry(topic.to_string()).or_default().insert(subscriber);
        *guard = Arc::new(map);
    }

    /// Remove one subscription. Idempotent; empty topics are pruned.
    pub fn unsubscribe(&self, topic: &str, subscriber: AgentId) {
        let mut guard = self.write();
        let mut map = HashMap::clone(&guard);
        if let Some(set) = map.get_mut(topic) {
            set.remove(&subscriber);
            if set.is_empty() {
                map.remove(topic);
            }
        }
        *guard = Arc::new(map);
    }

    /// Remove every subscription held by an agent (on stop).
    pub fn unsubscribe_all(&self, subscriber: AgentId) {
        let mut guard = self.write();
        let mut map = HashMap::clone(&guard);
        map.retain(|_, set| {
            set.remove(&subscriber);
            !set.is_empty()
        });
        *guard = Arc::new(map);
    }

    /// Snapshot the subscribers of a topic at dispatch time.
    #[must_use]
    pub fn subscribers(&self, topic: &str) -> Vec<AgentId> {
        self.snapshot()
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Total number of live topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<HashMap<String, BTreeSet<AgentId>>> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, Arc<HashMap<String, BTreeSet<AgentId>>>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
