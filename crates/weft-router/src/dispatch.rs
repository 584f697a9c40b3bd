//! Pattern resolution and inbox fan-out.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use weft_audit::{AuditChannel, AuditEvent, AuditKind};
use weft_core::{AgentId, Message, MsgType};
use weft_telemetry::FabricMetrics;

use crate::error::{RouteError, RouteResult};
use crate::registry::{AgentEntry, AgentRegistry};
use crate::subscription::SubscriptionTable;

/// How a dispatch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to this many inboxes. Broadcast and pub/sub may
    /// legitimately deliver to zero.
    Delivered(usize),
}

impl RouteOutcome {
    /// Number of inboxes reached.
    #[must_use]
    pub fn count(self) -> usize {
        match self {
            Self::Delivered(n) => n,
        }
    }
}

/// The router: owns the agent registry and subscription table, resolves
/// each message's recipients, and fans out shared handles.
#[derive(Debug)]
pub struct Router {
    registry: AgentRegistry,
    subscriptions: SubscriptionTable,
    audit: AuditChannel,
    metrics: Arc<FabricMetrics>,
}

impl Router {
    /// Create a router.
    #[must_use]
    pub fn new(audit: AuditChannel, metrics: Arc<FabricMetrics>) -> Self {
        Self {
            registry: AgentRegistry::new(),
            subscriptions: SubscriptionTable::new(),
            audit,
            metrics,
        }
    }

    /// The agent registry.
    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// The subscription table.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Resolve recipients and fan out. The message is consumed into a
    /// shared handle; fan-out copies the handle, never the bytes.
    ///
    /// # Errors
    ///
    /// [`RouteError::NoRoute`] for a direct send to an unknown or stopped
    /// target (multicast and fan-out failures are audited, not returned);
    /// [`RouteError::BadTopic`] for an event without a parsable topic.
    pub fn dispatch(&self, msg: Message) -> RouteResult<RouteOutcome> {
        let msg = Arc::new(msg);
        match msg.msg_type() {
            MsgType::Broadcast => Ok(self.dispatch_broadcast(&msg)),
            MsgType::Event => self.dispatch_event(&msg),
            _ => self.dispatch_targets(&msg),
        }
    }

    fn dispatch_broadcast(&self, msg: &Arc<Message>) -> RouteOutcome {
        // Registry snapshot taken once; fan-out never holds a lock.
        let snapshot = self.registry.snapshot();
        let mut delivered = 0usize;
        for (id, entry) in snapshot.iter() {
            if *id == msg.source() {
                continue;
            }
            if self.deliver(entry, msg) {
                delivered += 1;
            }
        }
        trace!(source = %msg.source(), delivered, "broadcast fan-out");
        RouteOutcome::Delivered(delivered)
    }

    fn dispatch_event(&self, msg: &Arc<Message>) -> RouteResult<RouteOutcome> {
        let Ok(topic) = msg.topic() else {
            warn!(source = %msg.source(), "event without topic dropped");
            return Err(RouteError::BadTopic {
                sender: msg.source(),
            });
        };
        let subscribers = self.subscriptions.subscribers(topic);
        let snapshot = self.registry.snapshot();
        let mut delivered = 0usize;
        for subscriber in subscribers {
            match snapshot.get(&subscriber) {
                Some(entry) => {
                    if self.deliver(entry, msg) {
                        delivered += 1;
                    }
                }
                None => self.note_no_route(msg, subscriber),
            }
        }
        trace!(source = %msg.source(), topic, delivered, "event fan-out");
        Ok(RouteOutcome::Delivered(delivered))
    }

    fn dispatch_targets(&self, msg: &Arc<Message>) -> RouteResult<RouteOutcome> {
        let targets = msg.targets().map_err(|_| RouteError::NoRoute {
            target: msg.source(),
        })?;
        let direct = targets.len() == 1;
        let snapshot = self.registry.snapshot();
        let mut delivered = 0usize;
        for &target in targets.iter() {
            let routable = snapshot
                .get(&target)
                .filter(|entry| entry.state().accepts_delivery());
            match routable {
                Some(entry) => {
                    if self.deliver(entry, msg) {
                        delivered += 1;
                    }
                }
                None => {
                    self.note_no_route(msg, target);
                    if direct {
                        // Direct sends report the failure to the sender;
                        // multicast keeps going for the other targets.
                        return Err(RouteError::NoRoute { target });
                    }
                }
            }
        }
        Ok(RouteOutcome::Delivered(delivered))
    }

    /// Push a handle into one inbox; false when the entry refuses delivery
    /// or its inbox is full.
    fn deliver(&self, entry: &Arc<AgentEntry>, msg: &Arc<Message>) -> bool {
        if !entry.state().accepts_delivery() {
            return false;
        }
        match entry.inbox().try_enqueue(Arc::clone(msg)) {
            Ok(()) => {
                entry.wake().notify_one();
                true
            }
            Err(_) => {
                self.metrics.record_drop(msg.priority());
                self.audit.emit(
                    AuditEvent::new(AuditKind::InboxFull, msg.source(), msg.header().msg_id)
                        .with_target(entry.id()),
                );
                debug!(target = %entry.id(), "inbox full, delivery dropped");
                false
            }
        }
    }

    fn note_no_route(&self, msg: &Arc<Message>, target: AgentId) {
        self.metrics.record_no_route();
        self.audit.emit(
            AuditEvent::new(AuditKind::NoRoute, msg.source(), msg.header().msg_id)
                .with_target(target),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::Priority;

    use crate::registry::AgentState;

    fn router() -> Router {
        let (audit, _rx) = AuditChannel::new();
        Router::new(audit, Arc::new(FabricMetrics::new()))
    }

    fn activate(router: &Router, id: u16) -> Arc<AgentEntry> {
        let entry = Arc::new(AgentEntry::new(AgentId::new(id), 16).unwrap());
        entry.set_state(AgentState::Active);
        router.registry().insert(Arc::clone(&entry));
        entry
    }

    fn direct(source: u16, target: u16) -> Message {
        Message::builder(MsgType::Request, Priority::High)
            .source(AgentId::new(source))
            .target(AgentId::new(target))
            .payload(b"hi".to_vec())
            .build()
            .unwrap()
    }

    #[test]
    fn test_direct_delivery() {
        let router = router();
        activate(&router, 1);
        let target = activate(&router, 2);

        let outcome = router.dispatch(direct(1, 2)).unwrap();
        assert_eq!(outcome.count(), 1);
        let received = target.inbox().try_dequeue().unwrap();
        assert_eq!(received.payload(), b"hi");
    }

    #[test]
    fn test_direct_unknown_target_is_no_route() {
        let router = router();
        activate(&router, 1);
        assert_eq!(
            router.dispatch(direct(1, 99)),
            Err(RouteError::NoRoute {
                target: AgentId::new(99)
            })
        );
    }

    #[test]
    fn test_stopped_target_is_no_route() {
        let router = router();
        activate(&router, 1);
        let target = activate(&router, 2);
        target.set_state(AgentState::Stopped);
        assert!(router.dispatch(direct(1, 2)).is_err());
    }

    #[test]
    fn test_draining_target_still_accepts() {
        let router = router();
        activate(&router, 1);
        let target = activate(&router, 2);
        target.set_state(AgentState::Draining);
        assert_eq!(router.dispatch(direct(1, 2)).unwrap().count(), 1);
    }

    #[test]
    fn test_multicast_partial_failure_continues() {
        let router = router();
        activate(&router, 1);
        let alive = activate(&router, 2);
        // Target 3 was never registered.
        let msg = Message::builder(MsgType::Task, Priority::Medium)
            .source(AgentId::new(1))
            .targets([AgentId::new(2), AgentId::new(3)])
            .payload(b"work".to_vec())
            .build()
            .unwrap();

        let outcome = router.dispatch(msg).unwrap();
        assert_eq!(outcome.count(), 1);
        assert!(alive.inbox().try_dequeue().is_some());
    }

    #[test]
    fn test_broadcast_excludes_source() {
        let router = router();
        let source = activate(&router, 1);
        let others: Vec<_> = (2..=9).map(|id| activate(&router, id)).collect();

        let msg = Message::builder(MsgType::Broadcast, Priority::Emergency)
            .source(AgentId::new(1))
            .payload(b"shutdown".to_vec())
            .build()
            .unwrap();
        let outcome = router.dispatch(msg).unwrap();
        assert_eq!(outcome.count(), 8);
        assert!(source.inbox().try_dequeue().is_none());
        for other in &others {
            assert_eq!(other.inbox().try_dequeue().unwrap().payload(), b"shutdown");
            assert!(other.inbox().try_dequeue().is_none());
        }
    }

    #[test]
    fn test_event_routes_by_topic() {
        let router = router();
        activate(&router, 1);
        let s1 = activate(&router, 2);
        let s2 = activate(&router, 3);
        let bystander = activate(&router, 4);
        router.subscriptions().subscribe("metrics.cpu", AgentId::new(2));
        router.subscriptions().subscribe("metrics.cpu", AgentId::new(3));
        router.subscriptions().subscribe("metrics.mem", AgentId::new(4));

        let msg = Message::builder(MsgType::Event, Priority::Low)
            .source(AgentId::new(1))
            .topic("metrics.cpu")
            .payload(b"97".to_vec())
            .build()
            .unwrap();
        let outcome = router.dispatch(msg).unwrap();
        assert_eq!(outcome.count(), 2);
        assert_eq!(s1.inbox().try_dequeue().unwrap().topic().unwrap(), "metrics.cpu");
        assert!(s2.inbox().try_dequeue().is_some());
        assert!(bystander.inbox().try_dequeue().is_none());
    }

    #[test]
    fn test_event_without_subscribers_delivers_zero() {
        let router = router();
        activate(&router, 1);
        let msg = Message::builder(MsgType::Event, Priority::Low)
            .source(AgentId::new(1))
            .topic("nobody.listens")
            .build()
            .unwrap();
        assert_eq!(router.dispatch(msg).unwrap().count(), 0);
    }

    #[test]
    fn test_inbox_full_drops_and_counts() {
        let (audit, mut audit_rx) = AuditChannel::new();
        let metrics = Arc::new(FabricMetrics::new());
        let router = Router::new(audit, Arc::clone(&metrics));
        activate(&router, 1);
        let entry = Arc::new(AgentEntry::new(AgentId::new(2), 2).unwrap());
        entry.set_state(AgentState::Active);
        router.registry().insert(Arc::clone(&entry));

        for _ in 0..2 {
            router.dispatch(direct(1, 2)).unwrap();
        }
        let outcome = router.dispatch(direct(1, 2)).unwrap();
        assert_eq!(outcome.count(), 0);
        assert_eq!(metrics.dropped(Priority::High), 1);
        let events = audit_rx.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::InboxFull);
    }

    #[test]
    fn test_no_duplicate_to_same_direct_target() {
        let router = router();
        activate(&router, 1);
        let target = activate(&router, 2);
        router.dispatch(direct(1, 2)).unwrap();
        assert!(target.inbox().try_dequeue().is_some());
        assert!(target.inbox().try_dequeue().is_none());
    }
}
