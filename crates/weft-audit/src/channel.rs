//! Bounded audit channel: fabric side never blocks.

use tokio::sync::mpsc;
use tracing::warn;

use crate::event::AuditEvent;

/// Default audit channel depth.
pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

/// Sending half, cloned into every fabric component that emits audit
/// events. Emission is fire-and-forget.
#[derive(Debug, Clone)]
pub struct AuditChannel {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditChannel {
    /// Create a channel with the default capacity.
    #[must_use]
    pub fn new() -> (Self, AuditReceiver) {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Create a channel with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, AuditReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, AuditReceiver { rx })
    }

    /// Emit an event. Never blocks; when the sink lags the event is logged
    /// here and dropped, keeping audit strictly out of the data path.
    pub fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let event = match err {
                mpsc::error::TrySendError::Full(event)
                | mpsc::error::TrySendError::Closed(event) => event,
            };
            warn!(
                kind = %event.kind,
                source = %event.source,
                msg_id = event.msg_id,
                "audit sink unavailable, event dropped"
            );
        }
    }
}

/// Receiving half, owned by the audit sink task.
#[derive(Debug)]
pub struct AuditReceiver {
    rx: mpsc::Receiver<AuditEvent>,
}

impl AuditReceiver {
    /// Receive the next event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<AuditEvent> {
        self.rx.recv().await
    }

    /// Drain whatever is immediately available.
    pub fn drain(&mut self) -> Vec<AuditEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditKind;
    use weft_core::AgentId;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let (tx, mut rx) = AuditChannel::new();
        tx.emit(AuditEvent::new(AuditKind::NoRoute, AgentId::new(1), 10));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, AuditKind::NoRoute);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (tx, mut rx) = AuditChannel::with_capacity(1);
        tx.emit(AuditEvent::new(AuditKind::BadMac, AgentId::new(1), 1));
        tx.emit(AuditEvent::new(AuditKind::BadMac, AgentId::new(1), 2));
        let drained = rx.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].msg_id, 1);
    }

    #[tokio::test]
    async fn test_drain_empty() {
        let (_tx, mut rx) = AuditChannel::new();
        assert!(rx.drain().is_empty());
    }
}
