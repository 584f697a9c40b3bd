//! Per-agent runtime host: inbox drain, handler dispatch, RPC bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, trace, warn};

use weft_audit::{AuditEvent, AuditKind};
use weft_core::{AgentId, Message, MsgFlags, MsgType, Permission, Priority};
use weft_envelope::ReplayGuard;
use weft_fabric::EnqueueOutcome;
use weft_router::{AgentEntry, AgentState, RouteError};

use crate::error::{RuntimeError, RuntimeResult};
use crate::fabric::FabricInner;
use crate::handler::MessageHandler;

/// What completes a pending RPC.
#[derive(Debug)]
pub(crate) enum RpcReply {
    /// The matching response or result.
    Message(Arc<Message>),
    /// The request could not be routed.
    NoRoute(AgentId),
}

/// Per-agent state shared between the handle, the drain task, and the
/// fabric (for shutdown and RPC completion).
pub(crate) struct AgentShared {
    pub(crate) id: AgentId,
    pub(crate) entry: Arc<AgentEntry>,
    pub(crate) pending: DashMap<u64, oneshot::Sender<RpcReply>>,
    /// Replay windows for everything this agent receives. Shared between
    /// the drain task and the workers' response-completion path.
    pub(crate) replay: Mutex<ReplayGuard>,
    corr: AtomicU64,
    cancelled: AtomicBool,
    drained: Notify,
}

impl AgentShared {
    pub(crate) fn new(id: AgentId, entry: Arc<AgentEntry>) -> Self {
        Self {
            id,
            entry,
            pending: DashMap::new(),
            replay: Mutex::new(ReplayGuard::new()),
            corr: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            drained: Notify::new(),
        }
    }

    fn next_correlation(&self) -> u64 {
        self.corr.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drop every pending RPC; waiting callers observe `Cancelled`.
    pub(crate) fn cancel_pending(&self) {
        self.pending.clear();
    }

    pub(crate) fn set_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// A registered agent that has not started yet: install handlers, then
/// [`InactiveAgent::start`].
pub struct InactiveAgent {
    handle: AgentHandle,
    handlers: Mutex<HashMap<u8, Arc<dyn MessageHandler>>>,
}

impl InactiveAgent {
    pub(crate) fn new(handle: AgentHandle) -> Self {
        Self {
            handle,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// The agent's id.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.handle.id()
    }

    /// Register the handler for one message type.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::HandlerExists`] when the type already has a handler.
    pub fn register_handler(
        &self,
        msg_type: MsgType,
        handler: impl MessageHandler + 'static,
    ) -> RuntimeResult<()> {
        let mut handlers = lock(&self.handlers);
        if handlers.contains_key(&msg_type.as_u8()) {
            return Err(RuntimeError::HandlerExists(msg_type));
        }
        handlers.insert(msg_type.as_u8(), Arc::new(handler));
        Ok(())
    }

    /// Transition to `Active` and spawn the inbox drain task.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ShuttingDown`] when the fabric is stopping.
    pub fn start(self) -> RuntimeResult<AgentHandle> {
        let fabric = Arc::clone(&self.handle.fabric);
        if fabric.is_shutting_down() {
            return Err(RuntimeError::ShuttingDown);
        }
        let handlers = std::mem::take(&mut *lock(&self.handlers));
        self.handle.shared.entry.set_state(AgentState::Active);
        let shared = Arc::clone(&self.handle.shared);
        let handle = self.handle.clone();
        tokio::spawn(drain_task(shared, fabric, handle, handlers));
        debug!(agent = %self.handle.id(), "agent active");
        Ok(self.handle)
    }
}

/// Cloneable capability to act as one agent: send, call, subscribe, stop.
#[derive(Clone)]
pub struct AgentHandle {
    pub(crate) shared: Arc<AgentShared>,
    pub(crate) fabric: Arc<FabricInner>,
}

impl AgentHandle {
    /// The agent's id.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.shared.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.shared.entry.state()
    }

    /// Cooperative cancellation flag for handlers; set during shutdown.
    /// Handlers should check it at natural yield points.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Stamp and enqueue one message with this agent as source.
    ///
    /// # Errors
    ///
    /// Authentication, authorization, back-pressure, and lifecycle errors.
    pub async fn send(&self, msg: Message) -> RuntimeResult<EnqueueOutcome> {
        self.ensure_can_send()?;
        let mut msg = msg;
        self.fabric.stamp_and_authorize(&mut msg, self.id())?;
        self.fabric.enqueue(msg).await
    }

    /// Stamp and enqueue a batch. Contiguous same-priority runs share one
    /// ring reservation, amortizing the enqueue CAS.
    ///
    /// # Errors
    ///
    /// As [`AgentHandle::send`]; on error, already-enqueued prefixes stay
    /// enqueued.
    pub async fn send_batch(&self, msgs: Vec<Message>) -> RuntimeResult<Vec<EnqueueOutcome>> {
        self.ensure_can_send()?;
        let mut stamped = Vec::with_capacity(msgs.len());
        for mut msg in msgs {
            self.fabric.stamp_and_authorize(&mut msg, self.id())?;
            stamped.push(msg);
        }
        let mut outcomes = Vec::with_capacity(stamped.len());
        let mut run: Vec<Message> = Vec::new();
        let mut run_class: Option<Priority> = None;
        for msg in stamped {
            match run_class {
                Some(class) if class == msg.priority() => run.push(msg),
                _ => {
                    self.flush_run(&mut run, run_class, &mut outcomes).await?;
                    run_class = Some(msg.priority());
                    run.push(msg);
                }
            }
        }
        self.flush_run(&mut run, run_class, &mut outcomes).await?;
        Ok(outcomes)
    }

    async fn flush_run(
        &self,
        run: &mut Vec<Message>,
        class: Option<Priority>,
        outcomes: &mut Vec<EnqueueOutcome>,
    ) -> RuntimeResult<()> {
        let Some(class) = class else {
            return Ok(());
        };
        if run.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(run);
        match self.fabric.rings.enqueue_batch(class, batch).await {
            Ok(batch_outcomes) => {
                outcomes.extend(batch_outcomes);
                Ok(())
            }
            Err(err @ weft_fabric::FabricError::EmergencyFull { .. }) => {
                self.fabric.audit.emit(
                    AuditEvent::new(AuditKind::EmergencyFull, self.id(), 0),
                );
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Issue an RPC: a `Request` with a fresh correlation id and
    /// `ReplyExpected`. Resolves with the response, or fails with
    /// `RpcTimeout`, `NoRoute`, or `Cancelled`.
    ///
    /// # Errors
    ///
    /// As [`AgentHandle::send`], plus the RPC failure modes above.
    pub async fn call(
        &self,
        target: AgentId,
        payload: Vec<u8>,
        priority: Priority,
        timeout: Duration,
    ) -> RuntimeResult<Arc<Message>> {
        self.call_inner(MsgType::Request, target, payload, priority, timeout)
            .await
    }

    /// Submit a work-queue `Task` to a coordinator and await its `Result`.
    ///
    /// # Errors
    ///
    /// As [`AgentHandle::call`].
    pub async fn submit_task(
        &self,
        coordinator: AgentId,
        payload: Vec<u8>,
        priority: Priority,
        timeout: Duration,
    ) -> RuntimeResult<Arc<Message>> {
        self.call_inner(MsgType::Task, coordinator, payload, priority, timeout)
            .await
    }

    async fn call_inner(
        &self,
        msg_type: MsgType,
        target: AgentId,
        payload: Vec<u8>,
        priority: Priority,
        timeout: Duration,
    ) -> RuntimeResult<Arc<Message>> {
        self.ensure_can_send()?;
        let correlation = self.shared.next_correlation();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(correlation, tx);

        let msg = Message::builder(msg_type, priority)
            .source(self.id())
            .target(target)
            .correlation_id(correlation)
            .reply_expected()
            .payload(payload)
            .build()?;

        if let Err(err) = self.send(msg).await {
            self.shared.pending.remove(&correlation);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(RpcReply::Message(response))) => Ok(response),
            Ok(Ok(RpcReply::NoRoute(target))) => {
                Err(RuntimeError::Route(RouteError::NoRoute { target }))
            }
            Ok(Err(_closed)) => Err(RuntimeError::Cancelled),
            Err(_elapsed) => {
                // Deadline passed: reap the entry so a late response is
                // recorded as an orphan rather than delivered.
                self.shared.pending.remove(&correlation);
                self.fabric.metrics.record_rpc_timeout();
                Err(RuntimeError::RpcTimeout {
                    target,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Broadcast to every registered agent except this one.
    ///
    /// # Errors
    ///
    /// As [`AgentHandle::send`].
    pub async fn broadcast(
        &self,
        priority: Priority,
        payload: Vec<u8>,
    ) -> RuntimeResult<EnqueueOutcome> {
        let msg = Message::builder(MsgType::Broadcast, priority)
            .source(self.id())
            .payload(payload)
            .build()?;
        self.send(msg).await
    }

    /// Publish an event on a topic.
    ///
    /// # Errors
    ///
    /// As [`AgentHandle::send`].
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        priority: Priority,
    ) -> RuntimeResult<EnqueueOutcome> {
        let msg = Message::builder(MsgType::Event, priority)
            .source(self.id())
            .topic(topic)
            .payload(payload)
            .build()?;
        self.send(msg).await
    }

    /// Subscribe this agent to a topic.
    pub fn subscribe(&self, topic: &str) {
        self.fabric.router.subscriptions().subscribe(topic, self.id());
    }

    /// Remove this agent's subscription to a topic.
    pub fn unsubscribe(&self, topic: &str) {
        self.fabric
            .router
            .subscriptions()
            .unsubscribe(topic, self.id());
    }

    /// Stop the agent: `Draining` until the inbox empties (bounded by the
    /// configured shutdown grace), then `Stopped`. Pending RPCs are
    /// cancelled.
    pub async fn stop(&self) {
        let entry = &self.shared.entry;
        if entry.state() == AgentState::Stopped {
            return;
        }
        self.shared.set_cancelled();
        entry.set_state(AgentState::Draining);
        let grace = self.fabric.config.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            // The drain task flips the state to Stopped once the inbox is
            // empty; re-check between notifications so a wakeup racing the
            // transition cannot be missed.
            while self.shared.entry.state() != AgentState::Stopped {
                let notified = self.shared.drained.notified();
                if self.shared.entry.state() == AgentState::Stopped {
                    break;
                }
                let _ = tokio::time::timeout(Duration::from_millis(10), notified).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(agent = %self.id(), "shutdown grace elapsed, forcing stop");
            entry.set_state(AgentState::Stopped);
        }
        self.shared.cancel_pending();
        self.fabric.router.subscriptions().unsubscribe_all(self.id());
        debug!(agent = %self.id(), "agent stopped");
    }

    fn ensure_can_send(&self) -> RuntimeResult<()> {
        if self.fabric.is_shutting_down() {
            return Err(RuntimeError::ShuttingDown);
        }
        if self.state() == AgentState::Stopped {
            return Err(RuntimeError::Stopped(self.id()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// The inbox drain loop: verify, then dispatch handlers one at a time.
///
/// Handlers run inline, so an agent observes its inbox strictly in
/// delivery order. A handler may await RPCs: responses are completed on
/// the consumer workers and never transit this inbox, so the await cannot
/// starve itself.
async fn drain_task(
    shared: Arc<AgentShared>,
    fabric: Arc<FabricInner>,
    handle: AgentHandle,
    handlers: HashMap<u8, Arc<dyn MessageHandler>>,
) {
    loop {
        let wake = shared.entry.wake().notified();
        let mut processed = 0usize;
        while let Some(msg) = shared.entry.inbox().try_dequeue() {
            processed += 1;
            process_inbound(&shared, &fabric, &handle, &handlers, msg).await;
        }
        match shared.entry.state() {
            AgentState::Stopped => break,
            AgentState::Draining => {
                if shared.entry.inbox().is_empty() {
                    shared.entry.set_state(AgentState::Stopped);
                    break;
                }
            }
            _ => {}
        }
        if processed == 0 {
            wake.await;
        }
    }
    shared.drained.notify_waiters();
    trace!(agent = %shared.id, "drain task exited");
}

async fn process_inbound(
    shared: &Arc<AgentShared>,
    fabric: &Arc<FabricInner>,
    handle: &AgentHandle,
    handlers: &HashMap<u8, Arc<dyn MessageHandler>>,
    msg: Arc<Message>,
) {
    {
        let mut replay = lock(&shared.replay);
        if let Err(err) = fabric.envelope.verify_inbound(&msg, &mut replay) {
            drop(replay);
            fabric.metrics.record_auth_failure();
            fabric.audit.emit(
                AuditEvent::new(auth_audit_kind(&err), msg.source(), msg.header().msg_id)
                    .with_target(shared.id)
                    .with_detail(err.to_string()),
            );
            return;
        }
    }

    let now = fabric.clock.now_ns();
    fabric
        .metrics
        .record_latency(msg.priority(), now.saturating_sub(msg.header().timestamp_ns));

    // A response or result reaching the inbox means no RPC was waiting for
    // it (the workers complete those directly); without a handler for the
    // type it is an orphan.
    let msg_type = msg.msg_type();
    let msg_id = msg.header().msg_id;
    let correlation_id = msg.header().correlation_id;
    if msg_type.requires_correlation() {
        if let Some((_, tx)) = shared.pending.remove(&correlation_id) {
            let _ = tx.send(RpcReply::Message(msg));
            return;
        }
        if !handlers.contains_key(&msg_type.as_u8()) {
            fabric.metrics.record_orphan_response();
            fabric.audit.emit(
                AuditEvent::new(AuditKind::OrphanResponse, msg.source(), msg_id)
                    .with_target(shared.id),
            );
            return;
        }
    }

    let Some(handler) = handlers.get(&msg_type.as_u8()) else {
        trace!(agent = %shared.id, msg_type = %msg_type, "no handler, message dropped");
        return;
    };

    let source = msg.source();
    let correlation = correlation_id;
    let reply_expected = msg.header().flags.contains(MsgFlags::REPLY_EXPECTED);
    let reply_type = match msg_type {
        MsgType::Task => MsgType::Result,
        _ => MsgType::Response,
    };
    let priority = msg.priority();

    match handler.handle(handle.clone(), msg).await {
        Ok(Some(reply)) if reply_expected && correlation != 0 => {
            // Replies ride the request's priority class unless the handler
            // sends an explicit downgrade itself.
            let response = Message::builder(reply_type, priority)
                .source(shared.id)
                .target(source)
                .correlation_id(correlation)
                .payload(reply)
                .build();
            match response {
                Ok(response) => {
                    if let Err(err) = handle.send(response).await {
                        debug!(agent = %shared.id, %err, "reply send failed");
                    }
                }
                Err(err) => debug!(agent = %shared.id, %err, "reply build failed"),
            }
        }
        Ok(_) => {}
        Err(failure) => {
            // Failures are isolated: audit and keep the agent active.
            fabric.audit.emit(
                AuditEvent::new(AuditKind::HandlerFailure, source, msg_id)
                    .with_target(shared.id)
                    .with_detail(failure.to_string()),
            );
            warn!(agent = %shared.id, %failure, "handler failure isolated");
        }
    }
}

pub(crate) fn auth_audit_kind(err: &weft_envelope::EnvelopeError) -> AuditKind {
    use weft_envelope::EnvelopeError;
    match err {
        EnvelopeError::BadMac { .. } => AuditKind::BadMac,
        EnvelopeError::UnknownSource(_) => AuditKind::UnknownSource,
        EnvelopeError::Revoked(_) => AuditKind::Revoked,
        EnvelopeError::ReplayDetected { .. } => AuditKind::ReplayDetected,
        EnvelopeError::PermissionDenied { .. } => AuditKind::PermissionDenied,
        EnvelopeError::Identity(_) => AuditKind::UnknownSource,
    }
}

/// Permission a message's send requires: emergency traffic is
/// administrative, task dispatch is execute, everything else is write.
pub(crate) fn required_permission(msg: &Message) -> Permission {
    if msg.priority() == Priority::Emergency {
        Permission::Admin
    } else if msg.msg_type() == MsgType::Task {
        Permission::Execute
    } else {
        Permission::Write
    }
}
