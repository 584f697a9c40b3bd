//! The fabric: one value owning identity, rings, routing, and workers.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use weft_audit::{AuditChannel, AuditEvent, AuditKind, AuditReceiver};
use weft_config::WeftConfig;
use weft_core::{AgentId, Message, MonotonicClock, MsgFlags, MsgType, Priority, Role};
use weft_envelope::AuthEnvelope;
use weft_fabric::{DrainScheduler, EnqueueOutcome, FabricError, PriorityRings, Quanta};
use weft_identity::{IdentityStore, MasterKey, ResourcePattern};
use weft_router::{AgentEntry, DEFAULT_INBOX_CAPACITY, RouteError, Router};
use weft_telemetry::{FabricMetrics, MetricsSnapshot};

use crate::agent::{AgentHandle, AgentShared, InactiveAgent, RpcReply, required_permission};
use crate::error::{RuntimeError, RuntimeResult};

/// Shared fabric state, owned by the [`Fabric`] value. There is no
/// process-global state anywhere in the runtime.
pub(crate) struct FabricInner {
    pub(crate) config: WeftConfig,
    pub(crate) identities: Arc<IdentityStore>,
    pub(crate) envelope: AuthEnvelope,
    pub(crate) rings: Arc<PriorityRings>,
    pub(crate) router: Arc<Router>,
    pub(crate) metrics: Arc<FabricMetrics>,
    pub(crate) audit: AuditChannel,
    pub(crate) clock: MonotonicClock,
    pub(crate) agents: DashMap<AgentId, Arc<AgentShared>>,
    quanta: Quanta,
    shutting_down: AtomicBool,
    shutdown_flag: AtomicBool,
    shutdown_notify: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
    fatal: AtomicBool,
}

impl FabricInner {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Whether a fatal invariant violation was observed.
    pub(crate) fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }

    /// Enqueue through the rings, escalating an Emergency-full result to a
    /// fatal: audit, mark, and request process shutdown.
    pub(crate) async fn enqueue(&self, msg: Message) -> RuntimeResult<EnqueueOutcome> {
        let source = msg.source();
        let msg_id = msg.header().msg_id;
        match self.rings.enqueue(msg).await {
            Ok(outcome) => Ok(outcome),
            Err(err @ FabricError::EmergencyFull { .. }) => {
                self.fatal.store(true, Ordering::Release);
                self.audit
                    .emit(AuditEvent::new(AuditKind::EmergencyFull, source, msg_id));
                self.request_shutdown();
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stamp, then authorize under the permission the message requires.
    pub(crate) fn stamp_and_authorize(
        &self,
        msg: &mut Message,
        source: AgentId,
    ) -> RuntimeResult<()> {
        self.envelope.stamp(msg, source)?;
        let permission = required_permission(msg);
        let topic = msg.topic().ok().map(str::to_string);
        self.envelope
            .authorize(msg, permission, topic.as_deref())
            .inspect_err(|err| {
                self.metrics.record_auth_failure();
                self.audit.emit(
                    AuditEvent::new(AuditKind::PermissionDenied, source, msg.header().msg_id)
                        .with_detail(err.to_string()),
                );
            })?;
        Ok(())
    }
}

/// The assembled fabric. Construct with [`Fabric::start`], register
/// agents, and [`Fabric::shutdown`] when done.
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Fabric {
    /// Validate the config, build every component, and spawn the consumer
    /// workers and the audit sink task.
    ///
    /// # Errors
    ///
    /// Configuration and persisted-state errors; all fatal at boot.
    pub fn start(config: WeftConfig, master: MasterKey) -> RuntimeResult<Self> {
        config.validate()?;
        let identities = match &config.fabric.bindings_path {
            Some(path) => Arc::new(IdentityStore::with_persistence(master, path)?),
            None => Arc::new(IdentityStore::new(master)),
        };
        let clock = MonotonicClock::new();
        let metrics = Arc::new(FabricMetrics::new());
        let (audit, audit_rx) = AuditChannel::new();
        let rings = Arc::new(PriorityRings::new(&config.ring_setup(), Arc::clone(&metrics))?);
        let router = Arc::new(Router::new(audit.clone(), Arc::clone(&metrics)));
        let envelope = AuthEnvelope::new(Arc::clone(&identities), clock);

        let inner = Arc::new(FabricInner {
            quanta: config.quanta(),
            config,
            identities,
            envelope,
            rings,
            router,
            metrics,
            audit,
            clock,
            agents: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            shutdown_flag: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            workers: Mutex::new(Vec::new()),
            fatal: AtomicBool::new(false),
        });

        let worker_count = inner.config.workers();
        {
            let mut workers = lock(&inner.workers);
            for index in 0..worker_count {
                workers.push(tokio::spawn(worker_loop(Arc::clone(&inner), index)));
            }
            workers.push(tokio::spawn(audit_sink_loop(Arc::clone(&inner), audit_rx)));
        }
        info!(workers = worker_count, "fabric started");
        Ok(Self { inner })
    }

    /// Register an agent with the identity store and the router, returning
    /// it in `Starting` state for handler installation.
    ///
    /// # Errors
    ///
    /// Identity errors (`NameInUse`, `OutOfIds`) and lifecycle errors.
    pub fn register_agent(
        &self,
        name: impl Into<String>,
        role: Role,
    ) -> RuntimeResult<InactiveAgent> {
        self.register_inner(name.into(), role, None, false)
    }

    /// Register an agent scoped to a resource subtree.
    ///
    /// # Errors
    ///
    /// As [`Fabric::register_agent`].
    pub fn register_agent_scoped(
        &self,
        name: impl Into<String>,
        role: Role,
        scope: ResourcePattern,
    ) -> RuntimeResult<InactiveAgent> {
        self.register_inner(name.into(), role, Some(scope), false)
    }

    /// Register the administrative endpoint (agent id 0).
    ///
    /// # Errors
    ///
    /// As [`Fabric::register_agent`].
    pub fn register_admin(&self, name: impl Into<String>) -> RuntimeResult<InactiveAgent> {
        self.register_inner(name.into(), Role::Admin, None, true)
    }

    fn register_inner(
        &self,
        name: String,
        role: Role,
        scope: Option<ResourcePattern>,
        admin: bool,
    ) -> RuntimeResult<InactiveAgent> {
        if self.inner.is_shutting_down() {
            return Err(RuntimeError::ShuttingDown);
        }
        let (id, _secret) = match (admin, scope) {
            (true, _) => self.inner.identities.register_admin(name)?,
            (false, Some(scope)) => self.inner.identities.register_scoped(name, role, scope)?,
            (false, None) => self.inner.identities.register(name, role)?,
        };
        let entry = Arc::new(AgentEntry::new(id, DEFAULT_INBOX_CAPACITY)?);
        self.inner.router.registry().insert(Arc::clone(&entry));
        let shared = Arc::new(AgentShared::new(id, entry));
        self.inner.agents.insert(id, Arc::clone(&shared));
        let handle = AgentHandle {
            shared,
            fabric: Arc::clone(&self.inner),
        };
        Ok(InactiveAgent::new(handle))
    }

    /// The identity store, for token issuance and admin operations.
    #[must_use]
    pub fn identities(&self) -> &Arc<IdentityStore> {
        &self.inner.identities
    }

    /// A snapshot of every fabric counter and histogram.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Whether a fatal invariant violation (Emergency ring full) occurred.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.inner.is_fatal()
    }

    /// Resolve when a `Shutdown` control message (or a fatal invariant)
    /// requests termination. Sticky: resolves immediately if the request
    /// already happened.
    pub async fn shutdown_requested(&self) {
        while !self.inner.shutdown_flag.load(Ordering::Acquire) {
            let notified = self.inner.shutdown_notify.notified();
            if self.inner.shutdown_flag.load(Ordering::Acquire) {
                break;
            }
            let _ = tokio::time::timeout(Duration::from_millis(50), notified).await;
        }
    }

    /// Stop everything: refuse new sends, drain agents under the grace
    /// bound, cancel pending RPCs, and join the workers.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("fabric shutting down");

        // Stop producers first so the rings can only drain, then cancel
        // pending RPCs so handlers parked on a response that can no longer
        // arrive resolve with Cancelled instead of eating the grace bound.
        self.inner.rings.close();
        for entry in self.inner.agents.iter() {
            entry.value().cancel_pending();
        }

        let handles: Vec<AgentHandle> = self
            .inner
            .agents
            .iter()
            .map(|entry| AgentHandle {
                shared: Arc::clone(entry.value()),
                fabric: Arc::clone(&self.inner),
            })
            .collect();
        for handle in &handles {
            handle.stop().await;
        }

        let workers = std::mem::take(&mut *lock(&self.inner.workers));
        for mut worker in workers {
            // The audit sink parks on its channel; anything still running
            // after the drain deadline is torn down.
            if tokio::time::timeout(Duration::from_secs(1), &mut worker)
                .await
                .is_err()
            {
                worker.abort();
            }
        }
        info!("fabric stopped");
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("agents", &self.inner.agents.len())
            .field("shutting_down", &self.inner.is_shutting_down())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// One consumer worker: run scheduler rounds, park on the arrival signal
/// when idle, exit once the fabric is closed and drained.
async fn worker_loop(inner: Arc<FabricInner>, index: usize) {
    let scheduler = DrainScheduler::new(Arc::clone(&inner.rings), inner.quanta);
    debug!(worker = index, "consumer worker running");
    loop {
        let arrivals = inner.rings.arrivals().notified();
        let drained = scheduler.drain_round(&mut |msg| route_one(&inner, msg));
        if drained > 0 {
            // Stay hot while traffic flows; cooperative yield keeps other
            // tasks on this core serviced.
            tokio::task::yield_now().await;
            continue;
        }
        if inner.is_shutting_down() && inner.rings.is_empty() {
            break;
        }
        // Park until traffic arrives; the timeout re-checks shutdown in
        // case the close signal raced the registration.
        let _ = tokio::time::timeout(Duration::from_millis(50), arrivals).await;
    }
    debug!(worker = index, "consumer worker exited");
}

/// Route one dequeued message, reporting direct failures back to the
/// sender's RPC waker where one exists.
fn route_one(inner: &Arc<FabricInner>, msg: Message) {
    // Responses and results with a waiting caller complete here, on the
    // worker, without transiting the caller's inbox: a handler awaiting an
    // RPC therefore cannot starve its own drain task.
    if msg.msg_type().requires_correlation() && complete_rpc(inner, &msg) {
        return;
    }

    let source = msg.source();
    let correlation_id = msg.header().correlation_id;
    let reply_expected = msg.header().flags.contains(MsgFlags::REPLY_EXPECTED);

    match inner.router.dispatch(msg) {
        Ok(_outcome) => {}
        Err(RouteError::NoRoute { target }) => {
            // A waiting caller learns immediately instead of timing out.
            if reply_expected && correlation_id != 0 {
                if let Some(agent) = inner.agents.get(&source) {
                    if let Some((_, tx)) = agent.pending.remove(&correlation_id) {
                        let _ = tx.send(RpcReply::NoRoute(target));
                    }
                }
            }
        }
        Err(RouteError::BadTopic { sender }) => {
            debug!(source = %sender, "event with bad topic dropped at dispatch");
        }
    }
}

/// Try to complete a pending RPC with this response. Returns true when the
/// message was consumed (delivered, or dropped after failing verification).
fn complete_rpc(inner: &Arc<FabricInner>, msg: &Message) -> bool {
    let Ok(targets) = msg.targets() else {
        return false;
    };
    let [target] = targets.as_ref() else {
        return false;
    };
    let Some(agent) = inner.agents.get(target) else {
        return false;
    };
    let correlation_id = msg.header().correlation_id;
    if !agent.pending.contains_key(&correlation_id) {
        // No waiting caller (likely already timed out); the normal inbox
        // path will record it as an orphan.
        return false;
    }

    let verified = {
        let mut replay = agent
            .replay
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.envelope.verify_inbound(msg, &mut replay)
    };
    if let Err(err) = verified {
        inner.metrics.record_auth_failure();
        inner.audit.emit(
            AuditEvent::new(
                crate::agent::auth_audit_kind(&err),
                msg.source(),
                msg.header().msg_id,
            )
            .with_target(*target)
            .with_detail(err.to_string()),
        );
        return true;
    }

    inner.metrics.record_latency(
        msg.priority(),
        inner
            .clock
            .now_ns()
            .saturating_sub(msg.header().timestamp_ns),
    );
    if let Some((_, tx)) = agent.pending.remove(&correlation_id) {
        let _ = tx.send(RpcReply::Message(Arc::new(msg.clone())));
    }
    true
}

/// Forward audit events to the configured sink agent, or log them.
async fn audit_sink_loop(inner: Arc<FabricInner>, mut rx: AuditReceiver) {
    let sink = inner.config.fabric.audit_sink.map(AgentId::new);
    while let Some(event) = rx.recv().await {
        if event.kind == AuditKind::EmergencyFull {
            inner.fatal.store(true, Ordering::Release);
            error!("emergency ring full: fatal invariant violation");
            inner.request_shutdown();
        }
        match sink.and_then(|id| inner.router.registry().get(id)) {
            Some(entry) if entry.state().accepts_delivery() => {
                // Audit rides out-of-band: straight into the sink's inbox,
                // never back through the rings.
                let Ok(payload) = serde_json::to_vec(&event) else {
                    continue;
                };
                let msg = Message::builder(MsgType::Event, Priority::Low)
                    .source(AgentId::ADMIN)
                    .topic("audit")
                    .payload(payload)
                    .build();
                if let Ok(mut msg) = msg {
                    if inner.envelope.stamp(&mut msg, AgentId::ADMIN).is_ok()
                        && entry.inbox().try_enqueue(Arc::new(msg)).is_ok()
                    {
                        entry.wake().notify_one();
                        continue;
                    }
                }
                warn!(kind = %event.kind, "audit sink delivery failed, logging instead");
            }
            _ => {
                warn!(
                    kind = %event.kind,
                    source = %event.source,
                    msg_id = event.msg_id,
                    "audit event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use weft_identity::IdentityError;

    fn test_fabric() -> Fabric {
        Fabric::start(WeftConfig::for_tests(), MasterKey::generate()).expect("fabric starts")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_register_rejects_duplicate_names() {
        let fabric = test_fabric();
        fabric.register_agent("alpha", Role::Agent).unwrap();
        assert!(matches!(
            fabric.register_agent("alpha", Role::Agent),
            Err(RuntimeError::Identity(IdentityError::NameInUse(_)))
        ));
        fabric.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_requires_write_permission() {
        let fabric = test_fabric();
        let target = fabric.register_agent("sink", Role::Agent).unwrap().start().unwrap();
        let guest = fabric
            .register_agent("visitor", Role::Guest)
            .unwrap()
            .start()
            .unwrap();
        let msg = Message::builder(weft_core::MsgType::Request, Priority::Medium)
            .source(guest.id())
            .target(target.id())
            .payload(b"hi".to_vec())
            .build()
            .unwrap();
        assert!(matches!(
            guest.send(msg).await,
            Err(RuntimeError::Envelope(
                weft_envelope::EnvelopeError::PermissionDenied { .. }
            ))
        ));
        fabric.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_emergency_priority_requires_admin() {
        let fabric = test_fabric();
        let worker = fabric
            .register_agent("worker", Role::Agent)
            .unwrap()
            .start()
            .unwrap();
        let err = worker.broadcast(Priority::Emergency, b"halt".to_vec()).await;
        assert!(matches!(
            err,
            Err(RuntimeError::Envelope(
                weft_envelope::EnvelopeError::PermissionDenied { .. }
            ))
        ));
        fabric.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_is_idempotent_and_blocks_sends() {
        let fabric = test_fabric();
        let agent = fabric
            .register_agent("alpha", Role::Agent)
            .unwrap()
            .start()
            .unwrap();
        fabric.shutdown().await;
        fabric.shutdown().await;
        assert!(matches!(
            agent.broadcast(Priority::Low, Vec::new()).await,
            Err(RuntimeError::ShuttingDown)
        ));
        assert!(matches!(
            fabric.register_agent("beta", Role::Agent),
            Err(RuntimeError::ShuttingDown)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rpc_cancelled_on_shutdown() {
        let fabric = test_fabric();
        // The callee never answers: no handler registered.
        let callee = fabric
            .register_agent("silent", Role::Agent)
            .unwrap()
            .start()
            .unwrap();
        let caller = fabric
            .register_agent("caller", Role::Agent)
            .unwrap()
            .start()
            .unwrap();

        let call = {
            let caller = caller.clone();
            let callee_id = callee.id();
            tokio::spawn(async move {
                caller
                    .call(callee_id, b"?".to_vec(), Priority::High, Duration::from_secs(30))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        fabric.shutdown().await;
        let result = call.await.expect("join");
        assert!(matches!(
            result,
            Err(RuntimeError::Cancelled | RuntimeError::RpcTimeout { .. })
        ));
    }
}
