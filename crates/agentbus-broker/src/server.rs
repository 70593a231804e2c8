use crate::breaker::{BreakerBoard, BreakerSnapshot, BreakerState};
use crate::config::BrokerConfig;
use crate::dispatcher::Dispatcher;
use crate::queue::BoundedPriorityQueue;
use crate::registry::AgentRegistry;
use crate::table::MessageTable;
use crate::telemetry::{TelemetrySink, TracingTelemetry};
use agentbus_core::{
    Agent, AgentRequest, BusError, BusResult, Message, MessageStatus, Target, TargetOutcome,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Slack added on top of a message's own deadline when waiting for it.
const AWAIT_GRACE: Duration = Duration::from_millis(250);

/// Public view of a registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub order: u64,
    pub registered_at: DateTime<Utc>,
    pub breaker: BreakerState,
    /// Whether the breaker would currently admit a call.
    pub available: bool,
}

/// The A2A broker: queue, dispatcher workers, registry and circuit breakers
/// behind one handle.
///
/// Construct once with [`A2aServer::start`] and share the returned `Arc`.
pub struct A2aServer {
    config: BrokerConfig,
    queue: Arc<BoundedPriorityQueue>,
    registry: Arc<AgentRegistry>,
    breakers: Arc<BreakerBoard>,
    table: Arc<MessageTable>,
    dispatcher: Arc<Dispatcher>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    janitor: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl A2aServer {
    /// Start a broker that reports telemetry through `tracing`.
    pub fn start(config: BrokerConfig) -> BusResult<Arc<Self>> {
        Self::start_with_telemetry(config, Arc::new(TracingTelemetry))
    }

    /// Start a broker with a custom telemetry sink. Must run inside a Tokio runtime.
    pub fn start_with_telemetry(
        config: BrokerConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> BusResult<Arc<Self>> {
        config.validate()?;

        let queue = Arc::new(BoundedPriorityQueue::with_telemetry(
            config.queue_capacity,
            telemetry.clone(),
        ));
        let registry = Arc::new(AgentRegistry::new());
        let breakers = Arc::new(BreakerBoard::new(config.breaker.clone(), telemetry.clone()));
        let table = Arc::new(MessageTable::new());

        let dispatcher = Arc::new(
            Dispatcher::new(
                queue.clone(),
                registry.clone(),
                breakers.clone(),
                table.clone(),
                telemetry,
            )
            .with_max_concurrency(config.max_concurrency_per_message),
        );
        let workers = dispatcher.spawn_workers(config.workers);
        let janitor = spawn_janitor(table.clone(), config.retention(), config.prune_interval());

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "A2A server started"
        );

        Ok(Arc::new(Self {
            config,
            queue,
            registry,
            breakers,
            table,
            dispatcher,
            workers: Mutex::new(workers),
            janitor: Mutex::new(Some(janitor)),
            stopped: AtomicBool::new(false),
        }))
    }

    /// A handle agents can keep to consult other agents without creating a
    /// reference cycle through the registry.
    pub fn client(self: &Arc<Self>) -> A2aClient {
        A2aClient {
            server: Arc::downgrade(self),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // --- Registration ---

    pub fn register_agent<I, S>(
        &self,
        agent_id: impl Into<String>,
        capabilities: I,
        handle: Arc<dyn Agent>,
    ) -> BusResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent_id = agent_id.into();
        if self.registry.register(agent_id.clone(), capabilities, handle)? {
            debug!(agent = %agent_id, "Replaced existing registration");
        }
        Ok(())
    }

    /// Remove an agent and forget its breaker. Returns `false` if unknown.
    pub fn deregister_agent(&self, agent_id: &str) -> bool {
        let removed = self.registry.deregister(agent_id);
        if removed {
            self.breakers.reset(agent_id);
        }
        removed
    }

    /// Registered agents in registration order.
    pub fn registered_agents(&self) -> Vec<AgentInfo> {
        self.registry
            .list()
            .into_iter()
            .map(|r| AgentInfo {
                breaker: self.breakers.state(&r.agent_id),
                available: self.breakers.is_available(&r.agent_id),
                capabilities: r.capabilities.iter().cloned().collect(),
                agent_id: r.agent_id,
                order: r.order,
                registered_at: r.registered_at,
            })
            .collect()
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.registry.contains(agent_id)
    }

    pub fn registration_order(&self, agent_id: &str) -> Option<u64> {
        self.registry.order_of(agent_id)
    }

    pub fn capabilities_of(&self, agent_id: &str) -> Vec<String> {
        self.registry.capabilities_of(agent_id)
    }

    pub fn breaker_state(&self, agent_id: &str) -> BreakerState {
        self.breakers.state(agent_id)
    }

    pub fn breakers(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshot()
    }

    // --- Messaging ---

    /// Build a message using the configured default timeout.
    pub fn message(
        &self,
        source_agent: impl Into<String>,
        target: impl Into<Target>,
        payload: serde_json::Value,
    ) -> Message {
        Message::new(source_agent, target, payload).with_timeout(self.config.default_timeout())
    }

    /// Queue a message. A fresh id is assigned and returned.
    ///
    /// Fails with [`BusError::QueueFull`] under backpressure and
    /// [`BusError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn submit(&self, mut message: Message) -> BusResult<Uuid> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BusError::Shutdown);
        }
        message.id = Uuid::new_v4();
        message.status = MessageStatus::Queued;
        message.outcomes.clear();
        message.error = None;
        message.finished_at = None;

        let id = message.id;
        let (target, priority) = (message.target.clone(), message.priority);
        self.table.insert(message.clone());
        if let Err(err) = self.queue.enqueue(message) {
            self.table.remove(id);
            if err.is_backpressure() {
                warn!(message_id = %id, %target, "Queue full, rejecting submission");
            }
            return Err(err);
        }
        debug!(message_id = %id, %target, %priority, "Message queued");
        Ok(id)
    }

    /// Wait up to `timeout` for a message to reach a terminal status.
    ///
    /// The terminal message is handed over exactly once; afterwards the id is
    /// unknown. If `timeout` elapses first, [`BusError::AwaitTimeout`] is
    /// returned and the message stays available.
    pub async fn await_result(&self, id: Uuid, timeout: Duration) -> BusResult<Message> {
        let mut rx = self.table.subscribe(id).ok_or(BusError::NotFound(id))?;
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|m| m.status.is_terminal())
                .await
                .map(|m| (*m).clone())
        })
        .await;
        match waited {
            Ok(Ok(message)) => {
                self.table.remove(id);
                Ok(message)
            }
            Ok(Err(_closed)) => Err(BusError::NotFound(id)),
            Err(_elapsed) => Err(BusError::AwaitTimeout(id)),
        }
    }

    /// Submit and wait until the message's own deadline (plus a short grace).
    pub async fn call(&self, message: Message) -> BusResult<Message> {
        let wait = message
            .remaining()
            .unwrap_or_default()
            .saturating_add(AWAIT_GRACE);
        let id = self.submit(message)?;
        self.await_result(id, wait).await
    }

    /// Let an agent consult another agent in the middle of its own invocation.
    ///
    /// The nested message skips the queue and runs on the calling agent's
    /// task, so it never waits for a free worker. Breakers still apply and
    /// [`status`](Self::status) sees it while it runs.
    ///
    /// The deadline is capped by the caller's. Nesting beyond
    /// `max_consult_depth` fails with [`BusError::ConsultDepth`].
    pub async fn consult(
        &self,
        from: &AgentRequest,
        target: impl Into<Target>,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> BusResult<Message> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(BusError::Shutdown);
        }
        let depth = from.depth + 1;
        if depth > self.config.max_consult_depth {
            return Err(BusError::ConsultDepth {
                max_depth: self.config.max_consult_depth,
            });
        }
        let message = Message::new(from.agent_id.clone(), target, payload)
            .with_timeout(timeout)
            .with_depth(depth);
        let deadline = message.deadline.min(from.deadline);
        let message = message.with_deadline(deadline);
        let id = message.id;

        debug!(
            message_id = %id,
            from = %from.agent_id,
            target = %message.target,
            depth,
            "Consulting inline"
        );
        self.table.insert(message.clone());
        self.dispatcher.process(message).await;
        self.table.remove(id).ok_or(BusError::NotFound(id))
    }

    /// Withdraw a message that no worker has picked up yet. It is marked
    /// `rejected` (waking anyone awaiting it) and forgotten.
    ///
    /// Returns `false` if the message is already in flight, finished or unknown.
    pub fn cancel(&self, id: Uuid) -> bool {
        if self.queue.remove(id).is_none() {
            return false;
        }
        self.table.update(id, |m| {
            if m.fail(MessageStatus::Rejected, &BusError::Cancelled(id)) {
                if let Target::Agent(agent_id) = &m.target {
                    m.outcomes = vec![TargetOutcome::failure(agent_id, &BusError::Cancelled(id), 0)];
                }
            }
        });
        self.table.remove(id);
        debug!(message_id = %id, "Message cancelled before dispatch");
        true
    }

    /// Snapshot of a message without consuming it.
    pub fn status(&self, id: Uuid) -> BusResult<Message> {
        self.table.get(id).ok_or(BusError::NotFound(id))
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Messages the server still tracks (queued, in flight, or unread).
    pub fn tracked_messages(&self) -> usize {
        self.table.len()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting work, reject everything still queued, and wait for the
    /// workers to finish their in-flight messages.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.close();
        let pending = self.queue.drain();
        for message in &pending {
            self.table.update(message.id, |m| {
                if m.fail(MessageStatus::Rejected, &BusError::Shutdown) {
                    if let Target::Agent(agent_id) = &m.target {
                        m.outcomes = vec![TargetOutcome::failure(agent_id, &BusError::Shutdown, 0)];
                    }
                }
            });
        }
        if let Some(janitor) = self.janitor.lock().take() {
            janitor.abort();
        }
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatcher worker ended abnormally");
            }
        }
        info!(rejected = pending.len(), "A2A server stopped");
    }
}

impl Drop for A2aServer {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(janitor) = self.janitor.lock().take() {
            janitor.abort();
        }
    }
}

fn spawn_janitor(
    table: Arc<MessageTable>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = Utc::now()
                - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
            let pruned = table.prune_finished_before(cutoff);
            if pruned > 0 {
                debug!(pruned, "Pruned finished messages nobody awaited");
            }
        }
    })
}

/// Weak handle to an [`A2aServer`], safe to store inside agents.
#[derive(Clone)]
pub struct A2aClient {
    server: Weak<A2aServer>,
}

impl A2aClient {
    fn server(&self) -> BusResult<Arc<A2aServer>> {
        self.server.upgrade().ok_or(BusError::Shutdown)
    }

    pub fn submit(&self, message: Message) -> BusResult<Uuid> {
        self.server()?.submit(message)
    }

    pub async fn await_result(&self, id: Uuid, timeout: Duration) -> BusResult<Message> {
        self.server()?.await_result(id, timeout).await
    }

    pub async fn call(&self, message: Message) -> BusResult<Message> {
        self.server()?.call(message).await
    }

    pub async fn consult(
        &self,
        from: &AgentRequest,
        target: impl Into<Target>,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> BusResult<Message> {
        self.server()?.consult(from, target, payload, timeout).await
    }
}
