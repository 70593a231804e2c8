use crate::breaker::BreakerBoard;
use crate::queue::BoundedPriorityQueue;
use crate::registry::{AgentRegistration, AgentRegistry};
use crate::table::MessageTable;
use crate::telemetry::TelemetrySink;
use agentbus_core::{
    AgentRequest, BusError, FailureKind, Message, MessageStatus, Target, TargetOutcome,
};
use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pulls messages off the queue and runs them against the registered agents.
///
/// Holds no lock across an agent invocation, so agents may submit and await
/// messages of their own through the same broker.
pub struct Dispatcher {
    queue: Arc<BoundedPriorityQueue>,
    registry: Arc<AgentRegistry>,
    breakers: Arc<BreakerBoard>,
    table: Arc<MessageTable>,
    telemetry: Arc<dyn TelemetrySink>,
    max_concurrency: Option<usize>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<BoundedPriorityQueue>,
        registry: Arc<AgentRegistry>,
        breakers: Arc<BreakerBoard>,
        table: Arc<MessageTable>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            queue,
            registry,
            breakers,
            table,
            telemetry,
            max_concurrency: None,
        }
    }

    /// Cap parallel invocations within one broadcast message.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Spawn `workers` tasks that dispatch until the queue is closed.
    pub fn spawn_workers(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|worker| {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.run_worker(worker).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize) {
        debug!(worker, "Dispatcher worker started");
        while let Some(message) = self.queue.dequeue().await {
            self.process(message).await;
        }
        debug!(worker, "Dispatcher worker stopped");
    }

    /// Run one message to a terminal status.
    pub async fn process(&self, message: Message) {
        let id = message.id;

        if message.is_expired() {
            warn!(message_id = %id, target = %message.target, "Deadline passed before dispatch");
            let err = BusError::Timeout {
                agent: message.target.to_string(),
                timeout_ms: 0,
            };
            let outcomes = direct_outcome(&message.target, &err);
            self.finish(id, MessageStatus::TimedOut, outcomes, Some(err.to_string()));
            return;
        }

        let targets = match self.registry.resolve(&message.target) {
            Ok(targets) => targets,
            Err(err) => {
                warn!(message_id = %id, target = %message.target, error = %err, "Rejecting message");
                let outcomes = direct_outcome(&message.target, &err);
                self.finish(id, MessageStatus::Rejected, outcomes, Some(err.to_string()));
                return;
            }
        };

        self.table.update(id, |m| {
            m.transition(MessageStatus::Dispatched);
        });
        debug!(message_id = %id, targets = targets.len(), "Dispatching");

        let limit = self.max_concurrency.unwrap_or(targets.len()).max(1);
        let outcomes: Vec<TargetOutcome> = stream::iter(targets)
            .map(|target| self.invoke_target(&message, target))
            .buffered(limit)
            .collect()
            .await;

        let status = overall_status(&message.target, &outcomes);
        let error = if status == MessageStatus::Completed {
            None
        } else {
            outcomes.iter().find_map(|o| o.error.clone())
        };
        info!(
            message_id = %id,
            status = %status,
            succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
            total = outcomes.len(),
            "Message finished"
        );
        self.finish(id, status, outcomes, error);
    }

    async fn invoke_target(&self, message: &Message, target: AgentRegistration) -> TargetOutcome {
        let agent_id = target.agent_id;

        // Checked before the breaker so a trial slot is never spent on a dead message.
        let Some(remaining) = message.remaining() else {
            let err = BusError::Timeout {
                agent: agent_id.clone(),
                timeout_ms: 0,
            };
            self.telemetry
                .agent_outcome(&agent_id, Some(FailureKind::TimedOut));
            return TargetOutcome::failure(agent_id, &err, 0);
        };

        let breaker = self.breakers.breaker(&agent_id);
        if !breaker.allow() {
            debug!(message_id = %message.id, agent = %agent_id, "Circuit open, skipping agent");
            self.telemetry
                .agent_outcome(&agent_id, Some(FailureKind::CircuitOpen));
            return TargetOutcome::failure(&agent_id, &BusError::CircuitOpen(agent_id.clone()), 0);
        }

        let request = AgentRequest {
            message_id: message.id,
            source_agent: message.source_agent.clone(),
            agent_id: agent_id.clone(),
            payload: message.payload.clone(),
            deadline: message.deadline,
            depth: message.depth,
        };

        let start = Instant::now();
        let invocation = AssertUnwindSafe(target.handle.invoke(request)).catch_unwind();
        let result = tokio::time::timeout(remaining, invocation).await;
        let latency = start.elapsed();
        let latency_ms = latency.as_millis() as u64;
        self.telemetry.dispatch_latency(&agent_id, latency);

        let err = match result {
            Ok(Ok(Ok(payload))) => {
                breaker.record_success();
                self.telemetry.agent_outcome(&agent_id, None);
                return TargetOutcome::success(agent_id, payload, latency_ms);
            }
            Ok(Ok(Err(err))) => normalize_agent_error(&agent_id, err),
            Ok(Err(_panic)) => BusError::invocation(&agent_id, "agent panicked"),
            Err(_elapsed) => BusError::Timeout {
                agent: agent_id.clone(),
                timeout_ms: remaining.as_millis() as u64,
            },
        };

        breaker.record_failure();
        warn!(message_id = %message.id, agent = %agent_id, error = %err, "Agent invocation failed");
        let outcome = TargetOutcome::failure(&agent_id, &err, latency_ms);
        self.telemetry.agent_outcome(&agent_id, outcome.failure);
        outcome
    }

    fn finish(
        &self,
        id: uuid::Uuid,
        status: MessageStatus,
        outcomes: Vec<TargetOutcome>,
        error: Option<String>,
    ) {
        let mut moved = false;
        self.table.update(id, |m| {
            moved = m.transition(status);
            if moved {
                m.outcomes = outcomes;
                m.error = error;
            }
        });
        if moved {
            self.telemetry.message_finished(status);
        }
    }
}

/// Outcome for a message that never reached its agent. Broadcasts have no
/// resolved agent to attribute it to.
fn direct_outcome(target: &Target, err: &BusError) -> Vec<TargetOutcome> {
    match target {
        Target::Agent(agent_id) => vec![TargetOutcome::failure(agent_id, err, 0)],
        Target::Broadcast { .. } => Vec::new(),
    }
}

/// Anything an agent returns other than a timeout counts as an invocation error.
fn normalize_agent_error(agent_id: &str, err: BusError) -> BusError {
    match err {
        BusError::Timeout { timeout_ms, .. } => BusError::Timeout {
            agent: agent_id.to_string(),
            timeout_ms,
        },
        BusError::Invocation { reason, .. } => BusError::invocation(agent_id, reason),
        other => BusError::invocation(agent_id, other.to_string()),
    }
}

/// Whole-message status from per-target outcomes.
///
/// A single-agent message takes its agent's status. A broadcast completes when
/// at least one target succeeded; otherwise it is `timed_out` if every target
/// timed out and `failed` in any other case.
pub fn overall_status(target: &Target, outcomes: &[TargetOutcome]) -> MessageStatus {
    if !target.is_broadcast() {
        return outcomes
            .first()
            .map_or(MessageStatus::Failed, |o| o.status);
    }
    if outcomes.iter().any(TargetOutcome::is_success) {
        MessageStatus::Completed
    } else if !outcomes.is_empty()
        && outcomes
            .iter()
            .all(|o| o.status == MessageStatus::TimedOut)
    {
        MessageStatus::TimedOut
    } else {
        MessageStatus::Failed
    }
}
