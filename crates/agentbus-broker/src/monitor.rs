use crate::breaker::BreakerState;
use crate::telemetry::TelemetrySink;
use agentbus_core::{FailureKind, MessageStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Counters tracked per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Calls refused by an open circuit breaker.
    pub circuit_rejections: u64,
    pub invocations: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
    pub breaker_state: Option<BreakerState>,
    pub breaker_transitions: u64,
}

impl AgentMetrics {
    pub fn avg_latency_ms(&self) -> u64 {
        if self.invocations == 0 {
            0
        } else {
            self.total_latency_ms / self.invocations
        }
    }
}

/// Queue-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub depth: usize,
    pub max_depth: usize,
}

/// Point-in-time copy of everything the monitor has seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub queue: QueueMetrics,
    pub agents: BTreeMap<String, AgentMetrics>,
    pub messages: BTreeMap<String, u64>,
}

#[derive(Default)]
struct MonitorState {
    queue: QueueMetrics,
    agents: HashMap<String, AgentMetrics>,
    messages: HashMap<MessageStatus, u64>,
}

/// In-process telemetry sink keeping per-agent and queue counters.
///
/// Uses a short synchronous lock so recording never suspends the broker.
#[derive(Default)]
pub struct BrokerMonitor {
    state: Mutex<MonitorState>,
}

impl BrokerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentMetrics> {
        self.state.lock().agents.get(agent_id).cloned()
    }

    pub fn queue(&self) -> QueueMetrics {
        self.state.lock().queue.clone()
    }

    /// Number of messages that finished with `status`.
    pub fn messages_with(&self, status: MessageStatus) -> u64 {
        self.state.lock().messages.get(&status).copied().unwrap_or(0)
    }

    /// Sum of all per-agent counters.
    pub fn aggregate(&self) -> AgentMetrics {
        let state = self.state.lock();
        let mut total = AgentMetrics::default();
        for m in state.agents.values() {
            total.successes += m.successes;
            total.failures += m.failures;
            total.timeouts += m.timeouts;
            total.circuit_rejections += m.circuit_rejections;
            total.invocations += m.invocations;
            total.total_latency_ms += m.total_latency_ms;
            total.max_latency_ms = total.max_latency_ms.max(m.max_latency_ms);
            total.breaker_transitions += m.breaker_transitions;
        }
        total
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let state = self.state.lock();
        MonitorSnapshot {
            queue: state.queue.clone(),
            agents: state
                .agents
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            messages: state
                .messages
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    /// Snapshot plus aggregate as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let snapshot = self.snapshot();
        let aggregate = self.aggregate();
        serde_json::json!({
            "queue": snapshot.queue,
            "agents": snapshot.agents,
            "messages": snapshot.messages,
            "aggregate": aggregate,
        })
    }

    fn with_agent(&self, agent_id: &str, f: impl FnOnce(&mut AgentMetrics)) {
        let mut state = self.state.lock();
        f(state.agents.entry(agent_id.to_string()).or_default());
    }
}

impl TelemetrySink for BrokerMonitor {
    fn queue_depth(&self, depth: usize) {
        let mut state = self.state.lock();
        state.queue.depth = depth;
        state.queue.max_depth = state.queue.max_depth.max(depth);
    }

    fn breaker_transition(&self, agent_id: &str, _from: BreakerState, to: BreakerState) {
        self.with_agent(agent_id, |m| {
            m.breaker_state = Some(to);
            m.breaker_transitions += 1;
        });
    }

    fn dispatch_latency(&self, agent_id: &str, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.with_agent(agent_id, |m| {
            m.invocations += 1;
            m.total_latency_ms += ms;
            m.max_latency_ms = m.max_latency_ms.max(ms);
        });
    }

    fn agent_outcome(&self, agent_id: &str, failure: Option<FailureKind>) {
        self.with_agent(agent_id, |m| match failure {
            None => m.successes += 1,
            Some(FailureKind::TimedOut) => {
                m.failures += 1;
                m.timeouts += 1;
            }
            Some(FailureKind::CircuitOpen) => m.circuit_rejections += 1,
            Some(_) => m.failures += 1,
        });
    }

    fn message_finished(&self, status: MessageStatus) {
        *self.state.lock().messages.entry(status).or_insert(0) += 1;
    }
}
