use crate::message::PartialFailure;
use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`BusError`].
pub type BusResult<T> = Result<T, BusError>;

/// Top-level error type for the agentbus broker and orchestrator.
#[derive(Error, Debug)]
pub enum BusError {
    /// The queue is at capacity. Callers should back off and retry.
    #[error("Queue full: capacity {capacity} reached")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The target agent is not registered (or no agent matches a broadcast).
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// The target agent's circuit breaker is open.
    #[error("Circuit open for agent: {0}")]
    CircuitOpen(String),

    /// The deadline elapsed while the agent was being invoked.
    #[error("Timeout after {timeout_ms}ms invoking agent {agent}")]
    Timeout {
        /// Agent that did not answer in time.
        agent: String,
        /// Time budget that was exhausted.
        timeout_ms: u64,
    },

    /// The agent returned an error.
    #[error("Invocation error from agent {agent}: {reason}")]
    Invocation {
        /// Agent that failed.
        agent: String,
        /// Failure reason reported by the agent.
        reason: String,
    },

    /// Every agent targeted by one user request failed or timed out.
    #[error("All agents failed: {}", summarize(.failures))]
    AllAgentsFailed {
        /// One entry per targeted agent.
        failures: Vec<PartialFailure>,
    },

    /// No message with this id is known to the server.
    #[error("Message not found: {0}")]
    NotFound(Uuid),

    /// The caller stopped waiting before the message reached a terminal status.
    #[error("Timed out awaiting message {0}")]
    AwaitTimeout(Uuid),

    /// The message was withdrawn before a worker picked it up.
    #[error("Message cancelled before dispatch: {0}")]
    Cancelled(Uuid),

    /// Agent-to-agent consultation nested deeper than allowed.
    #[error("Consultation depth {max_depth} exceeded")]
    ConsultDepth {
        /// Configured maximum depth.
        max_depth: u32,
    },

    /// The broker has been shut down.
    #[error("Broker is shut down")]
    Shutdown,

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Shorthand for an [`BusError::Invocation`] raised by an agent implementation.
    pub fn invocation(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Invocation {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    /// True for backpressure, which is never an agent fault.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, BusError::QueueFull { .. })
    }

    /// True for errors that count against an agent's circuit breaker.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(self, BusError::Timeout { .. } | BusError::Invocation { .. })
    }

    /// True when retrying the same call later may succeed.
    ///
    /// `CircuitOpen` is excluded; wait for the breaker's reset timeout instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::QueueFull { .. } | BusError::Timeout { .. } | BusError::AwaitTimeout(_)
        )
    }
}

fn summarize(failures: &[PartialFailure]) -> String {
    if failures.is_empty() {
        return "no agent was eligible".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} ({})", f.agent_id, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}
