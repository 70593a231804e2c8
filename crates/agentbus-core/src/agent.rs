use crate::error::BusResult;
use crate::message::remaining_until;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// What the dispatcher hands to an agent for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Id of the message being served. Correlate with this, not arrival order.
    pub message_id: Uuid,
    pub source_agent: String,
    /// The agent being invoked (relevant for broadcasts).
    pub agent_id: String,
    pub payload: serde_json::Value,
    pub deadline: DateTime<Utc>,
    /// Consultation depth of the message being served.
    pub depth: u32,
}

impl AgentRequest {
    /// Time left before the deadline, or `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        remaining_until(self.deadline)
    }
}

/// The single capability every specialized agent implements.
///
/// Implementations return [`BusError::Timeout`](crate::BusError::Timeout) or
/// [`BusError::Invocation`](crate::BusError::Invocation) on failure. The
/// dispatcher drops the returned future when the deadline passes, so
/// long-running agents should await at cancellation-safe points.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> BusResult<serde_json::Value>;
}
