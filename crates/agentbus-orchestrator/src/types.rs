use agentbus_core::{FailureKind, MessageStatus, PartialFailure, Priority};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// One user request entering the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Conversation whose context is embedded into every agent payload.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Overrides the configured message priority.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Overrides the configured overall deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl OrchestrationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// What one consulted agent contributed to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// `None` if the message could not be submitted.
    pub message_id: Option<Uuid>,
    /// Classifier relevance that selected the agent.
    pub score: f32,
    pub status: MessageStatus,
    pub payload: Option<serde_json::Value>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        self.status == MessageStatus::Completed && self.payload.is_some()
    }
}

/// Combined answer to one user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub request_id: Uuid,
    /// Per-agent outcomes keyed by agent id.
    pub outcomes: BTreeMap<String, AgentOutcome>,
    /// Single payload passed through, or the merged sections.
    pub combined: serde_json::Value,
    /// Agents that were consulted but did not contribute.
    pub partial_failures: Vec<PartialFailure>,
    /// Capabilities of the agents listed in `partial_failures`.
    pub unavailable_capabilities: Vec<String>,
    pub duration_ms: u64,
}

impl OrchestrationResult {
    /// Agents that answered successfully, in no particular order.
    pub fn responders(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        !self.partial_failures.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let req = OrchestrationRequest::new("how much protein?")
            .with_user("u1")
            .with_session("s1")
            .with_priority(Priority::High)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(req.user_id.as_deref(), Some("u1"));
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert_eq!(req.priority, Some(Priority::High));
        assert_eq!(req.timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_request_from_minimal_json() {
        let req: OrchestrationRequest = serde_json::from_value(json!({ "text": "hi" })).unwrap();
        assert_eq!(req.text, "hi");
        assert!(req.timeout().is_none());
        assert!(req.priority.is_none());
    }

    #[test]
    fn test_outcome_success_requires_payload() {
        let outcome = AgentOutcome {
            message_id: None,
            score: 0.5,
            status: MessageStatus::Completed,
            payload: None,
            failure: None,
            error: None,
            latency_ms: 0,
        };
        assert!(!outcome.is_success());
    }
}
