use crate::error::BusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Timeout applied when a caller does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatch priority of a [`Message`].
///
/// Variants are declared most-urgent first, so the derived `Ord` sorts
/// `Critical < High < Normal < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Parse a priority name, falling back to [`Priority::Normal`].
    pub fn parse_level(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Priority::Critical,
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Addressee of a [`Message`].
///
/// The string form is either an agent id, `"*"` (every registered agent), or
/// `"*:<capability>"` (every agent advertising that capability).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    /// One specific agent.
    Agent(String),
    /// All agents, optionally restricted to one capability.
    Broadcast {
        /// Capability tag the resolved agents must advertise.
        capability: Option<String>,
    },
}

impl Target {
    /// Broadcast to every agent advertising `capability`.
    pub fn capability(capability: impl Into<String>) -> Self {
        Target::Broadcast {
            capability: Some(capability.into()),
        }
    }

    /// Parse the string form of a target.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s == "*" {
            return Target::Broadcast { capability: None };
        }
        match s.strip_prefix("*:") {
            Some(cap) if !cap.is_empty() => Target::capability(cap),
            Some(_) => Target::Broadcast { capability: None },
            None => Target::Agent(s.to_string()),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Target::Broadcast { .. })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Agent(id) => write!(f, "{id}"),
            Target::Broadcast { capability: None } => write!(f, "*"),
            Target::Broadcast {
                capability: Some(cap),
            } => write!(f, "*:{cap}"),
        }
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::parse(&s)
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::parse(s)
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.to_string()
    }
}

/// Lifecycle status of a [`Message`]. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Dispatched,
    Completed,
    Failed,
    TimedOut,
    Rejected,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Queued => 0,
            MessageStatus::Dispatched => 1,
            _ => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Dispatched => "dispatched",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
            MessageStatus::TimedOut => "timed_out",
            MessageStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Machine-readable reason an agent did not contribute to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TimedOut,
    CircuitOpen,
    Invocation,
    UnknownAgent,
    Rejected,
}

impl FailureKind {
    /// Map a broker error onto the failure it represents for one agent.
    pub fn from_error(err: &BusError) -> Self {
        match err {
            BusError::Timeout { .. } | BusError::AwaitTimeout(_) => FailureKind::TimedOut,
            BusError::CircuitOpen(_) => FailureKind::CircuitOpen,
            BusError::Invocation { .. } => FailureKind::Invocation,
            BusError::UnknownAgent(_) => FailureKind::UnknownAgent,
            _ => FailureKind::Rejected,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::TimedOut => "timed_out",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Invocation => "invocation",
            FailureKind::UnknownAgent => "unknown_agent",
            FailureKind::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// One agent that failed to contribute to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub agent_id: String,
    pub kind: FailureKind,
    pub detail: String,
}

/// Terminal result of invoking one resolved target of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub agent_id: String,
    /// `Completed`, `Failed` or `TimedOut`.
    pub status: MessageStatus,
    pub payload: Option<serde_json::Value>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl TargetOutcome {
    pub fn success(
        agent_id: impl Into<String>,
        payload: serde_json::Value,
        latency_ms: u64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: MessageStatus::Completed,
            payload: Some(payload),
            failure: None,
            error: None,
            latency_ms,
        }
    }

    pub fn failure(agent_id: impl Into<String>, err: &BusError, latency_ms: u64) -> Self {
        let kind = FailureKind::from_error(err);
        let status = if kind == FailureKind::TimedOut {
            MessageStatus::TimedOut
        } else {
            MessageStatus::Failed
        };
        Self {
            agent_id: agent_id.into(),
            status,
            payload: None,
            failure: Some(kind),
            error: Some(err.to_string()),
            latency_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MessageStatus::Completed
    }

    /// The failure view of this outcome, if it failed.
    pub fn as_partial_failure(&self) -> Option<PartialFailure> {
        self.failure.map(|kind| PartialFailure {
            agent_id: self.agent_id.clone(),
            kind,
            detail: self.error.clone().unwrap_or_default(),
        })
    }
}

/// Unit of inter-agent communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the server at submission.
    pub id: Uuid,
    pub source_agent: String,
    pub target: Target,
    /// Opaque content: query, context, session and user identifiers.
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: MessageStatus,
    /// Per-target results, filled in by the dispatcher.
    #[serde(default)]
    pub outcomes: Vec<TargetOutcome>,
    /// Reason for a whole-message failure or rejection.
    #[serde(default)]
    pub error: Option<String>,
    /// Nesting level of agent-to-agent consultation (0 = top level).
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a queued message with [`DEFAULT_TIMEOUT`] and normal priority.
    pub fn new(
        source_agent: impl Into<String>,
        target: impl Into<Target>,
        payload: serde_json::Value,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_agent: source_agent.into(),
            target: target.into(),
            payload,
            priority: Priority::Normal,
            created_at,
            deadline: deadline_after(created_at, DEFAULT_TIMEOUT)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            status: MessageStatus::Queued,
            outcomes: Vec::new(),
            error: None,
            depth: 0,
            finished_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set `deadline = created_at + timeout`, saturating at the latest
    /// representable instant.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline =
            deadline_after(self.created_at, timeout).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Move to `to` if that is a forward step. Terminal messages never change.
    pub fn transition(&mut self, to: MessageStatus) -> bool {
        if self.status.is_terminal() || to.rank() <= self.status.rank() {
            return false;
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// Terminate the message with an error reason.
    pub fn fail(&mut self, to: MessageStatus, err: &BusError) -> bool {
        let moved = self.transition(to);
        if moved {
            self.error = Some(err.to_string());
        }
        moved
    }

    /// Time left before the deadline, or `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        remaining_until(self.deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// Outcome recorded for a given agent.
    pub fn outcome(&self, agent_id: &str) -> Option<&TargetOutcome> {
        self.outcomes.iter().find(|o| o.agent_id == agent_id)
    }

    /// Payload of the first successful outcome.
    pub fn first_payload(&self) -> Option<&serde_json::Value> {
        self.outcomes
            .iter()
            .find(|o| o.is_success())
            .and_then(|o| o.payload.as_ref())
    }
}

/// Time left until `deadline`, or `None` if it is not in the future.
pub fn remaining_until(deadline: DateTime<Utc>) -> Option<Duration> {
    (deadline - Utc::now())
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}

/// `start + timeout`, or `None` when the result is not a representable date.
pub fn deadline_after(start: DateTime<Utc>, timeout: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse_level("HIGH"), Priority::High);
        assert_eq!(Priority::parse_level("critical"), Priority::Critical);
        assert_eq!(Priority::parse_level("whatever"), Priority::Normal);
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(Target::parse("nutrition"), Target::Agent("nutrition".into()));
        assert_eq!(Target::parse("*"), Target::Broadcast { capability: None });
        assert_eq!(Target::parse("*:diet"), Target::capability("diet"));
        assert_eq!(Target::capability("diet").to_string(), "*:diet");
        assert!(Target::parse("*").is_broadcast());
    }

    #[test]
    fn test_target_serializes_as_string() {
        let json = serde_json::to_string(&Target::capability("sleep")).unwrap();
        assert_eq!(json, "\"*:sleep\"");
        let back: Target = serde_json::from_str("\"training\"").unwrap();
        assert_eq!(back, Target::Agent("training".into()));
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let mut msg = Message::new("orchestrator", "nutrition", json!({}));
        assert!(!msg.transition(MessageStatus::Queued));
        assert!(msg.transition(MessageStatus::Dispatched));
        assert!(!msg.transition(MessageStatus::Queued));
        assert!(msg.transition(MessageStatus::Completed));
        assert!(msg.finished_at.is_some());
        assert!(!msg.transition(MessageStatus::Failed));
        assert_eq!(msg.status, MessageStatus::Completed);
    }

    #[test]
    fn test_queued_can_terminate_directly() {
        let mut msg = Message::new("orchestrator", "nutrition", json!({}));
        assert!(msg.fail(MessageStatus::TimedOut, &BusError::Shutdown));
        assert_eq!(msg.status, MessageStatus::TimedOut);
        assert!(msg.error.is_some());
    }

    #[test]
    fn test_deadline_from_timeout() {
        let msg = Message::new("a", "b", json!(null)).with_timeout(Duration::from_secs(2));
        assert_eq!((msg.deadline - msg.created_at).num_seconds(), 2);
        assert!(!msg.is_expired());

        let past = Message::new("a", "b", json!(null)).with_timeout(Duration::ZERO);
        assert!(past.is_expired());
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let huge = Duration::from_secs(10_000_000_000_000);
        assert!(deadline_after(Utc::now(), huge).is_none());
        assert!(deadline_after(Utc::now(), Duration::MAX).is_none());

        let msg = Message::new("a", "b", json!(null)).with_timeout(huge);
        assert_eq!(msg.deadline, DateTime::<Utc>::MAX_UTC);
        assert!(!msg.is_expired());
        assert!(msg.remaining().is_some());
    }

    #[test]
    fn test_outcome_failure_kinds() {
        let timeout = BusError::Timeout {
            agent: "x".into(),
            timeout_ms: 5,
        };
        let out = TargetOutcome::failure("x", &timeout, 5);
        assert_eq!(out.status, MessageStatus::TimedOut);
        assert_eq!(out.failure, Some(FailureKind::TimedOut));

        let out = TargetOutcome::failure("x", &BusError::CircuitOpen("x".into()), 0);
        assert_eq!(out.status, MessageStatus::Failed);
        let pf = out.as_partial_failure().unwrap();
        assert_eq!(pf.kind, FailureKind::CircuitOpen);

        let ok = TargetOutcome::success("x", json!("hi"), 3);
        assert!(ok.is_success());
        assert!(ok.as_partial_failure().is_none());
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::new("orchestrator", "*:diet", json!({"query": "protein"}))
            .with_priority(Priority::High);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.target, Target::capability("diet"));
        assert_eq!(parsed.priority, Priority::High);
        assert_eq!(parsed.status, MessageStatus::Queued);
    }
}
