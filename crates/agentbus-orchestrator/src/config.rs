use agentbus_core::{BusError, BusResult, Priority};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behaviour for submissions refused with `QueueFull`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Cap for the exponential backoff.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Minimum classifier score for an agent to be consulted.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    /// Overall deadline of one user request unless the request sets its own.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound on agents consulted for one request.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Agent consulted when no agent clears the threshold.
    #[serde(default)]
    pub fallback_agent: Option<String>,
    /// Priority of submitted messages unless the request sets its own.
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub submit_retry: RetryPolicy,
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> BusResult<()> {
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(BusError::Config(format!(
                "relevance_threshold must be within [0, 1], got {}",
                self.relevance_threshold
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(BusError::Config("request_timeout_ms must be > 0".into()));
        }
        if self.max_agents == 0 {
            return Err(BusError::Config("max_agents must be > 0".into()));
        }
        if self.fallback_agent.as_deref().is_some_and(str::is_empty) {
            return Err(BusError::Config("fallback_agent must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: default_relevance_threshold(),
            request_timeout_ms: default_request_timeout_ms(),
            max_agents: default_max_agents(),
            fallback_agent: None,
            priority: Priority::Normal,
            submit_retry: RetryPolicy::default(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    50
}
fn default_backoff_max_ms() -> u64 {
    1000
}
fn default_relevance_threshold() -> f32 {
    0.3
}
fn default_request_timeout_ms() -> u64 {
    15_000
}
fn default_max_agents() -> usize {
    4
}
