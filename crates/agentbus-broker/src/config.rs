use agentbus_core::{BusError, BusResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit-breaker tuning shared by every per-agent breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures (errors or timeouts) that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing one trial.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

/// Broker-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum number of pending messages before `QueueFull` is returned.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Dispatcher worker tasks (cross-message concurrency).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Parallel invocations per broadcast message. `None` means unlimited.
    #[serde(default)]
    pub max_concurrency_per_message: Option<usize>,
    /// Timeout for messages built through [`A2aServer::message`](crate::A2aServer::message).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Maximum nesting of agent-to-agent consultations.
    #[serde(default = "default_max_consult_depth")]
    pub max_consult_depth: u32,
    /// How long a finished message nobody awaited stays queryable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Interval of the retention sweep.
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl BrokerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    /// Reject settings the broker cannot run with.
    pub fn validate(&self) -> BusResult<()> {
        if self.queue_capacity == 0 {
            return Err(BusError::Config("queue_capacity must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(BusError::Config("workers must be > 0".into()));
        }
        if self.max_concurrency_per_message == Some(0) {
            return Err(BusError::Config(
                "max_concurrency_per_message must be > 0 when set".into(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(BusError::Config("default_timeout_ms must be > 0".into()));
        }
        if self.prune_interval_ms == 0 {
            return Err(BusError::Config("prune_interval_ms must be > 0".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(BusError::Config(
                "breaker.failure_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            max_concurrency_per_message: None,
            default_timeout_ms: default_timeout_ms(),
            max_consult_depth: default_max_consult_depth(),
            retention_secs: default_retention_secs(),
            prune_interval_ms: default_prune_interval_ms(),
            breaker: BreakerConfig::default(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_queue_capacity() -> usize {
    1000
}
fn default_workers() -> usize {
    4
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_consult_depth() -> u32 {
    3
}
fn default_retention_secs() -> u64 {
    300
}
fn default_prune_interval_ms() -> u64 {
    5_000
}
