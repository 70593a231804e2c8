use crate::config::BreakerConfig;
use crate::telemetry::{TelemetrySink, TracingTelemetry};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of one agent's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// Probation: a single trial call is in flight or allowed.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Serializable view of a breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub agent_id: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Milliseconds the breaker has been open, if it is open.
    pub open_for_ms: Option<u64>,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    open_since: Option<Instant>,
    trial_in_flight: bool,
}

type Transition = (BreakerState, BreakerState);

/// Consecutive-failure circuit breaker guarding one agent.
///
/// Transitions: `closed → open` once `failure_count >= failure_threshold`,
/// `open → half_open` once `reset_timeout` has elapsed (on the next
/// [`allow`](Self::allow)), `half_open → closed` on trial success and
/// `half_open → open` on trial failure. The lock is only held for the state
/// update itself, never across an invocation.
pub struct CircuitBreaker {
    agent_id: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl CircuitBreaker {
    pub fn new(agent_id: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                open_since: None,
                trial_in_flight: false,
            }),
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    /// Report transitions to `telemetry` instead of `tracing`.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Whether a call to the agent may proceed now.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// [`allow`](Self::allow) evaluated at an explicit instant.
    pub fn allow_at(&self, now: Instant) -> bool {
        let (allowed, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::Closed => (true, None),
                BreakerState::Open => {
                    let elapsed = inner
                        .open_since
                        .map_or(Duration::MAX, |since| now.saturating_duration_since(since));
                    if elapsed >= self.reset_timeout {
                        inner.state = BreakerState::HalfOpen;
                        inner.trial_in_flight = true;
                        (true, Some((BreakerState::Open, BreakerState::HalfOpen)))
                    } else {
                        (false, None)
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.trial_in_flight {
                        (false, None)
                    } else {
                        inner.trial_in_flight = true;
                        (true, None)
                    }
                }
            }
        };
        self.report(transition);
        allowed
    }

    /// Reset the failure count; closes a half-open breaker.
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            if inner.state == BreakerState::HalfOpen {
                inner.state = BreakerState::Closed;
                inner.open_since = None;
                Some((BreakerState::HalfOpen, BreakerState::Closed))
            } else {
                None
            }
        };
        self.report(transition);
    }

    /// Count one failure (error or timeout).
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// [`record_failure`](Self::record_failure) stamped at an explicit instant.
    pub fn record_failure_at(&self, now: Instant) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            match inner.state {
                BreakerState::HalfOpen => {
                    inner.state = BreakerState::Open;
                    inner.open_since = Some(now);
                    inner.trial_in_flight = false;
                    Some((BreakerState::HalfOpen, BreakerState::Open))
                }
                BreakerState::Closed if inner.failure_count >= self.failure_threshold => {
                    inner.state = BreakerState::Open;
                    inner.open_since = Some(now);
                    Some((BreakerState::Closed, BreakerState::Open))
                }
                _ => None,
            }
        };
        self.report(transition);
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Whether [`allow`](Self::allow) would currently admit a call, without
    /// consuming the half-open trial.
    pub fn is_available_at(&self, now: Instant) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => inner
                .open_since
                .map_or(true, |since| now.saturating_duration_since(since) >= self.reset_timeout),
            BreakerState::HalfOpen => !inner.trial_in_flight,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            agent_id: self.agent_id.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            open_for_ms: match inner.state {
                BreakerState::Open => inner.open_since.map(|s| s.elapsed().as_millis() as u64),
                _ => None,
            },
        }
    }

    fn report(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.telemetry.breaker_transition(&self.agent_id, from, to);
        }
    }
}

/// One [`CircuitBreaker`] per agent, created on first use.
pub struct BreakerBoard {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl BreakerBoard {
    pub fn new(config: BreakerConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            telemetry,
        }
    }

    /// The breaker for `agent_id`, creating a closed one if needed.
    pub fn breaker(&self, agent_id: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().get(agent_id) {
            return b.clone();
        }
        self.breakers
            .write()
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(
                    CircuitBreaker::new(agent_id, &self.config)
                        .with_telemetry(self.telemetry.clone()),
                )
            })
            .clone()
    }

    pub fn allow(&self, agent_id: &str) -> bool {
        self.breaker(agent_id).allow()
    }

    pub fn record_success(&self, agent_id: &str) {
        self.breaker(agent_id).record_success();
    }

    pub fn record_failure(&self, agent_id: &str) {
        self.breaker(agent_id).record_failure();
    }

    /// Current state; agents never called are `Closed`.
    pub fn state(&self, agent_id: &str) -> BreakerState {
        self.breakers
            .read()
            .get(agent_id)
            .map_or(BreakerState::Closed, |b| b.state())
    }

    pub fn is_available(&self, agent_id: &str) -> bool {
        self.breakers
            .read()
            .get(agent_id)
            .map_or(true, |b| b.is_available_at(Instant::now()))
    }

    /// Drop the breaker for `agent_id`; the next call starts closed.
    pub fn reset(&self, agent_id: &str) -> bool {
        self.breakers.write().remove(agent_id).is_some()
    }

    /// Snapshots sorted by agent id.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> =
            self.breakers.read().values().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::telemetry::NoopTelemetry;

    fn config(threshold: u32, reset_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("nutrition", &config(5, 30_000));
        let t0 = Instant::now();
        for _ in 0..4 {
            cb.record_failure_at(t0);
            assert!(cb.allow_at(t0));
        }
        cb.record_failure_at(t0);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_at(t0));
        assert!(!cb.allow_at(t0 + Duration::from_secs(29)));
    }

    #[test]
    fn test_success_resets_count() {
        let cb = CircuitBreaker::new("x", &config(3, 1_000));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_allows_exactly_one_trial() {
        let cb = CircuitBreaker::new("x", &config(5, 30_000));
        let t0 = Instant::now();
        for _ in 0..5 {
            cb.record_failure_at(t0);
        }
        let later = t0 + Duration::from_secs(30);
        assert!(cb.allow_at(later));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(!cb.allow_at(later));
        assert!(!cb.allow_at(later + Duration::from_secs(1)));

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.allow_at(later));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("x", &config(2, 100));
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        cb.record_failure_at(t0);
        let t1 = t0 + Duration::from_millis(100);
        assert!(cb.allow_at(t1));
        cb.record_failure_at(t1);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_at(t1 + Duration::from_millis(50)));
        assert!(cb.allow_at(t1 + Duration::from_millis(100)));
    }

    #[test]
    fn test_availability_does_not_consume_trial() {
        let cb = CircuitBreaker::new("x", &config(1, 10));
        let t0 = Instant::now();
        cb.record_failure_at(t0);
        assert!(!cb.is_available_at(t0));
        let t1 = t0 + Duration::from_millis(10);
        assert!(cb.is_available_at(t1));
        assert!(cb.is_available_at(t1));
        assert!(cb.allow_at(t1));
        assert!(!cb.is_available_at(t1));
    }

    #[test]
    fn test_board_creates_lazily() {
        let board = BreakerBoard::new(config(1, 60_000), Arc::new(NoopTelemetry));
        assert_eq!(board.state("unknown"), BreakerState::Closed);
        assert!(board.snapshot().is_empty());

        board.record_failure("training");
        assert_eq!(board.state("training"), BreakerState::Open);
        assert!(!board.allow("training"));
        assert!(!board.is_available("training"));
        assert!(board.allow("nutrition"));

        let snap = board.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].agent_id, "nutrition");
        assert_eq!(snap[1].state, BreakerState::Open);
        assert!(snap[1].open_for_ms.is_some());

        assert!(board.reset("training"));
        assert!(board.allow("training"));
    }
}
