use crate::breaker::BreakerState;
use agentbus_core::{FailureKind, MessageStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receiver of broker observations.
///
/// Every method is synchronous and must return quickly: the broker calls
/// them inline on its hot path. All methods default to no-ops so sinks only
/// implement what they care about.
pub trait TelemetrySink: Send + Sync {
    /// Queue depth right after an enqueue or dequeue.
    fn queue_depth(&self, _depth: usize) {}

    /// A circuit breaker changed state.
    fn breaker_transition(&self, _agent_id: &str, _from: BreakerState, _to: BreakerState) {}

    /// Wall time of one agent invocation.
    fn dispatch_latency(&self, _agent_id: &str, _latency: Duration) {}

    /// Result of one agent invocation. `None` means success.
    fn agent_outcome(&self, _agent_id: &str, _failure: Option<FailureKind>) {}

    /// A message reached a terminal status.
    fn message_finished(&self, _status: MessageStatus) {}
}

/// Forwards observations to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn queue_depth(&self, depth: usize) {
        debug!(depth, "queue depth");
    }

    fn breaker_transition(&self, agent_id: &str, from: BreakerState, to: BreakerState) {
        if to == BreakerState::Open {
            warn!(agent = %agent_id, %from, %to, "Circuit breaker opened");
        } else {
            info!(agent = %agent_id, %from, %to, "Circuit breaker transition");
        }
    }

    fn dispatch_latency(&self, agent_id: &str, latency: Duration) {
        debug!(agent = %agent_id, latency_ms = latency.as_millis() as u64, "dispatch latency");
    }

    fn agent_outcome(&self, agent_id: &str, failure: Option<FailureKind>) {
        match failure {
            None => debug!(agent = %agent_id, "agent succeeded"),
            Some(kind) => debug!(agent = %agent_id, %kind, "agent failed"),
        }
    }

    fn message_finished(&self, status: MessageStatus) {
        debug!(%status, "message finished");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {}

/// Forwards every observation to several sinks.
#[derive(Default, Clone)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutTelemetry {
    fn queue_depth(&self, depth: usize) {
        for sink in &self.sinks {
            sink.queue_depth(depth);
        }
    }

    fn breaker_transition(&self, agent_id: &str, from: BreakerState, to: BreakerState) {
        for sink in &self.sinks {
            sink.breaker_transition(agent_id, from, to);
        }
    }

    fn dispatch_latency(&self, agent_id: &str, latency: Duration) {
        for sink in &self.sinks {
            sink.dispatch_latency(agent_id, latency);
        }
    }

    fn agent_outcome(&self, agent_id: &str, failure: Option<FailureKind>) {
        for sink in &self.sinks {
            sink.agent_outcome(agent_id, failure);
        }
    }

    fn message_finished(&self, status: MessageStatus) {
        for sink in &self.sinks {
            sink.message_finished(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        depths: AtomicUsize,
    }

    impl TelemetrySink for CountingSink {
        fn queue_depth(&self, _depth: usize) {
            self.depths.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(CountingSink::default());
        let b = Arc::new(CountingSink::default());
        let fanout = FanoutTelemetry::default()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(NoopTelemetry));

        fanout.queue_depth(3);
        fanout.queue_depth(4);
        fanout.agent_outcome("x", None);

        assert_eq!(a.depths.load(Ordering::SeqCst), 2);
        assert_eq!(b.depths.load(Ordering::SeqCst), 2);
    }
}
