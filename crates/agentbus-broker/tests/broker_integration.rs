//! Integration tests for the A2A server: dispatch, deadlines, breakers,
//! broadcasts, consultation and shutdown.

use agentbus_broker::{A2aClient, A2aServer, BreakerState, BrokerConfig, BrokerMonitor};
use agentbus_core::{
    Agent, AgentRequest, BusError, BusResult, FailureKind, Message, MessageStatus, Priority,
    Target,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fake agents
// ---------------------------------------------------------------------------

/// Echoes the payload back after an optional delay, counting calls.
struct EchoAgent {
    delay: Duration,
    calls: AtomicU32,
}

impl EchoAgent {
    fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn invoke(&self, request: AgentRequest) -> BusResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(json!({ "agent": request.agent_id, "echo": request.payload }))
    }
}

/// Always fails.
struct FailingAgent {
    calls: AtomicU32,
}

#[async_trait]
impl Agent for FailingAgent {
    async fn invoke(&self, request: AgentRequest) -> BusResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BusError::invocation(request.agent_id, "backend unavailable"))
    }
}

/// Records the `label` of every payload it sees, in invocation order.
struct RecordingAgent {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Agent for RecordingAgent {
    async fn invoke(&self, request: AgentRequest) -> BusResult<Value> {
        let label = request.payload["label"].as_str().unwrap_or_default().to_string();
        self.seen.lock().push(label);
        Ok(Value::Null)
    }
}

/// Asks another agent through the broker before answering.
struct ConsultingAgent {
    client: A2aClient,
    target: String,
}

#[async_trait]
impl Agent for ConsultingAgent {
    async fn invoke(&self, request: AgentRequest) -> BusResult<Value> {
        let answer = self
            .client
            .consult(
                &request,
                self.target.as_str(),
                json!({ "question": "second opinion" }),
                Duration::from_secs(1),
            )
            .await?;
        Ok(json!({
            "consulted": self.target,
            "status": answer.status,
            "answer": answer.first_payload().cloned(),
        }))
    }
}

fn config() -> BrokerConfig {
    BrokerConfig {
        workers: 4,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_nutrition() {
    let server = A2aServer::start(config()).unwrap();
    let nutrition = EchoAgent::new();
    server
        .register_agent("nutrition", ["diet"], nutrition.clone())
        .unwrap();

    let msg = Message::new("orchestrator", "nutrition", json!({ "query": "protein intake" }))
        .with_priority(Priority::High)
        .with_timeout(Duration::from_secs(2));
    let id = server.submit(msg).unwrap();

    let done = server.await_result(id, Duration::from_secs(2)).await.unwrap();
    assert_eq!(done.id, id);
    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(
        done.first_payload().unwrap()["echo"]["query"],
        "protein intake"
    );
    assert_eq!(nutrition.calls(), 1);

    // Handed over once: the id is gone afterwards.
    assert!(matches!(
        server.await_result(id, Duration::from_millis(10)).await,
        Err(BusError::NotFound(_))
    ));
    server.shutdown().await;
}

#[tokio::test]
async fn test_expired_message_never_reaches_agent() {
    let server = A2aServer::start(config()).unwrap();
    let agent = EchoAgent::new();
    server.register_agent("nutrition", ["diet"], agent.clone()).unwrap();

    let msg = Message::new("orchestrator", "nutrition", json!({})).with_timeout(Duration::ZERO);
    let id = server.submit(msg).unwrap();
    let done = server.await_result(id, Duration::from_secs(1)).await.unwrap();

    assert_eq!(done.status, MessageStatus::TimedOut);
    assert_eq!(agent.calls(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_target_is_rejected() {
    let server = A2aServer::start(config()).unwrap();
    let id = server
        .submit(Message::new("orchestrator", "astrology", json!({})))
        .unwrap();
    let done = server.await_result(id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(done.status, MessageStatus::Rejected);
    assert!(done.error.unwrap().contains("Unknown agent"));
    server.shutdown().await;
}

#[tokio::test]
async fn test_await_unknown_id() {
    let server = A2aServer::start(config()).unwrap();
    let err = server
        .await_result(uuid::Uuid::new_v4(), Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::NotFound(_)));
    server.shutdown().await;
}

#[tokio::test]
async fn test_slow_agent_times_out_and_counts_against_breaker() {
    let server = A2aServer::start(config()).unwrap();
    server
        .register_agent("training", ["workout"], EchoAgent::slow(Duration::from_secs(5)))
        .unwrap();

    let msg = Message::new("orchestrator", "training", json!({}))
        .with_timeout(Duration::from_millis(50));
    let done = server.call(msg).await.unwrap();

    assert_eq!(done.status, MessageStatus::TimedOut);
    let outcome = done.outcome("training").unwrap();
    assert_eq!(outcome.failure, Some(FailureKind::TimedOut));
    assert_eq!(server.breakers()[0].failure_count, 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_breaker_opens_and_stops_calls() {
    let mut cfg = config();
    cfg.breaker.failure_threshold = 3;
    cfg.breaker.reset_timeout_ms = 60_000;
    let monitor = Arc::new(BrokerMonitor::new());
    let server = A2aServer::start_with_telemetry(cfg, monitor.clone()).unwrap();
    let agent = Arc::new(FailingAgent {
        calls: AtomicU32::new(0),
    });
    server.register_agent("biometrics", ["hrv"], agent.clone()).unwrap();

    for _ in 0..3 {
        let done = server
            .call(Message::new("orchestrator", "biometrics", json!({})))
            .await
            .unwrap();
        assert_eq!(done.status, MessageStatus::Failed);
    }
    assert_eq!(server.breaker_state("biometrics"), BreakerState::Open);

    for _ in 0..5 {
        let done = server
            .call(Message::new("orchestrator", "biometrics", json!({})))
            .await
            .unwrap();
        assert_eq!(done.status, MessageStatus::Failed);
        assert_eq!(
            done.outcome("biometrics").unwrap().failure,
            Some(FailureKind::CircuitOpen)
        );
    }
    assert_eq!(agent.calls.load(Ordering::SeqCst), 3);

    let metrics = monitor.agent("biometrics").unwrap();
    assert_eq!(metrics.failures, 3);
    assert_eq!(metrics.circuit_rejections, 5);
    assert_eq!(metrics.breaker_state, Some(BreakerState::Open));

    let info = &server.registered_agents()[0];
    assert!(!info.available);
    server.shutdown().await;
}

#[tokio::test]
async fn test_breaker_recovers_after_reset_timeout() {
    let mut cfg = config();
    cfg.breaker.failure_threshold = 1;
    cfg.breaker.reset_timeout_ms = 50;
    let server = A2aServer::start(cfg).unwrap();
    let flaky = Arc::new(FailingAgent {
        calls: AtomicU32::new(0),
    });
    server.register_agent("recovery", ["sleep"], flaky).unwrap();

    let done = server
        .call(Message::new("orchestrator", "recovery", json!({})))
        .await
        .unwrap();
    assert_eq!(done.status, MessageStatus::Failed);
    assert_eq!(server.breaker_state("recovery"), BreakerState::Open);

    // Replace with a healthy implementation; the breaker state is per id.
    server
        .register_agent("recovery", ["sleep"], EchoAgent::new())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let done = server
        .call(Message::new("orchestrator", "recovery", json!({})))
        .await
        .unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(server.breaker_state("recovery"), BreakerState::Closed);
    server.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_partial_success() {
    let server = A2aServer::start(config()).unwrap();
    server
        .register_agent("nutrition", ["wellness"], EchoAgent::new())
        .unwrap();
    server
        .register_agent("training", ["wellness"], EchoAgent::slow(Duration::from_secs(5)))
        .unwrap();
    server
        .register_agent("recovery", ["wellness"], EchoAgent::new())
        .unwrap();

    let msg = Message::new("orchestrator", Target::capability("wellness"), json!({ "q": 1 }))
        .with_timeout(Duration::from_millis(200));
    let done = server.call(msg).await.unwrap();

    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(done.outcomes.len(), 3);
    let failed: Vec<&str> = done
        .outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.agent_id.as_str())
        .collect();
    assert_eq!(failed, vec!["training"]);
    assert_eq!(done.outcome("training").unwrap().status, MessageStatus::TimedOut);
    server.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_runs_targets_in_parallel() {
    let server = A2aServer::start(config()).unwrap();
    for id in ["a", "b", "c"] {
        server
            .register_agent(id, ["group"], EchoAgent::slow(Duration::from_millis(150)))
            .unwrap();
    }
    let start = std::time::Instant::now();
    let done = server
        .call(Message::new("orchestrator", "*:group", json!({})).with_timeout(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    assert!(start.elapsed() < Duration::from_millis(400));
    server.shutdown().await;
}

#[tokio::test]
async fn test_priority_order_at_dequeue() {
    let cfg = BrokerConfig {
        workers: 1,
        ..Default::default()
    };
    let server = A2aServer::start(cfg).unwrap();
    let recorder = Arc::new(RecordingAgent {
        seen: Mutex::new(Vec::new()),
    });
    server
        .register_agent("gate", ["gate"], EchoAgent::slow(Duration::from_millis(100)))
        .unwrap();
    server.register_agent("recorder", ["log"], recorder.clone()).unwrap();

    // Occupy the single worker so the next three are queued together.
    let gate = server.submit(Message::new("test", "gate", json!({}))).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut ids = Vec::new();
    for (label, priority) in [("A", Priority::Low), ("B", Priority::High), ("C", Priority::High)] {
        let msg = Message::new("test", "recorder", json!({ "label": label })).with_priority(priority);
        ids.push(server.submit(msg).unwrap());
    }

    server.await_result(gate, Duration::from_secs(2)).await.unwrap();
    for id in ids {
        server.await_result(id, Duration::from_secs(2)).await.unwrap();
    }
    assert_eq!(*recorder.seen.lock(), vec!["B", "C", "A"]);
    server.shutdown().await;
}

#[tokio::test]
async fn test_queue_full_is_backpressure() {
    let cfg = BrokerConfig {
        workers: 1,
        queue_capacity: 2,
        ..Default::default()
    };
    let server = A2aServer::start(cfg).unwrap();
    server
        .register_agent("gate", ["gate"], EchoAgent::slow(Duration::from_millis(200)))
        .unwrap();

    server.submit(Message::new("test", "gate", json!({}))).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.submit(Message::new("test", "gate", json!({}))).unwrap();
    server.submit(Message::new("test", "gate", json!({}))).unwrap();
    let err = server
        .submit(Message::new("test", "gate", json!({})))
        .unwrap_err();
    assert!(err.is_backpressure());
    assert_eq!(server.queue_depth(), 2);
    server.shutdown().await;
}

#[tokio::test]
async fn test_agent_can_consult_another_agent() {
    let server = A2aServer::start(config()).unwrap();
    server
        .register_agent("biometrics", ["hrv"], EchoAgent::new())
        .unwrap();
    let consulting = Arc::new(ConsultingAgent {
        client: server.client(),
        target: "biometrics".into(),
    });
    server.register_agent("training", ["workout"], consulting).unwrap();

    let done = server
        .call(Message::new("orchestrator", "training", json!({})).with_timeout(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    let payload = done.first_payload().unwrap();
    assert_eq!(payload["consulted"], "biometrics");
    assert_eq!(payload["status"], "completed");
    assert_eq!(payload["answer"]["agent"], "biometrics");
    server.shutdown().await;
}

fn consulting_pair(server: &Arc<A2aServer>) -> Arc<EchoAgent> {
    let recovery = EchoAgent::new();
    server
        .register_agent("recovery", ["sleep"], recovery.clone())
        .unwrap();
    let training = Arc::new(ConsultingAgent {
        client: server.client(),
        target: "recovery".into(),
    });
    server.register_agent("training", ["workout"], training).unwrap();
    recovery
}

#[tokio::test]
async fn test_consultation_with_single_worker() {
    let cfg = BrokerConfig {
        workers: 1,
        ..Default::default()
    };
    let server = A2aServer::start(cfg).unwrap();
    let recovery = consulting_pair(&server);

    let done = server
        .call(Message::new("orchestrator", "training", json!({})).with_timeout(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(done.first_payload().unwrap()["status"], "completed");
    assert_eq!(recovery.calls(), 1);
    assert_eq!(server.breaker_state("training"), BreakerState::Closed);
    assert_eq!(server.tracked_messages(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_consultations_fill_every_worker() {
    let cfg = BrokerConfig {
        workers: 2,
        ..Default::default()
    };
    let server = A2aServer::start(cfg).unwrap();
    let recovery = consulting_pair(&server);

    let ids: Vec<_> = (0..2)
        .map(|_| {
            server
                .submit(
                    Message::new("orchestrator", "training", json!({}))
                        .with_timeout(Duration::from_millis(800)),
                )
                .unwrap()
        })
        .collect();
    for id in ids {
        let done = server.await_result(id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(done.status, MessageStatus::Completed, "error: {:?}", done.error);
        assert_eq!(done.first_payload().unwrap()["answer"]["agent"], "recovery");
    }
    assert_eq!(recovery.calls(), 2);
    assert_eq!(server.breaker_state("training"), BreakerState::Closed);
    server.shutdown().await;
}

#[tokio::test]
async fn test_cancel_withdraws_queued_message() {
    let cfg = BrokerConfig {
        workers: 1,
        ..Default::default()
    };
    let server = A2aServer::start(cfg).unwrap();
    server
        .register_agent("gate", ["gate"], EchoAgent::slow(Duration::from_millis(100)))
        .unwrap();
    let nutrition = EchoAgent::new();
    server
        .register_agent("nutrition", ["diet"], nutrition.clone())
        .unwrap();

    let in_flight = server.submit(Message::new("test", "gate", json!({}))).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let queued = server.submit(Message::new("test", "nutrition", json!({}))).unwrap();

    assert!(!server.cancel(in_flight));
    assert!(server.cancel(queued));
    assert!(!server.cancel(queued));
    assert_eq!(server.queue_depth(), 0);
    assert!(matches!(server.status(queued), Err(BusError::NotFound(_))));

    let done = server.await_result(in_flight, Duration::from_secs(1)).await.unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(nutrition.calls(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_consultation_depth_is_bounded() {
    let cfg = BrokerConfig {
        max_consult_depth: 1,
        ..config()
    };
    let server = A2aServer::start(cfg).unwrap();
    let request = AgentRequest {
        message_id: uuid::Uuid::new_v4(),
        source_agent: "orchestrator".into(),
        agent_id: "training".into(),
        payload: json!({}),
        deadline: chrono::Utc::now() + chrono::Duration::seconds(5),
        depth: 1,
    };
    let err = server
        .consult(&request, "biometrics", json!({}), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ConsultDepth { max_depth: 1 }));
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_pending_and_new_work() {
    let cfg = BrokerConfig {
        workers: 1,
        ..Default::default()
    };
    let server = A2aServer::start(cfg).unwrap();
    server
        .register_agent("gate", ["gate"], EchoAgent::slow(Duration::from_millis(100)))
        .unwrap();

    let in_flight = server.submit(Message::new("test", "gate", json!({}))).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let pending = server.submit(Message::new("test", "gate", json!({}))).unwrap();

    server.shutdown().await;
    assert!(!server.is_running());

    let done = server.await_result(in_flight, Duration::from_secs(1)).await.unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    let rejected = server.await_result(pending, Duration::from_secs(1)).await.unwrap();
    assert_eq!(rejected.status, MessageStatus::Rejected);

    assert!(matches!(
        server.submit(Message::new("test", "gate", json!({}))),
        Err(BusError::Shutdown)
    ));
}

#[tokio::test]
async fn test_await_timeout_keeps_message() {
    let server = A2aServer::start(config()).unwrap();
    server
        .register_agent("training", ["workout"], EchoAgent::slow(Duration::from_millis(150)))
        .unwrap();
    let id = server
        .submit(Message::new("test", "training", json!({})).with_timeout(Duration::from_secs(2)))
        .unwrap();

    let err = server.await_result(id, Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(err, BusError::AwaitTimeout(_)));
    assert!(server.status(id).is_ok());

    let done = server.await_result(id, Duration::from_secs(2)).await.unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    server.shutdown().await;
}

#[tokio::test]
async fn test_deregistered_agent_becomes_unknown() {
    let server = A2aServer::start(config()).unwrap();
    server.register_agent("nutrition", ["diet"], EchoAgent::new()).unwrap();
    assert!(server.deregister_agent("nutrition"));
    assert!(!server.deregister_agent("nutrition"));

    let done = server
        .call(Message::new("test", "nutrition", json!({})))
        .await
        .unwrap();
    assert_eq!(done.status, MessageStatus::Rejected);
    server.shutdown().await;
}
