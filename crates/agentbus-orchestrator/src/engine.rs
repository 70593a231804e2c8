use crate::classifier::{IntentClassifier, KeywordClassifier};
use crate::combine::{combine, Contribution};
use crate::config::OrchestratorConfig;
use crate::profiles::{default_profiles, AgentProfile};
use crate::session::{Exchange, InMemorySessionStore, SessionStore};
use crate::types::{AgentOutcome, OrchestrationRequest, OrchestrationResult};
use agentbus_broker::A2aServer;
use agentbus_core::{
    deadline_after, remaining_until, Agent, BusError, BusResult, FailureKind, Message, MessageStatus,
    PartialFailure, Target,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Source id stamped on every message the orchestrator submits.
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Fan-out/fan-in front of the broker.
///
/// Classifies a request, submits one message per relevant agent, awaits all
/// of them under one deadline and merges what came back.
pub struct Orchestrator {
    server: Arc<A2aServer>,
    classifier: Arc<dyn IntentClassifier>,
    sessions: Arc<dyn SessionStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator using the default profiles' keyword classifier
    /// and an in-memory session store.
    pub fn new(server: Arc<A2aServer>, config: OrchestratorConfig) -> BusResult<Self> {
        config.validate()?;
        Ok(Self {
            server,
            classifier: Arc::new(KeywordClassifier::from_profiles(&default_profiles())),
            sessions: Arc::new(InMemorySessionStore::new()),
            config,
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Classify with keywords taken from `profiles`.
    pub fn with_profiles(self, profiles: &[AgentProfile]) -> Self {
        self.with_classifier(Arc::new(KeywordClassifier::from_profiles(profiles)))
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn server(&self) -> &Arc<A2aServer> {
        &self.server
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register an agent with the broker under the profile's id and capabilities.
    pub fn register_profile(&self, profile: &AgentProfile, handle: Arc<dyn Agent>) -> BusResult<()> {
        self.server
            .register_agent(profile.agent_id.clone(), profile.capabilities.clone(), handle)
    }

    /// Answer one user request.
    ///
    /// Succeeds as long as one consulted agent answered; the others are listed
    /// in `partial_failures`. Fails with [`BusError::AllAgentsFailed`] when
    /// nobody answered and with [`BusError::QueueFull`] when the broker kept
    /// refusing submissions after all retries.
    pub async fn handle(&self, request: OrchestrationRequest) -> BusResult<OrchestrationResult> {
        let start = Instant::now();
        let request_id = Uuid::new_v4();

        let selected = self.select_agents(&request)?;
        let timeout = request
            .timeout()
            .unwrap_or_else(|| self.config.request_timeout());
        let deadline = deadline_after(Utc::now(), timeout).ok_or_else(|| {
            BusError::Config(format!(
                "request timeout of {}ms is out of range",
                timeout.as_millis()
            ))
        })?;

        info!(
            request_id = %request_id,
            agents = ?selected.iter().map(|(a, _)| a.as_str()).collect::<Vec<_>>(),
            timeout_ms = timeout.as_millis() as u64,
            "Orchestrator: fanning out"
        );

        let context = self.load_context(&request).await?;
        let priority = request.priority.unwrap_or(self.config.priority);

        let mut pending = Vec::with_capacity(selected.len());
        for (agent_id, score) in selected {
            let payload = json!({
                "request_id": request_id,
                "query": request.text,
                "user_id": request.user_id,
                "session_id": request.session_id,
                "context": context,
                "relevance": score,
            });
            let message = Message::new(ORCHESTRATOR_ID, Target::Agent(agent_id.clone()), payload)
                .with_priority(priority)
                .with_deadline(deadline);
            match self.submit_with_retry(message, deadline).await {
                Ok(message_id) => pending.push((agent_id, score, message_id)),
                Err(err) => {
                    // The caller gets a hard error; nothing already queued may still run.
                    let cancelled = pending
                        .iter()
                        .filter(|(_, _, id)| self.server.cancel(*id))
                        .count();
                    warn!(
                        request_id = %request_id,
                        agent = %agent_id,
                        cancelled,
                        submitted = pending.len(),
                        error = %err,
                        "Orchestrator: fan-out aborted"
                    );
                    return Err(err);
                }
            }
        }

        // Correlate by message id; completion order is irrelevant.
        let results = join_all(pending.iter().map(|(_, _, id)| {
            let wait = remaining_until(deadline).unwrap_or_default();
            self.server.await_result(*id, wait)
        }))
        .await;

        let mut outcomes = BTreeMap::new();
        let mut contributions = Vec::new();
        let mut partial_failures = Vec::new();
        for ((agent_id, score, message_id), result) in pending.into_iter().zip(results) {
            let outcome = match result {
                Ok(message) => outcome_from_message(&agent_id, score, &message),
                Err(err) => outcome_from_error(message_id, score, &err),
            };
            match &outcome.payload {
                Some(payload) if outcome.is_success() => contributions.push(Contribution {
                    agent_id: agent_id.clone(),
                    score,
                    order: self.registration_order(&agent_id),
                    payload: payload.clone(),
                }),
                _ => {
                    debug!(request_id = %request_id, agent = %agent_id, status = %outcome.status, "Agent did not contribute");
                    partial_failures.push(PartialFailure {
                        agent_id: agent_id.clone(),
                        kind: outcome.failure.unwrap_or(FailureKind::Rejected),
                        detail: outcome.error.clone().unwrap_or_default(),
                    });
                }
            }
            outcomes.insert(agent_id, outcome);
        }

        if contributions.is_empty() {
            warn!(request_id = %request_id, failed = partial_failures.len(), "Orchestrator: no agent answered");
            return Err(BusError::AllAgentsFailed {
                failures: partial_failures,
            });
        }

        let unavailable_capabilities = self.unavailable_capabilities(&partial_failures);
        let responders: Vec<String> = contributions.iter().map(|c| c.agent_id.clone()).collect();
        let combined = combine(contributions);

        if let Some(session_id) = &request.session_id {
            let exchange = Exchange {
                request_id,
                user_id: request.user_id.clone(),
                question: request.text.clone(),
                answer: combined.clone(),
                agents: responders,
                at: Utc::now(),
            };
            if let Err(e) = self.sessions.record_exchange(session_id, exchange).await {
                warn!(request_id = %request_id, session = %session_id, error = %e, "Failed to record exchange");
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            answered = outcomes.len() - partial_failures.len(),
            failed = partial_failures.len(),
            duration_ms,
            "Orchestrator: request complete"
        );

        Ok(OrchestrationResult {
            request_id,
            outcomes,
            combined,
            partial_failures,
            unavailable_capabilities,
            duration_ms,
        })
    }

    /// Agents above the threshold, best first, capped at `max_agents`.
    fn select_agents(&self, request: &OrchestrationRequest) -> BusResult<Vec<(String, f32)>> {
        let threshold = self.config.relevance_threshold;
        let mut selected: Vec<(String, f32)> = self
            .classifier
            .classify(request)
            .into_iter()
            .filter(|(_, score)| score.is_finite() && *score >= threshold)
            .collect();
        selected.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.registration_order(&a.0).cmp(&self.registration_order(&b.0)))
                .then_with(|| a.0.cmp(&b.0))
        });
        selected.truncate(self.config.max_agents);

        if selected.is_empty() {
            match &self.config.fallback_agent {
                Some(fallback) => {
                    debug!(agent = %fallback, "No agent above threshold, using fallback");
                    selected.push((fallback.clone(), 0.0));
                }
                None => {
                    warn!("No agent above the relevance threshold and no fallback configured");
                    return Err(BusError::AllAgentsFailed {
                        failures: Vec::new(),
                    });
                }
            }
        }
        Ok(selected)
    }

    async fn load_context(&self, request: &OrchestrationRequest) -> BusResult<Value> {
        let Some(session_id) = &request.session_id else {
            return Ok(Value::Null);
        };
        match self.sessions.load_context(session_id).await {
            Ok(history) => Ok(serde_json::to_value(history)?),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Failed to load session context");
                Ok(Value::Null)
            }
        }
    }

    /// Submit, backing off while the broker reports `QueueFull`. Backoff never
    /// sleeps past `deadline`; once it is reached the last error is returned.
    async fn submit_with_retry(
        &self,
        message: Message,
        deadline: DateTime<Utc>,
    ) -> BusResult<Uuid> {
        let policy = &self.config.submit_retry;
        let mut attempt = 0;
        loop {
            match self.server.submit(message.clone()) {
                Ok(id) => return Ok(id),
                Err(err) if err.is_backpressure() && attempt < policy.max_retries => {
                    let Some(remaining) = remaining_until(deadline) else {
                        return Err(err);
                    };
                    let delay = policy.backoff(attempt).min(remaining);
                    warn!(
                        target_agent = %message.target,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Broker queue full, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn registration_order(&self, agent_id: &str) -> u64 {
        self.server.registration_order(agent_id).unwrap_or(u64::MAX)
    }

    fn unavailable_capabilities(&self, failures: &[PartialFailure]) -> Vec<String> {
        let mut unavailable = BTreeSet::new();
        for failure in failures {
            let capabilities = self.server.capabilities_of(&failure.agent_id);
            if capabilities.is_empty() {
                unavailable.insert(failure.agent_id.clone());
            } else {
                unavailable.extend(capabilities);
            }
        }
        unavailable.into_iter().collect()
    }
}

fn outcome_from_message(agent_id: &str, score: f32, message: &Message) -> AgentOutcome {
    let target = message.outcome(agent_id);
    let status = target.map_or(message.status, |o| o.status);
    let failure = if status == MessageStatus::Completed {
        None
    } else {
        Some(
            target
                .and_then(|o| o.failure)
                .unwrap_or_else(|| failure_for_status(status)),
        )
    };
    AgentOutcome {
        message_id: Some(message.id),
        score,
        status,
        payload: target.and_then(|o| o.payload.clone()),
        failure,
        error: target
            .and_then(|o| o.error.clone())
            .or_else(|| message.error.clone()),
        latency_ms: target.map_or(0, |o| o.latency_ms),
    }
}

/// The request deadline passed (or the broker lost the message) before a
/// terminal status was observed.
fn outcome_from_error(message_id: Uuid, score: f32, err: &BusError) -> AgentOutcome {
    let failure = FailureKind::from_error(err);
    AgentOutcome {
        message_id: Some(message_id),
        score,
        status: if failure == FailureKind::TimedOut {
            MessageStatus::TimedOut
        } else {
            MessageStatus::Failed
        },
        payload: None,
        failure: Some(failure),
        error: Some(err.to_string()),
        latency_ms: 0,
    }
}

fn failure_for_status(status: MessageStatus) -> FailureKind {
    match status {
        MessageStatus::TimedOut => FailureKind::TimedOut,
        MessageStatus::Failed => FailureKind::Invocation,
        _ => FailureKind::Rejected,
    }
}
