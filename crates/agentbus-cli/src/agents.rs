use crate::config::SimulatedAgentConfig;
use agentbus_broker::A2aClient;
use agentbus_core::{Agent, AgentRequest, BusError, BusResult, MessageStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

const DEFAULT_REPLY: &str = "{agent} coach: looked into \"{query}\"";

/// Stand-in for a specialized agent: sleeps, optionally fails on a schedule,
/// optionally asks another agent first, then answers from a template.
pub struct SimulatedAgent {
    id: String,
    latency: Duration,
    fail_every: Option<u32>,
    reply: String,
    consult: Option<(String, A2aClient)>,
    calls: AtomicU32,
}

impl SimulatedAgent {
    pub fn new(config: &SimulatedAgentConfig) -> Self {
        Self {
            id: config.id.clone(),
            latency: Duration::from_millis(config.latency_ms),
            fail_every: config.fail_every.filter(|n| *n > 0),
            reply: config.reply.clone().unwrap_or_else(|| DEFAULT_REPLY.to_string()),
            consult: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Wire up consultation if the config asks for it.
    pub fn with_client(mut self, config: &SimulatedAgentConfig, client: A2aClient) -> Self {
        self.consult = config.consult.clone().map(|target| (target, client));
        self
    }

    fn render(&self, query: &str) -> String {
        self.reply.replace("{agent}", &self.id).replace("{query}", query)
    }

    async fn second_opinion(&self, request: &AgentRequest, query: &str) -> Option<String> {
        let (target, client) = self.consult.as_ref()?;
        let budget = request.remaining()?.mul_f32(0.5);
        match client
            .consult(request, target.as_str(), json!({ "query": query }), budget)
            .await
        {
            Ok(message) if message.status == MessageStatus::Completed => message
                .first_payload()
                .and_then(|p| p["text"].as_str())
                .map(str::to_string),
            Ok(message) => {
                debug!(agent = %self.id, consulted = %target, status = %message.status, "Consultation did not complete");
                None
            }
            Err(e) => {
                debug!(agent = %self.id, consulted = %target, error = %e, "Consultation failed");
                None
            }
        }
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    async fn invoke(&self, request: AgentRequest) -> BusResult<Value> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_every.is_some_and(|n| call % n == 0) {
            return Err(BusError::invocation(
                &self.id,
                format!("simulated failure on call {call}"),
            ));
        }

        let query = request.payload["query"].as_str().unwrap_or_default().to_string();
        let mut text = self.render(&query);
        let consulted = self.second_opinion(&request, &query).await;
        if let Some(opinion) = &consulted {
            text = format!("{text} (second opinion: {opinion})");
        }
        let consulted = consulted.as_ref();

        Ok(json!({
            "agent": self.id,
            "text": text,
            "consulted": consulted.and(self.consult.as_ref().map(|(target, _)| target.as_str())),
            "call": call,
        }))
    }
}
