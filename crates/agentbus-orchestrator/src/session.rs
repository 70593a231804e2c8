use agentbus_core::BusResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// One answered request within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub request_id: Uuid,
    pub user_id: Option<String>,
    pub question: String,
    pub answer: serde_json::Value,
    /// Agents that contributed to the answer.
    pub agents: Vec<String>,
    pub at: DateTime<Utc>,
}

/// Conversation context supplier. The orchestrator embeds whatever it returns
/// into message payloads without interpreting it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Recent exchanges of a session, oldest first. Unknown sessions are empty.
    async fn load_context(&self, session_id: &str) -> BusResult<Vec<Exchange>>;
    async fn record_exchange(&self, session_id: &str, exchange: Exchange) -> BusResult<()>;
}

/// Keeps the last `max_history` exchanges per session in memory.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, VecDeque<Exchange>>>,
    max_history: usize,
}

impl InMemorySessionStore {
    pub const DEFAULT_HISTORY: usize = 10;

    pub fn new() -> Self {
        Self::with_history(Self::DEFAULT_HISTORY)
    }

    pub fn with_history(max_history: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_context(&self, session_id: &str) -> BusResult<Vec<Exchange>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn record_exchange(&self, session_id: &str, exchange: Exchange) -> BusResult<()> {
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push_back(exchange);
        while history.len() > self.max_history {
            history.pop_front();
        }
        Ok(())
    }
}
