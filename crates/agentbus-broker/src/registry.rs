use agentbus_core::{Agent, BusError, BusResult, Target};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// A registered agent: id, capability tags, and its invocation handle.
#[derive(Clone)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub capabilities: BTreeSet<String>,
    pub handle: Arc<dyn Agent>,
    pub registered_at: DateTime<Utc>,
    /// Monotonic registration order; kept when an agent is re-registered.
    pub order: u64,
}

impl AgentRegistration {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

impl fmt::Debug for AgentRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistration")
            .field("agent_id", &self.agent_id)
            .field("capabilities", &self.capabilities)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Central registry of invocable agents.
///
/// Lookups clone the handles out, so no lock is held while an agent runs.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentRegistration>>,
    next_order: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(0),
        }
    }

    /// Register (or replace) an agent. Returns `true` if it replaced one.
    pub fn register<I, S>(
        &self,
        agent_id: impl Into<String>,
        capabilities: I,
        handle: Arc<dyn Agent>,
    ) -> BusResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent_id = agent_id.into();
        if agent_id.is_empty() || agent_id.starts_with('*') {
            return Err(BusError::Config(format!("invalid agent id: '{agent_id}'")));
        }
        let capabilities: BTreeSet<String> = capabilities.into_iter().map(Into::into).collect();

        let mut agents = self.agents.write();
        let order = match agents.get(&agent_id) {
            Some(existing) => existing.order,
            None => self.next_order.fetch_add(1, Ordering::Relaxed),
        };
        info!(agent = %agent_id, capabilities = ?capabilities, "Registered agent");
        let replaced = agents
            .insert(
                agent_id.clone(),
                AgentRegistration {
                    agent_id,
                    capabilities,
                    handle,
                    registered_at: Utc::now(),
                    order,
                },
            )
            .is_some();
        Ok(replaced)
    }

    /// Remove an agent. Returns `false` if it was not registered.
    pub fn deregister(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().remove(agent_id).is_some();
        if removed {
            info!(agent = %agent_id, "Deregistered agent");
        }
        removed
    }

    /// Resolve a target to its registrations, in registration order.
    ///
    /// A specific agent that is not registered, or a broadcast that matches
    /// nobody, fails with [`BusError::UnknownAgent`].
    pub fn resolve(&self, target: &Target) -> BusResult<Vec<AgentRegistration>> {
        let agents = self.agents.read();
        match target {
            Target::Agent(id) => agents
                .get(id)
                .cloned()
                .map(|r| vec![r])
                .ok_or_else(|| BusError::UnknownAgent(id.clone())),
            Target::Broadcast { capability } => {
                let mut matched: Vec<AgentRegistration> = agents
                    .values()
                    .filter(|r| capability.as_deref().map_or(true, |c| r.has_capability(c)))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return Err(BusError::UnknownAgent(target.to_string()));
                }
                matched.sort_by_key(|r| r.order);
                Ok(matched)
            }
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRegistration> {
        self.agents.read().get(agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().contains_key(agent_id)
    }

    pub fn order_of(&self, agent_id: &str) -> Option<u64> {
        self.agents.read().get(agent_id).map(|r| r.order)
    }

    pub fn capabilities_of(&self, agent_id: &str) -> Vec<String> {
        self.agents
            .read()
            .get(agent_id)
            .map(|r| r.capabilities.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All registrations in registration order.
    pub fn list(&self) -> Vec<AgentRegistration> {
        let mut all: Vec<AgentRegistration> = self.agents.read().values().cloned().collect();
        all.sort_by_key(|r| r.order);
        all
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
