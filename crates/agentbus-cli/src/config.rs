use agentbus_broker::BrokerConfig;
use agentbus_core::{BusError, BusResult};
use agentbus_orchestrator::{default_profiles, AgentProfile, OrchestratorConfig};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Contents of `agentbus.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentbusConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub agents: Vec<SimulatedAgentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// One `[[agents]]` entry: a stand-in for a real specialized agent.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedAgentConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Simulated work per invocation.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Fail every n-th invocation.
    #[serde(default)]
    pub fail_every: Option<u32>,
    /// Reply template; `{agent}` and `{query}` are substituted.
    #[serde(default)]
    pub reply: Option<String>,
    /// Agent to ask for a second opinion through the broker.
    #[serde(default)]
    pub consult: Option<String>,
}

impl SimulatedAgentConfig {
    pub fn profile(&self) -> AgentProfile {
        AgentProfile::new(self.id.clone())
            .with_description(self.description.clone())
            .with_capabilities(self.capabilities.clone())
            .with_keywords(self.keywords.clone())
    }
}

impl From<AgentProfile> for SimulatedAgentConfig {
    fn from(profile: AgentProfile) -> Self {
        Self {
            id: profile.agent_id,
            description: profile.description,
            capabilities: profile.capabilities,
            keywords: profile.keywords,
            latency_ms: default_latency_ms(),
            fail_every: None,
            reply: None,
            consult: None,
        }
    }
}

impl AgentbusConfig {
    /// Read and parse a TOML file. An empty `[[agents]]` list means the
    /// built-in fitness line-up.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        let mut config: AgentbusConfig = toml::from_str(&raw)?;
        if config.agents.is_empty() {
            config.agents = builtin_agents();
        }
        Ok(config)
    }

    /// Configuration used when no file is present.
    pub fn builtin() -> Self {
        Self {
            orchestrator: OrchestratorConfig {
                fallback_agent: Some("general".into()),
                ..Default::default()
            },
            agents: builtin_agents(),
            ..Default::default()
        }
    }

    pub fn profiles(&self) -> Vec<AgentProfile> {
        self.agents.iter().map(SimulatedAgentConfig::profile).collect()
    }

    pub fn validate(&self) -> BusResult<()> {
        self.broker.validate()?;
        self.orchestrator.validate()?;

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(BusError::Config("agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(BusError::Config(format!("duplicate agent id '{}'", agent.id)));
            }
            if agent.fail_every == Some(0) {
                return Err(BusError::Config(format!(
                    "agent '{}': fail_every must be > 0",
                    agent.id
                )));
            }
        }
        for agent in &self.agents {
            if let Some(other) = &agent.consult {
                if other == &agent.id || !seen.contains(other.as_str()) {
                    return Err(BusError::Config(format!(
                        "agent '{}' consults unknown agent '{other}'",
                        agent.id
                    )));
                }
            }
        }
        if let Some(fallback) = &self.orchestrator.fallback_agent {
            if !seen.contains(fallback.as_str()) {
                return Err(BusError::Config(format!(
                    "fallback_agent '{fallback}' is not a configured agent"
                )));
            }
        }
        Ok(())
    }
}

fn builtin_agents() -> Vec<SimulatedAgentConfig> {
    default_profiles()
        .into_iter()
        .map(|profile| {
            let mut agent = SimulatedAgentConfig::from(profile);
            if agent.id == "training" {
                agent.consult = Some("recovery".into());
            }
            agent
        })
        .collect()
}

fn default_level() -> String {
    "info".to_string()
}
fn default_latency_ms() -> u64 {
    50
}
