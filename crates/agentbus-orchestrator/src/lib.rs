//! Fan-out/fan-in orchestration over the agentbus broker.
//!
//! Turns one user request into messages for the relevant specialized agents,
//! awaits them under a single deadline, and merges the answers into one
//! [`OrchestrationResult`], reporting agents that did not answer as partial
//! failures.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Classify, submit, await and combine.
//! - [`IntentClassifier`] / [`KeywordClassifier`]: Request to agent relevance scores.
//! - [`AgentProfile`]: Agent id, capabilities and routing keywords.
//! - [`SessionStore`] / [`InMemorySessionStore`]: Conversation context supplier.
//! - [`OrchestratorConfig`]: Threshold, deadline, fan-out cap and retry policy.

/// Intent classification.
pub mod classifier;
/// Response combination.
pub mod combine;
/// Orchestrator configuration.
pub mod config;
/// The orchestration engine.
pub mod engine;
/// Default fitness agent profiles.
pub mod profiles;
/// Conversation context storage.
pub mod session;
/// Request and result types.
pub mod types;

pub use classifier::{IntentClassifier, KeywordClassifier, StaticClassifier};
pub use combine::{combine, Contribution};
pub use config::{OrchestratorConfig, RetryPolicy};
pub use engine::{Orchestrator, ORCHESTRATOR_ID};
pub use profiles::{default_profiles, AgentProfile};
pub use session::{Exchange, InMemorySessionStore, SessionStore};
pub use types::{AgentOutcome, OrchestrationRequest, OrchestrationResult};
