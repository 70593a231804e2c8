//! Core types and error definitions for the agentbus A2A broker.
//!
//! This crate provides the foundational types shared across all agentbus
//! crates: the error taxonomy, the inter-agent [`Message`], and the [`Agent`]
//! invocation trait that every specialized agent implements.
//!
//! # Main types
//!
//! - [`BusError`]: Unified error enum (backpressure, unknown agent, open circuit, ...).
//! - [`BusResult`]: Convenience alias for `Result<T, BusError>`.
//! - [`Message`]: A unit of inter-agent communication with priority and deadline.
//! - [`Target`]: A specific agent or a capability broadcast.
//! - [`Agent`]: Invocation handle implemented by each specialized agent.

/// Agent invocation trait and request envelope.
pub mod agent;
/// Error taxonomy.
pub mod error;
/// Messages, priorities, statuses and per-target outcomes.
pub mod message;

pub use agent::{Agent, AgentRequest};
pub use error::{BusError, BusResult};
pub use message::{
    deadline_after, remaining_until, FailureKind, Message, MessageStatus, PartialFailure,
    Priority, Target, TargetOutcome, DEFAULT_TIMEOUT,
};
