//! Agent-to-agent (A2A) message broker.
//!
//! Accepts [`Message`](agentbus_core::Message)s, orders them by priority,
//! dispatches them to registered agents behind per-agent circuit breakers,
//! and reports the terminal outcome to whoever awaits the message id.
//!
//! # Main types
//!
//! - [`A2aServer`]: Process-level broker: submit, await, register, shutdown.
//! - [`BoundedPriorityQueue`]: Capacity-limited priority + FIFO queue (backpressure).
//! - [`CircuitBreaker`] / [`BreakerBoard`]: Per-agent failure isolation.
//! - [`AgentRegistry`]: Agent ids, capabilities and invocation handles.
//! - [`Dispatcher`]: Worker pool executing messages with deadlines.
//! - [`TelemetrySink`] / [`BrokerMonitor`]: Fire-and-forget observations.

/// Per-agent circuit breakers.
pub mod breaker;
/// Broker configuration.
pub mod config;
/// Message dispatch worker pool.
pub mod dispatcher;
/// In-process metrics sink.
pub mod monitor;
/// Bounded priority queue.
pub mod queue;
/// Agent registry.
pub mod registry;
/// The A2A server facade and client handle.
pub mod server;
/// Authoritative message table.
pub mod table;
/// Telemetry sink trait and stock sinks.
pub mod telemetry;

pub use breaker::{BreakerBoard, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{BreakerConfig, BrokerConfig};
pub use dispatcher::{overall_status, Dispatcher};
pub use monitor::{AgentMetrics, BrokerMonitor, MonitorSnapshot, QueueMetrics};
pub use queue::BoundedPriorityQueue;
pub use registry::{AgentRegistration, AgentRegistry};
pub use server::{A2aClient, A2aServer, AgentInfo};
pub use table::MessageTable;
pub use telemetry::{FanoutTelemetry, NoopTelemetry, TelemetrySink, TracingTelemetry};
