mod agents;
mod config;

use agentbus_broker::{A2aServer, BrokerMonitor, FanoutTelemetry, TelemetrySink, TracingTelemetry};
use agentbus_core::Priority;
use agentbus_orchestrator::{OrchestrationRequest, Orchestrator};
use agents::SimulatedAgent;
use clap::{Parser, Subcommand};
use config::AgentbusConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "agentbus.toml";

#[derive(Parser)]
#[command(name = "agentbus", about = "agentbus: A2A message broker for fitness coaching agents")]
struct Cli {
    /// Path to config file (defaults to ./agentbus.toml, then built-in settings)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print a summary
    Check,
    /// List configured agents and their capabilities
    Agents,
    /// Run one question through the orchestrator
    Ask {
        question: String,
        /// critical, high, normal or low (overrides config)
        #[arg(long)]
        priority: Option<String>,
        /// Overall request deadline (overrides config)
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        session: Option<String>,
        /// Dispatcher workers (overrides config)
        #[arg(long)]
        workers: Option<usize>,
        /// Print broker metrics after the answer
        #[arg(long)]
        stats: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging.level, cli.json_logs || config.logging.json);

    match cli.command {
        Commands::Check => {
            config.validate()?;
            print_summary(&config);
        }
        Commands::Agents => {
            if config.agents.is_empty() {
                println!("No agents configured.");
                println!("Configure agents in {DEFAULT_CONFIG} under [[agents]]");
            } else {
                println!("Configured agents:");
                for agent in &config.agents {
                    println!("  {}: {}", agent.id, agent.description);
                    if !agent.capabilities.is_empty() {
                        println!("    capabilities: {}", agent.capabilities.join(", "));
                    }
                    if !agent.keywords.is_empty() {
                        println!("    keywords: {}", agent.keywords.join(", "));
                    }
                    if let Some(other) = &agent.consult {
                        println!("    consults: {other}");
                    }
                }
                println!("\nTotal: {} agent(s)", config.agents.len());
            }
        }
        Commands::Ask {
            question,
            priority,
            timeout_ms,
            user,
            session,
            workers,
            stats,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.broker.workers = workers;
            }
            config.validate()?;

            let mut request = OrchestrationRequest::new(question);
            request.priority = priority.as_deref().map(Priority::parse_level);
            request.timeout_ms = timeout_ms;
            request.user_id = user;
            request.session_id = session;

            ask(&config, request, stats).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AgentbusConfig> {
    match path {
        Some(path) => AgentbusConfig::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => AgentbusConfig::load(Path::new(DEFAULT_CONFIG)),
        None => Ok(AgentbusConfig::builtin()),
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_summary(config: &AgentbusConfig) {
    let broker = &config.broker;
    let orch = &config.orchestrator;
    println!("Configuration OK");
    println!(
        "  broker: capacity {}, {} worker(s), per-message concurrency {}, default timeout {}ms",
        broker.queue_capacity,
        broker.workers,
        broker
            .max_concurrency_per_message
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
        broker.default_timeout_ms,
    );
    println!(
        "  breaker: opens after {} failure(s), resets after {}ms",
        broker.breaker.failure_threshold, broker.breaker.reset_timeout_ms
    );
    println!(
        "  orchestrator: threshold {}, up to {} agent(s), deadline {}ms, fallback {}",
        orch.relevance_threshold,
        orch.max_agents,
        orch.request_timeout_ms,
        orch.fallback_agent.as_deref().unwrap_or("none"),
    );
    println!("  agents: {}", config.agents.len());
}

async fn ask(config: &AgentbusConfig, request: OrchestrationRequest, stats: bool) -> anyhow::Result<()> {
    let monitor = Arc::new(BrokerMonitor::new());
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(
        FanoutTelemetry::new(vec![Arc::new(TracingTelemetry)]).with(monitor.clone()),
    );
    let server = A2aServer::start_with_telemetry(config.broker.clone(), telemetry)?;

    for agent in &config.agents {
        let handle = SimulatedAgent::new(agent).with_client(agent, server.client());
        server.register_agent(agent.id.clone(), agent.capabilities.clone(), Arc::new(handle))?;
    }
    info!(agents = config.agents.len(), "Simulated agents registered");

    let orchestrator = Orchestrator::new(server.clone(), config.orchestrator.clone())?
        .with_profiles(&config.profiles());

    let outcome = orchestrator.handle(request).await;
    let printed = match &outcome {
        Ok(result) => serde_json::to_string_pretty(result)?,
        Err(e) => {
            error!(error = %e, "Request failed");
            serde_json::to_string_pretty(&serde_json::json!({ "error": e.to_string() }))?
        }
    };
    println!("{printed}");

    if stats {
        println!("{}", serde_json::to_string_pretty(&monitor.to_json())?);
    }

    if tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .is_err()
    {
        warn!("Broker did not stop within 5s");
    }

    outcome.map(|_| ()).map_err(Into::into)
}
