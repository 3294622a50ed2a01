//! Orchestrator CLI
//!
//! Inspect request analysis and dependency waves, validate configuration, and
//! run requests end to end with dry-run workers.
//!
//! Usage:
//!   orchestrator analyze "find and fix the bug in parser.rs"
//!   orchestrator waves planning editing reviewing testing
//!   orchestrator capabilities
//!   orchestrator check
//!   orchestrator run "plan, implement and test the new API" --events

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_orchestrator::config::CONFIG_FILE_NAME;
use agent_orchestrator::{
    event_channel, CapabilityRegistry, CapabilityTag, DependencyResolver, Orchestrator,
    OrchestratorConfig, RequestContext, UserRequest, WorkflowEventSender,
};

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Multi-capability workflow orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: search for .orchestrator.toml)
    #[arg(long, env = "ORCHESTRATOR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the spawn decision for a description
    Analyze {
        /// Request description
        description: String,
    },
    /// Print the dependency waves for a set of capabilities
    Waves {
        /// Capability tags (e.g. planning editing testing)
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// List the dependency table
    Capabilities,
    /// Load and validate configuration
    Check,
    /// Process a request with dry-run workers
    Run {
        /// Request description
        description: String,

        /// Files attached to the request context
        #[arg(long = "files", short = 'f')]
        files: Vec<String>,

        /// Workspace root attached to the request context
        #[arg(long)]
        workspace_root: Option<String>,

        /// Print workflow events as JSON lines while running
        #[arg(long)]
        events: bool,
    },
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Wait for the event printer to drain; a failed printer only loses output
async fn finish_printer(printer: Option<tokio::task::JoinHandle<()>>) {
    if let Some(printer) = printer {
        if let Err(e) = printer.await {
            tracing::warn!("Event printer stopped abnormally: {}", e);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<OrchestratorConfig> {
    let config = match path {
        Some(path) => OrchestratorConfig::load_from_path(path)?,
        None => OrchestratorConfig::load()?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI first to get verbosity before initializing tracing
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Analyze { description } => {
            let engine = Orchestrator::new(config);
            let decision = engine.analyze(&UserRequest::new("cli", "command", description));
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }

        Commands::Waves { tags } => {
            let tags: Vec<CapabilityTag> = tags.into_iter().map(CapabilityTag::from).collect();
            let resolver = DependencyResolver::new(config.dependency_table());
            let waves = resolver.waves(&tags)?;

            for (i, wave) in waves.iter().enumerate() {
                let names: Vec<&str> = wave.iter().map(CapabilityTag::as_str).collect();
                println!("wave {}: {}", i, names.join(", "));
            }
        }

        Commands::Capabilities => {
            println!("Capabilities:\n");
            for (tag, deps) in config.dependency_table().iter() {
                if deps.is_empty() {
                    println!("  {}", tag);
                } else {
                    let names: Vec<&str> = deps.iter().map(CapabilityTag::as_str).collect();
                    println!("  {} (after {})", tag, names.join(", "));
                }
            }
        }

        Commands::Check => {
            println!("Configuration OK");
            println!("  max_concurrent_workers: {}", config.engine.max_concurrent_workers);
            match config.engine.worker_timeout() {
                Some(timeout) => println!("  worker_timeout: {}s", timeout.as_secs()),
                None => println!("  worker_timeout: disabled"),
            }
            println!("  dependency_failure: {:?}", config.engine.dependency_failure);
            println!("  capabilities: {}", config.dependency_table().len());
            if cli.config.is_none() {
                println!("\nSearched for {} from the current directory upwards", CONFIG_FILE_NAME);
            }
        }

        Commands::Run {
            description,
            files,
            workspace_root,
            events,
        } => {
            let request_id = format!("cli-{}", std::process::id());
            let request = UserRequest::new(request_id, "command", description).with_context(
                RequestContext {
                    files: (!files.is_empty()).then_some(files),
                    selection: None,
                    workspace_root,
                },
            );

            let mut engine = Orchestrator::new(config)
                .with_capabilities(CapabilityRegistry::new().with_dry_run());

            let printer = if events {
                let (tx, mut rx) = event_channel();
                engine = engine.with_event_sender(WorkflowEventSender::new(tx));
                Some(tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            println!("{}", line);
                        }
                    }
                }))
            } else {
                None
            };

            let result = engine.process_request(request).await;

            // Dropping the engine closes the event channel so the printer drains and exits
            drop(engine);
            finish_printer(printer).await;

            let result = result?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
