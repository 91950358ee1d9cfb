//! Burrow - Per-Conversation Sandboxed Agent Dispatcher
//!
//! Starts the dispatcher, sweeps orphaned workers, and manages conversation
//! registrations. The `run` command reads inbound batches as JSON lines on
//! stdin and writes replies as JSON lines on stdout, so a messaging-channel
//! adapter can drive the engine as a child process.

use anyhow::Result;
use burrow::channel::{InboundMessage, StdioChannel};
use burrow::config::BurrowConfig;
use burrow::ipc::IpcBridge;
use burrow::registry::{default_workspace, Conversation, ConversationRegistry, MountEntry, MountMode};
use burrow::runtime::{ContainerRuntime, DockerRuntime, RuntimeSupervisor};
use burrow::session::{GenerationLedger, MessageRouter, SessionCoordinator};
use burrow::store::JsonlMessageStore;
use burrow::trigger::TriggerConfig;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "burrow")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Per-Conversation Sandboxed Agent Dispatcher")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatcher (stdio channel adapter)
    Run,

    /// Reclaim orphaned workers and exit
    Sweep,

    /// Run diagnostics against the container runtime
    Doctor,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Register a conversation
    Register {
        /// Conversation address
        id: String,

        /// Workspace folder (defaults under the configured workspaces dir)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Required trigger word
        #[arg(long)]
        trigger: Option<String>,

        /// Match the trigger word case-sensitively
        #[arg(long)]
        case_sensitive: bool,
    },

    /// Deregister a conversation
    Deregister {
        /// Conversation address
        id: String,
    },

    /// List registered conversations
    Conversations,

    /// Allow a worker to access a host path
    AllowMount {
        /// Conversation address
        id: String,

        /// Host path to allow
        path: PathBuf,

        /// Mount read-write instead of read-only
        #[arg(long)]
        writable: bool,
    },
}

/// One stdin line feeding the router
#[derive(Debug, Deserialize)]
struct InboundBatch {
    conversation_id: String,
    messages: Vec<InboundMessage>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("burrow={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = if let Some(config_path) = cli.config {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content)?
    } else {
        BurrowConfig::default()
    };

    match cli.command {
        Commands::Run => run_dispatcher(config).await?,
        Commands::Sweep => run_sweep(config).await?,
        Commands::Doctor => run_doctor(config).await?,
        Commands::Config { default } => {
            let config = if default {
                BurrowConfig::default()
            } else {
                config
            };
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Register {
            id,
            workspace,
            trigger,
            case_sensitive,
        } => {
            let registry = load_registry(&config)?;
            let workspace = workspace
                .unwrap_or_else(|| default_workspace(&config.storage.workspaces_dir, &id));
            let mut conversation = Conversation::new(&id, workspace);
            if let Some(word) = trigger {
                conversation.trigger = TriggerConfig {
                    word: Some(word),
                    required: true,
                    case_sensitive,
                };
            }
            registry.register(conversation).await?;
            println!("Registered {}", id);
        }
        Commands::Deregister { id } => {
            let registry = load_registry(&config)?;
            match registry.deregister(&id).await? {
                Some(_) => println!("Deregistered {}", id),
                None => println!("Not registered: {}", id),
            }
        }
        Commands::Conversations => {
            let registry = load_registry(&config)?;
            let mut conversations = registry.list().await;
            conversations.sort_by(|a, b| a.id.cmp(&b.id));
            for conversation in conversations {
                let trigger = match &conversation.trigger.word {
                    Some(word) if conversation.trigger.required => word.as_str(),
                    _ => "(none)",
                };
                println!(
                    "{}\ttrigger={}\tworkspace={}",
                    conversation.id,
                    trigger,
                    conversation.workspace.display()
                );
            }
        }
        Commands::AllowMount { id, path, writable } => {
            let registry = load_registry(&config)?;
            let mode = if writable {
                MountMode::ReadWrite
            } else {
                MountMode::ReadOnly
            };
            registry
                .allow_mount(&id, MountEntry {
                    host_path: path.clone(),
                    mode,
                })
                .await?;
            println!("Allowed {} for {}", path.display(), id);
        }
    }

    Ok(())
}

fn load_registry(config: &BurrowConfig) -> Result<Arc<ConversationRegistry>> {
    config.storage.ensure_dirs()?;
    Ok(Arc::new(ConversationRegistry::load(
        config.storage.state_dir.join("conversations.json"),
    )?))
}

fn build_supervisor(config: &BurrowConfig) -> (Arc<RuntimeSupervisor>, Arc<IpcBridge>) {
    let bridge = Arc::new(IpcBridge::new(
        config.storage.ipc_dir.clone(),
        config.dispatch.poll_interval(),
    ));
    let runtime = Arc::new(DockerRuntime::new(config.runtime.cli.clone()));
    let supervisor = Arc::new(RuntimeSupervisor::new(
        runtime,
        bridge.clone(),
        config.runtime.clone(),
    ));
    (supervisor, bridge)
}

async fn run_sweep(config: BurrowConfig) -> Result<()> {
    config.storage.ensure_dirs()?;
    let (supervisor, _bridge) = build_supervisor(&config);
    let sweep = supervisor.reclaim_orphans().await?;
    println!("Stopped {}, removed {}", sweep.stopped, sweep.removed);
    Ok(())
}

async fn run_doctor(config: BurrowConfig) -> Result<()> {
    println!("Burrow doctor");
    println!("  container CLI: {}", config.runtime.cli);

    let runtime = DockerRuntime::new(config.runtime.cli.clone());
    match runtime.list(&format!("{}-", config.runtime.worker_prefix)).await {
        Ok(records) => {
            println!("  structured listing: ok ({} owned workers)", records.len());
            for record in records {
                println!("    {}\t{:?}", record.name, record.state);
            }
        }
        Err(e) => {
            println!("  structured listing: FAILED ({})", e);
            println!("  orphan reclamation cannot work until this is fixed");
        }
    }

    println!("  state dir: {}", config.storage.state_dir.display());
    println!("  worker image: {}", config.runtime.image);
    Ok(())
}

async fn run_dispatcher(config: BurrowConfig) -> Result<()> {
    config.storage.ensure_dirs()?;
    let registry = load_registry(&config)?;
    let (supervisor, bridge) = build_supervisor(&config);

    // The sweep must finish before any worker launches, or two generations
    // could race for the same workspace.
    let sweep = supervisor.reclaim_orphans().await?;
    tracing::info!(
        stopped = sweep.stopped,
        removed = sweep.removed,
        "Startup orphan sweep complete"
    );

    let ledger = Arc::new(GenerationLedger::load(
        config.storage.state_dir.join("generations.json"),
    )?);
    let coordinator = Arc::new(SessionCoordinator::new(
        supervisor,
        bridge,
        config.dispatch.clone(),
        ledger,
    ));
    let store = Arc::new(JsonlMessageStore::new(
        config.storage.state_dir.join("messages"),
    ));
    let router = Arc::new(MessageRouter::new(
        coordinator.clone(),
        registry.clone(),
        store,
        Arc::new(StdioChannel),
        config.dispatch.context_limit,
    ));

    tracing::info!("Dispatcher ready, reading batches from stdin");

    let stdin_router = router.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let batch: InboundBatch = match serde_json::from_str(&line) {
                        Ok(batch) => batch,
                        Err(e) => {
                            tracing::warn!("Malformed inbound line: {}", e);
                            continue;
                        }
                    };
                    let router = stdin_router.clone();
                    // Batches for different conversations must not block
                    // one another.
                    tokio::spawn(async move {
                        if let Err(e) = router
                            .on_inbound_batch(&batch.conversation_id, batch.messages)
                            .await
                        {
                            tracing::error!(
                                conversation_id = %batch.conversation_id,
                                "Failed to deliver outcome: {}",
                                e
                            );
                        }
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        _ = reader => {
            tracing::info!("Inbound stream closed");
        }
    }

    coordinator.shutdown().await;
    tracing::info!("All sessions drained, exiting");
    Ok(())
}
