//! Stackforge - provisioning engine for distributed-system stacks
//!
//! This is the main CLI entry point for Stackforge.

use clap::{Parser, Subcommand};
use stackforge::config::{EngineConfig, FabricKind};
use stackforge::error::Result;
use stackforge::fabric::{Fabric, LocalFabric, MemoryFabric};
use stackforge::orchestrator::{Engine, ManageAction, StackOrchestrator};
use stackforge::personality::PersonalityRegistry;
use stackforge::store::{DocumentStore, HttpStore, MemoryStore, StateStore};
use stackforge::template::StackTemplate;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Stackforge - multi-node stack provisioning engine
#[derive(Parser)]
#[command(name = "stackforge")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Provision multi-node distributed-system stacks from templates", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Engine config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a stack from a template file
    Create {
        /// Template file (YAML)
        template: PathBuf,
        /// Template id; defaults to the file stem
        #[arg(long)]
        id: Option<String>,
        /// SSH key reference handed to the fabric
        #[arg(long)]
        key: Option<String>,
    },

    /// List stacks
    #[command(name = "ps")]
    Ps {
        /// Only show stack ids
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show one stack as JSON
    Inspect {
        /// Stack id
        stack: String,
    },

    /// Stop a running stack
    Stop {
        /// Stack id
        stack: String,
    },

    /// Restart a stopped stack
    Restart {
        /// Stack id
        stack: String,
    },

    /// Remove a stopped stack
    #[command(name = "rm")]
    Remove {
        /// Stack id
        stack: String,
    },

    /// Snapshot a running or stopped stack
    Snapshot {
        /// Stack id
        stack: String,
    },

    /// Create a new stack from a snapshot's committed images
    Restore {
        /// Snapshot id
        snapshot: String,
        /// SSH key reference handed to the fabric
        #[arg(long)]
        key: Option<String>,
    },
}

fn build_engine(config: &EngineConfig) -> Engine {
    let store: Arc<dyn DocumentStore> = match &config.store_url {
        Some(url) => Arc::new(HttpStore::new(url)),
        None => Arc::new(MemoryStore::new()),
    };
    let fabric: Arc<dyn Fabric> = match config.fabric {
        FabricKind::Local => {
            Arc::new(LocalFabric::new(&config.runtime_socket, &config.login_user))
        }
        FabricKind::Memory => Arc::new(MemoryFabric::new()),
    };
    let orchestrator = StackOrchestrator::new(
        StateStore::new(store),
        fabric,
        Arc::new(PersonalityRegistry::with_builtins()),
    )
    .with_staging_dir(config.staging_dir.clone());
    Engine::new(Arc::new(orchestrator), config.queue_depth)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli.config.unwrap_or_else(EngineConfig::default_path);
    let config = EngineConfig::load(&config_path)?;
    let engine = build_engine(&config);

    match cli.command {
        Commands::Create { template, id, key } => {
            let template_id = id.unwrap_or_else(|| {
                template
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "template".to_string())
            });
            let content = std::fs::read_to_string(&template)?;
            let parsed = StackTemplate::parse_str(&content)?;

            let stack = engine.create_stack(&template_id, parsed, key).await?;
            println!("{} {}", stack.id, stack.status);

            // drain the queue so the build finishes before exit
            let orchestrator = finish(engine).await;
            let built = orchestrator
                .store()
                .require_stack(&stack.id)
                .await?;
            println!("{} {}", built.id, built.status);
            return Ok(());
        }

        Commands::Ps { quiet } => {
            let stacks = engine.list_stacks().await?;
            if quiet {
                for stack in stacks {
                    println!("{}", stack.id);
                }
            } else {
                println!(
                    "{:<12} {:<16} {:<12} {:>8} {:>10} {:>9}",
                    "ID", "TEMPLATE", "STATUS", "BACKENDS", "CONNECTORS", "SNAPSHOTS"
                );
                for stack in stacks {
                    println!(
                        "{:<12} {:<16} {:<12} {:>8} {:>10} {:>9}",
                        stack.id,
                        stack.template_id,
                        stack.status.to_string(),
                        stack.backends.len(),
                        stack.connectors.len(),
                        stack.snapshot_count,
                    );
                }
            }
        }

        Commands::Inspect { stack } => {
            let stack = engine
                .orchestrator()
                .store()
                .require_stack(&stack)
                .await?;
            println!("{}", serde_json::to_string_pretty(&stack)?);
        }

        Commands::Stop { stack } => {
            report(engine.manage_stack(&stack, ManageAction::Stop).await?);
            let orchestrator = finish(engine).await;
            print_status(&orchestrator, &stack).await?;
            return Ok(());
        }

        Commands::Restart { stack } => {
            let restarting = engine.restart_stack(&stack).await?;
            println!("{} {}", restarting.id, restarting.status);
            let orchestrator = finish(engine).await;
            print_status(&orchestrator, &stack).await?;
            return Ok(());
        }

        Commands::Remove { stack } => {
            report(engine.manage_stack(&stack, ManageAction::Remove).await?);
            let orchestrator = finish(engine).await;
            print_status(&orchestrator, &stack).await?;
            return Ok(());
        }

        Commands::Snapshot { stack } => {
            report(engine.manage_stack(&stack, ManageAction::Snapshot).await?);
            let orchestrator = finish(engine).await;
            let snapshots = orchestrator.store().list_snapshots().await?;
            if let Some(latest) = snapshots
                .iter()
                .filter(|s| s.stack_id == stack)
                .max_by_key(|s| s.generation)
            {
                println!("{} generation {}", latest.id, latest.generation);
            }
            return Ok(());
        }

        Commands::Restore { snapshot, key } => {
            let stack = engine.restore_stack(&snapshot, key).await?;
            println!("{} {}", stack.id, stack.status);
            let orchestrator = finish(engine).await;
            print_status(&orchestrator, &stack.id).await?;
            return Ok(());
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Drain the work queue, keeping a handle on the orchestrator for final
/// status reads.
async fn finish(engine: Engine) -> Arc<StackOrchestrator> {
    let orchestrator = engine.orchestrator_handle();
    engine.shutdown().await;
    orchestrator
}

async fn print_status(orchestrator: &StackOrchestrator, stack_id: &str) -> Result<()> {
    let stack = orchestrator.store().require_stack(stack_id).await?;
    println!("{} {}", stack.id, stack.status);
    Ok(())
}

fn report(outcome: stackforge::orchestrator::ManageOutcome) {
    if outcome.status {
        println!("ok: {}", outcome.msg);
    } else {
        println!("rejected: {}", outcome.msg);
    }
}
