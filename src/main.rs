//! nodepool - elastic node-pool provisioning over an IaaS backend
//!
//! ## Usage
//!
//! ```bash
//! # Scale the pool to 4 nodes, waiting up to 30s for the scaling lock
//! nodepool --config pool.json scale --nodes 4
//!
//! # List the backend's instances for this pool
//! nodepool --config pool.json status
//!
//! # Tear everything down
//! nodepool --config pool.json shutdown
//! ```
//!
//! The config file is a JSON [`PoolConfig`]: backend URL, provider selection
//! and credentials, instance shape, and the scaling knobs.

use clap::{Parser, Subcommand};
use nodepool_orchestrator::{
    AcquireOutcome, BackendClient, InMemoryRegistry, InfrastructureOrchestrator, LoggingRuntime,
    NodeOverrides, NodePoolController, PoolConfig, RestBackend, StateStore,
    TemplateScriptGenerator, provider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Elastic node-pool provisioning over an IaaS backend
#[derive(Parser)]
#[command(name = "nodepool")]
#[command(about = "Elastic node-pool provisioning over an IaaS backend", long_about = None)]
struct Cli {
    /// Path to the pool configuration (JSON)
    #[arg(long, global = true, default_value = "pool.json")]
    config: PathBuf,

    /// Path to the persisted pool state
    #[arg(long, global = true, default_value = "pool-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scale the pool out to at least the given node count
    Scale {
        /// Requested node count
        #[arg(long)]
        nodes: u32,

        /// How long to wait for the scaling lock (milliseconds)
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },

    /// Provision the full configured pool size without waiting for nodes
    Provision,

    /// List the backend's instances for this pool
    Status,

    /// Delete the infrastructure and all its instances
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nodepool=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let cfg: PoolConfig = {
        let raw = std::fs::read_to_string(&cli.config)?;
        serde_json::from_str(&raw)?
    };

    match cli.command {
        Commands::Scale { nodes, timeout_ms } => {
            let controller = build_controller(cfg, &cli.state)?;
            let outcome = controller
                .acquire_nodes(
                    nodes,
                    Duration::from_millis(timeout_ms),
                    &NodeOverrides::default(),
                )
                .await?;
            match outcome {
                AcquireOutcome::Busy => {
                    warn!("pool is busy converging, re-issue the request later")
                }
                AcquireOutcome::Satisfied => info!("pool already satisfies the request"),
                AcquireOutcome::Deployed { instances, nodes } => {
                    info!(instances, nodes, "scale-out complete")
                }
                AcquireOutcome::RolledBack { instances } => warn!(
                    instances,
                    "nodes missed the registration deadline, capacity rolled back"
                ),
            }
        }

        Commands::Provision => {
            let controller = build_controller(cfg, &cli.state)?;
            controller.acquire_all_nodes().await?;
            info!("pool provisioning requested, nodes will register as they come up");
        }

        Commands::Status => {
            let orchestrator = build_orchestrator(&cfg)?;
            let listed = orchestrator.list_instances(&cfg.infrastructure_id).await?;
            info!(count = listed.len(), "instances known to the backend");
            for instance in listed {
                println!(
                    "{}\t{}\t{}",
                    instance.id,
                    instance.tag,
                    instance.status.unwrap_or_default()
                );
            }
        }

        Commands::Shutdown => {
            let controller = build_controller(cfg, &cli.state)?;
            controller.shut_down().await?;
            info!("infrastructure deleted");
        }
    }

    Ok(())
}

fn build_orchestrator(cfg: &PoolConfig) -> anyhow::Result<InfrastructureOrchestrator> {
    let transport = Arc::new(RestBackend::new(cfg.backend_url.clone())?);
    let client = BackendClient::new(transport);
    Ok(InfrastructureOrchestrator::new(
        client,
        provider::for_kind(cfg.provider),
    ))
}

fn build_controller(cfg: PoolConfig, state_path: &Path) -> anyhow::Result<NodePoolController> {
    let orchestrator = build_orchestrator(&cfg)?;
    let state = Arc::new(StateStore::open(state_path)?);
    Ok(NodePoolController::new(
        cfg,
        orchestrator,
        state,
        Arc::new(InMemoryRegistry::new()),
        Arc::new(LoggingRuntime),
        Arc::new(TemplateScriptGenerator),
    ))
}
