//! # SCA Orchestrator Server
//!
//! Runs the orchestrator receive loop and the reconciliation sweep until
//! Ctrl+C or SIGTERM.
//!
//! ## Usage
//!
//! ```bash
//! # Auto-detected environment, ./config
//! cargo run --bin sca-orchestrator
//!
//! # Explicit environment and configuration directory
//! sca-orchestrator --environment production --config-dir /etc/sca-orchestrator
//! ```
//!
//! Exits non-zero when configuration, the run store, or a broker cannot be
//! reached at startup.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info};

use sca_orchestrator::config::ConfigManager;
use sca_orchestrator::logging::init_tracing;
use sca_orchestrator::orchestration::OrchestrationSystem;

#[derive(Parser)]
#[command(name = "sca-orchestrator")]
#[command(about = "Run the SCA pipeline orchestrator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Environment to load (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory (default: ./config or ORCHESTRATOR_CONFIG_DIR)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        // Tracing may not be initialised if configuration failed to load
        eprintln!("sca-orchestrator: {e:#}");
        error!(error = %format!("{e:#}"), "Orchestrator exited with error");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let manager = match cli.environment {
        Some(environment) => ConfigManager::load_from_directory_with_env(cli.config_dir, &environment),
        None => ConfigManager::load_from_directory(cli.config_dir),
    }
    .context("failed to load configuration")?;

    init_tracing(&manager.config().logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %manager.environment(),
        build_mode = if cfg!(debug_assertions) { "debug" } else { "release" },
        "Starting SCA orchestrator"
    );

    let mut system = OrchestrationSystem::bootstrap(manager.config())
        .await
        .context("failed to bootstrap orchestration system")?;

    let status = system.status().await;
    info!(
        store_backend = status.store_backend,
        reconciliation = status.reconciliation_running,
        "Orchestrator ready; press Ctrl+C to shut down"
    );

    shutdown_signal().await?;
    info!("Shutdown signal received");

    system.stop().await.context("orchestrator did not stop cleanly")?;
    info!("Orchestrator shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;

    Ok(())
}
