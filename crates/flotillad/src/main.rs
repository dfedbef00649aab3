//! flotillad — the flotilla daemon.
//!
//! Single binary that assembles the control-plane subsystems:
//! - Ledger (redb)
//! - Provider client
//! - Account pool + provisioning workflow + deletion service
//! - Maintenance reconciler (background timer)
//!
//! The HTTP front end lives outside this process and calls the
//! provisioning entry points as a library; flotillad hosts the
//! long-running reconciliation loop.
//!
//! # Usage
//!
//! ```text
//! flotillad run --config /etc/flotilla/flotilla.toml
//! ```

mod billing;
mod catalog;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use crate::billing::HttpBilling;
use crate::catalog::StaticCatalog;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "/etc/flotilla/flotilla.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flotillad=debug,flotilla=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(&Config::load(&config)?).await,
    }
}

async fn run(config: &Config) -> anyhow::Result<()> {
    info!("flotilla daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("flotilla.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let ledger = flotilla_state::Ledger::open(&db_path)?;
    info!(path = ?db_path, "ledger opened");

    let provider: Arc<dyn flotilla_provider::ProviderApi> =
        Arc::new(flotilla_provider::HttpProvider::new(config.provider_config())?);
    info!(base_url = %config.provider.base_url, "provider client initialized");

    let pool = flotilla_pool::AccountPool::new(ledger.clone(), provider.clone());
    let workflow = flotilla_deploy::ProvisioningWorkflow::new(
        ledger.clone(),
        pool,
        provider.clone(),
        flotilla_deploy::WorkflowConfig {
            remote_name_suffix: config.provider.name_suffix.clone(),
        },
    );
    let deleter = flotilla_deploy::DeletionService::new(ledger.clone(), provider.clone());
    info!("provisioning workflow initialized");

    let billing = Arc::new(HttpBilling::new(
        &config.billing.base_url,
        Duration::from_secs(config.billing.request_timeout_secs),
    )?);
    let catalog = Arc::new(StaticCatalog::new(config.workload_costs()));

    let reconciler = Arc::new(flotilla_reconciler::MaintenanceReconciler::new(
        ledger.clone(),
        provider.clone(),
        workflow,
        deleter,
        billing,
        catalog,
        config.reconciler_config(),
    ));
    info!(
        sweep_interval_secs = config.reconciler.sweep_interval_secs,
        "maintenance reconciler initialized"
    );

    // ── Start the reconciler loop ──────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler_handle = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler.run(shutdown_rx).await;
        })
    };

    // ── Wait for shutdown ──────────────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = reconciler_handle.await;
    info!("flotilla daemon stopped");
    Ok(())
}
