use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podium_controller::cluster::KubeWorkloads;
use podium_controller::config::Config;
use podium_controller::db;
use podium_controller::ledger::PgLedger;
use podium_controller::reconcile::Reconciler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podium_controller=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Podium controller");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;

    info!(
        "Loaded configuration: namespace={}, tick_interval={:?}",
        config.namespace, config.tick_interval
    );

    // Connect to the job ledger
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    info!("Job ledger ready");

    // Connect to the cluster control plane (in-cluster config first,
    // kubeconfig fallback)
    let client = kube::Client::try_default()
        .await
        .context("Failed to initialize cluster client")?;

    let ledger = Arc::new(PgLedger::new(pool));
    let workloads = Arc::new(KubeWorkloads::new(client, &config));

    let reconciler = Reconciler::new(config, ledger, workloads);

    info!("Controller initialized, entering reconciliation loop");

    tokio::select! {
        result = reconciler.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
            Ok(())
        }
    }
}
