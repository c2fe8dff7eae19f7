//! Blocktasks: ingests contract logs from Base mainnet into PostgreSQL.
//!
//! Flow:
//! 1. Load settings, connect to PostgreSQL and apply migrations
//! 2. Build the JSON-RPC client for each enabled monitor
//! 3. Run the monitors under a supervisor until Ctrl-C or the first failure

use std::sync::Arc;

use eyre::Result;
use tokio_util::sync::CancellationToken;

use blocktasks_chain::{HttpGateway, RpcChain};
use blocktasks_core::{Settings, telemetry};
use blocktasks_storage::{self as storage, PgRepository};
use blocktasks_tasks::{LogMonitor, Supervisor, TASK_BASE_LOG_MONITOR};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Initialisation ──────────────────────────────────────────────────
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(
        endpoint = %settings.base_log_monitor.chain.api_endpoint,
        "Starting blocktasks"
    );

    let pool = storage::connect(&settings.database).await?;
    tracing::info!(schema = %settings.database.schema, "Connected to database");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let repo = Arc::new(PgRepository::new(pool));

    // ── Tasks ───────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let mut supervisor = Supervisor::new(cancel.clone());

    let monitor = &settings.base_log_monitor;
    if monitor.enabled {
        let gateway = Arc::new(HttpGateway::new(&monitor.chain));
        let chain = Arc::new(RpcChain::base_mainnet(&monitor.chain, gateway));
        let task = LogMonitor::new(TASK_BASE_LOG_MONITOR, monitor.clone(), chain, repo.clone())?;
        supervisor.add(Box::new(task));
    } else {
        tracing::warn!(task = TASK_BASE_LOG_MONITOR, "Task disabled");
    }

    if supervisor.is_empty() {
        tracing::warn!("No tasks enabled, exiting");
        return Ok(());
    }

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutting down gracefully…");
            cancel.cancel();
        }
    });

    // ── Run ─────────────────────────────────────────────────────────────
    match supervisor.run().await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            tracing::error!(error = %e, "Stopped on task failure");
            return Err(e.into());
        }
    }

    tracing::info!("Blocktasks stopped.");
    Ok(())
}
