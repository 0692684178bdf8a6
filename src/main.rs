//! Loyalty Ledger daemon
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌──────────────┐
//! │  Config  │───▶│ PostgreSQL │◀───│  Reconciler  │───▶ accrual service
//! │ (layers) │    │  (ledger)  │    │ (tick/retry) │
//! └──────────┘    └────────────┘    └──────────────┘
//! ```
//!
//! Runs the reconciler until Ctrl-C.

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use loyalty_ledger::accrual::HttpAccrualClient;
use loyalty_ledger::config::AppConfig;
use loyalty_ledger::db::{Database, init_schema};
use loyalty_ledger::ledger::PgLedger;
use loyalty_ledger::reconciler::{Reconciler, ReconcilerConfig};

fn get_env(args: &[String]) -> String {
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn load_config(args: &[String]) -> anyhow::Result<AppConfig> {
    let env = get_env(args);
    let mut config =
        AppConfig::load(&env).with_context(|| format!("loading config for env '{}'", env))?;
    config.apply_env().context("reading environment")?;
    config.apply_args(args).context("parsing flags")?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = load_config(&args)?;
    let _log_guard = loyalty_ledger::logging::init_logging(&config);

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        poll_interval_ms = config.poll_interval_ms,
        "Starting loyalty ledger"
    );

    // validate() has already rejected missing URLs
    let database_url = config.database_url.as_deref().unwrap_or_default();
    let accrual_address = config.accrual_address.as_deref().unwrap_or_default();

    let db = Database::connect(database_url, config.max_db_connections)
        .await
        .context("connecting to PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check")?;
    init_schema(db.pool()).await.context("initializing schema")?;

    let ledger = Arc::new(PgLedger::new(db.pool().clone()));
    let accrual = Arc::new(
        HttpAccrualClient::new(accrual_address, config.accrual_timeout())
            .context("building accrual client")?,
    );
    let reconciler_config = ReconcilerConfig::new(config.poll_interval(), config.accrual_timeout())
        .context("reconciler config")?;
    let reconciler = Reconciler::new(ledger, accrual, reconciler_config);

    let shutdown = CancellationToken::new();
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { reconciler.run(shutdown).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    worker.await.context("reconciler task panicked")?;
    tracing::info!("Loyalty ledger stopped");
    Ok(())
}
