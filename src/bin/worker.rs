//! librarium worker entry point.
//!
//! Consumes the Redis task queues and pushes the periodic overdue sweep.
//! Requires `DATABASE_URL` and `REDIS_URL`: an in-memory backend would be
//! invisible to the HTTP process.

use anyhow::{Context, bail};

use librarium::bootstrap::{self, Runtime};
use librarium::config::AppConfig;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "worker failed");
        eprintln!("librarium-worker: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    bootstrap::init_tracing(config.log_format);
    if config.database_url.is_none() {
        bail!("DATABASE_URL must be set for a standalone worker");
    }
    if config.redis_url.is_none() {
        bail!("REDIS_URL must be set for a standalone worker");
    }
    tracing::info!(concurrency = config.worker_concurrency, "starting librarium-worker");

    let mut runtime = Runtime::start(&config)
        .await
        .context("connecting backends")?;
    runtime.spawn_worker(&config);

    bootstrap::shutdown_signal().await;
    tracing::info!("draining in-flight tasks");
    runtime.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
