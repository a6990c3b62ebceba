//! librarium server entry point.
//!
//! Starts the Axum HTTP server and, when `WORKER_EMBEDDED` is on, the
//! worker pool and overdue schedule in the same process.

use anyhow::Context;

use librarium::api;
use librarium::bootstrap::{self, Runtime};
use librarium::config::AppConfig;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "server failed");
        eprintln!("librarium: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    bootstrap::init_tracing(config.log_format);
    tracing::info!(addr = %config.listen_addr, env = ?config.app_env, "starting librarium");

    let mut runtime = Runtime::start(&config)
        .await
        .context("connecting backends")?;
    if config.worker_embedded {
        runtime.spawn_worker(&config);
        tracing::info!(concurrency = config.worker_concurrency, "embedded worker enabled");
    }

    let app = api::build_router(runtime.state.clone(), &config);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let cancel = runtime.cancellation();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            bootstrap::shutdown_signal().await;
            cancel.cancel();
        })
        .await
        .context("serving")?;

    tracing::info!("http server stopped, draining background tasks");
    runtime.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
