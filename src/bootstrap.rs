//! Process wiring shared by the server and worker binaries.
//!
//! [`Runtime::start`] picks adapters from [`AppConfig`], runs
//! migrations, and starts the Postgres notification listener when a
//! database is configured. Background tasks are owned by the runtime and
//! stopped together by [`Runtime::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::adapters::{LocalFileStorage, LocalIdentityProvider, LogMailer, LogPushDispatcher};
use crate::app_state::{AppState, Ports};
use crate::config::{AppConfig, LogFormat};
use crate::domain::NotificationHub;
use crate::error::AppError;
use crate::persistence::{InMemoryRepository, PgRepository, listener};
use crate::ports::{Repository, TaskQueue};
use crate::queue::{InMemoryQueue, RedisQueue};
use crate::worker::{self, WorkerPool};

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wired state plus the background tasks the process owns.
#[derive(Debug)]
pub struct Runtime {
    /// Handler state.
    pub state: AppState,
    queue: Arc<dyn TaskQueue>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl Runtime {
    /// Connects the configured adapters and starts the notification
    /// listener.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Upstream`] if Postgres or Redis is configured
    /// but unreachable, or a migration fails.
    pub async fn start(config: &AppConfig) -> Result<Self, AppError> {
        let cancel = CancellationToken::new();
        let hub = NotificationHub::new();
        let mut tasks = Vec::new();

        let (repo, pool) = connect_repository(config, &hub).await?;
        if let Some(pool) = pool {
            tasks.push(tokio::spawn(listener::run(pool, hub.clone(), cancel.clone())));
        }

        let queue: Arc<dyn TaskQueue> = match config.redis_url.as_deref() {
            Some(url) => {
                let max_size = u32::try_from(config.worker_concurrency + 2).unwrap_or(u32::MAX);
                let queue = RedisQueue::connect(url, max_size).await?;
                tracing::info!("using redis task queue");
                Arc::new(queue)
            }
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory task queue");
                Arc::new(InMemoryQueue::new())
            }
        };

        let ports = Ports {
            repo,
            queue: Arc::clone(&queue),
            storage: Arc::new(LocalFileStorage::new(config.storage.clone())),
            identity: Arc::new(LocalIdentityProvider::new()),
            mailer: Arc::new(LogMailer),
            push: Arc::new(LogPushDispatcher),
            hub,
        };

        Ok(Self {
            state: AppState::new(ports, config.allows_user_id_header()),
            queue,
            cancel,
            tasks,
            grace: Duration::from_secs(config.shutdown_timeout_secs),
        })
    }

    /// Starts the worker pool and, unless disabled, the overdue schedule.
    pub fn spawn_worker(&mut self, config: &AppConfig) {
        let pool = WorkerPool::new(
            Arc::clone(&self.queue),
            self.state.task_handler(),
            config.worker_concurrency,
            self.grace,
        );
        self.tasks.push(tokio::spawn(pool.run(self.cancel.clone())));

        if config.overdue_check_interval_secs > 0 {
            self.tasks.push(tokio::spawn(worker::schedule_overdue(
                self.state.jobs.clone(),
                Duration::from_secs(config.overdue_check_interval_secs),
                self.cancel.clone(),
            )));
        } else {
            tracing::info!("overdue schedule disabled");
        }
    }

    /// Token cancelled by [`Runtime::shutdown`].
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels every background task and waits for them, bounded by the
    /// shutdown grace period plus one second for the pool's own drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let all = futures_util::future::join_all(self.tasks);
        let limit = self.grace + Duration::from_secs(1);
        if tokio::time::timeout(limit, all).await.is_err() {
            tracing::warn!(grace_secs = self.grace.as_secs(), "background tasks did not stop in time");
        }
    }
}

async fn connect_repository(
    config: &AppConfig,
    hub: &NotificationHub,
) -> Result<(Arc<dyn Repository>, Option<PgPool>), AppError> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory repository");
        return Ok((Arc::new(InMemoryRepository::with_hub(hub.clone())), None));
    };

    let repo = PgRepository::connect(url, config).await?;
    if config.database_run_migrations {
        repo.run_migrations().await?;
        tracing::info!("database migrations applied");
    }
    let pool = repo.pool().clone();
    Ok((Arc::new(repo), Some(pool)))
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
