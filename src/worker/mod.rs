//! Background worker: broker polling, bounded concurrency, graceful drain
//! and the periodic overdue schedule.
//!
//! ```text
//! TaskQueue ──dequeue──► WorkerPool ──spawn (≤ concurrency)──► TaskHandler
//!     ▲                                                          │
//!     └──── schedule_overdue (check:overdue, every N secs)       ▼
//!                                                   JobService / LoanService
//! ```

pub mod handler;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::JobType;
use crate::ports::TaskQueue;
use crate::service::JobService;

pub use handler::TaskHandler;

/// How long one `dequeue` call blocks before the loop re-checks shutdown.
pub const POLL_WAIT: Duration = Duration::from_secs(1);

/// Pause after a broker error.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Pulls tasks from the broker and runs up to `concurrency` at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    handler: TaskHandler,
    concurrency: usize,
    grace: Duration,
}

impl WorkerPool {
    /// Creates a pool. `grace` bounds the drain on shutdown.
    #[must_use]
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        handler: TaskHandler,
        concurrency: usize,
        grace: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            grace,
        }
    }

    /// Polls until `cancel` fires, then waits up to the grace period for
    /// in-flight tasks.
    pub async fn run(self, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        tracing::info!(concurrency = self.concurrency, "worker pool started");

        while !cancel.is_cancelled() {
            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.dequeue(POLL_WAIT).await {
                Ok(Some(task)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let task_type = task.task_type;
                        let job_id = task.job_id;
                        if let Err(e) = handler.handle(task).await {
                            tracing::error!(
                                %task_type,
                                job_id = ?job_id,
                                error = %e,
                                "task failed"
                            );
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "dequeue failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.grace, permits.acquire_many(all)).await {
            Ok(_) => tracing::info!("worker pool drained"),
            Err(_) => tracing::warn!(
                grace_secs = self.grace.as_secs(),
                "worker pool stopped with tasks still running"
            ),
        }
    }
}

/// Pushes a `check:overdue` task every `every` until `cancel` fires.
///
/// The first push happens one full period after start.
pub async fn schedule_overdue(jobs: JobService, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(every_secs = every.as_secs(), "overdue schedule started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = jobs.schedule(JobType::CheckOverdue).await {
                    tracing::warn!(error = %e, "failed to schedule overdue sweep");
                }
            }
        }
    }
}
