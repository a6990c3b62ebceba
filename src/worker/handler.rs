//! Per-task dispatch.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{JobId, JobType};
use crate::error::AppError;
use crate::ports::{FileStorage, Repository, TaskEnvelope};
use crate::service::export::{self, ExportPayload};
use crate::service::import::{ImportPayload, apply};
use crate::service::{JobService, LoanService};

/// Runs one broker task to completion.
///
/// Job-backed tasks move their row through `PROCESSING` into a terminal
/// state. A payload that fails to decode fails the job instead of leaving
/// it in `PROCESSING`.
#[derive(Debug, Clone)]
pub struct TaskHandler {
    repo: Arc<dyn Repository>,
    storage: Arc<dyn FileStorage>,
    jobs: JobService,
    loans: LoanService,
}

impl TaskHandler {
    /// Creates a new `TaskHandler`.
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        storage: Arc<dyn FileStorage>,
        jobs: JobService,
        loans: LoanService,
    ) -> Self {
        Self {
            repo,
            storage,
            jobs,
            loans,
        }
    }

    /// Handles `task`.
    ///
    /// # Errors
    ///
    /// Returns an error when the job row cannot be claimed or written.
    /// Failures of the work itself are recorded on the job and are not
    /// returned.
    pub async fn handle(&self, task: TaskEnvelope) -> Result<(), AppError> {
        match task.task_type {
            JobType::CheckOverdue => self.loans.notify_overdue(Utc::now()).await.map(|_| ()),
            JobType::ExportBorrowings | JobType::ImportBooks => {
                let job_id = task.job_id.ok_or_else(|| {
                    AppError::Validation(format!("{} task without job_id", task.task_type))
                })?;
                self.run_job(job_id, &task).await
            }
        }
    }

    async fn run_job(&self, job_id: JobId, task: &TaskEnvelope) -> Result<(), AppError> {
        let job = self.jobs.start(job_id).await?;
        let outcome = match task.task_type {
            JobType::ExportBorrowings => self.export(task).await,
            JobType::ImportBooks => self.import(task).await,
            JobType::CheckOverdue => Err(AppError::Internal("sweep task has a job row".into())),
        };
        self.jobs.finish(job, outcome).await.map(|_| ())
    }

    async fn export(&self, task: &TaskEnvelope) -> Result<serde_json::Value, AppError> {
        let payload: ExportPayload = task.decode()?;
        let result = export::run(
            self.repo.as_ref(),
            self.storage.as_ref(),
            &payload,
            Utc::now(),
        )
        .await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn import(&self, task: &TaskEnvelope) -> Result<serde_json::Value, AppError> {
        let payload: ImportPayload = task.decode()?;
        let result = apply::apply(
            Arc::clone(&self.repo),
            self.storage.as_ref(),
            &payload,
            Utc::now(),
        )
        .await?;
        Ok(serde_json::to_value(result)?)
    }
}
