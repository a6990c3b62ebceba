//! Durable job orchestration: submission, state transitions, completion
//! notices and export downloads.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::domain::{Actor, Job, JobId, JobStatus, JobType, LibraryId, ReferenceType};
use crate::error::AppError;
use crate::ports::{FileStorage, QueueName, Repository, TaskEnvelope, TaskQueue};
use crate::service::authz::{self, Permission};
use crate::service::NotificationService;

/// Lifetime of a presigned export download URL.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Broker queue each task type is pushed to.
#[must_use]
pub const fn queue_for(job_type: JobType) -> QueueName {
    match job_type {
        JobType::ExportBorrowings | JobType::ImportBooks => QueueName::Default,
        JobType::CheckOverdue => QueueName::Low,
    }
}

/// Creates, advances and reports on background jobs.
#[derive(Debug, Clone)]
pub struct JobService {
    repo: Arc<dyn Repository>,
    queue: Arc<dyn TaskQueue>,
    storage: Arc<dyn FileStorage>,
    notifications: NotificationService,
}

impl JobService {
    /// Creates a new `JobService`.
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        queue: Arc<dyn TaskQueue>,
        storage: Arc<dyn FileStorage>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            repo,
            queue,
            storage,
            notifications,
        }
    }

    /// Submits a job for `library_id`.
    ///
    /// The job row is written as `PENDING` before the task is pushed. If
    /// the push fails the row stays `PENDING`, the failure is logged, and
    /// the job is still returned.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless the actor holds a staff position in the
    /// library, or a persistence failure writing the row.
    pub async fn submit<P: Serialize + Sync>(
        &self,
        actor: &Actor,
        library_id: LibraryId,
        job_type: JobType,
        payload: &P,
    ) -> Result<Job, AppError> {
        let staff = authz::authorize(self.repo.as_ref(), actor, library_id, Permission::FrontDesk)
            .await?
            .ok_or_else(|| {
                AppError::Unauthorized(format!(
                    "submitting jobs requires a staff position in library {library_id}"
                ))
            })?;

        let job = Job::pending(
            job_type,
            library_id,
            staff.id,
            serde_json::to_value(payload)?,
            Utc::now(),
        );
        self.repo.insert_job(&job).await?;

        let task = TaskEnvelope::new(Some(job.id), job_type, payload)?;
        match self.queue.enqueue(queue_for(job_type), &task).await {
            Ok(()) => tracing::info!(job_id = %job.id, %job_type, "job enqueued"),
            Err(e) => tracing::error!(
                job_id = %job.id,
                %job_type,
                error = %e,
                "failed to enqueue job, left pending"
            ),
        }
        Ok(job)
    }

    /// Pushes a job-less sweep task.
    ///
    /// # Errors
    ///
    /// Returns the broker failure.
    pub async fn schedule(&self, job_type: JobType) -> Result<(), AppError> {
        let task = TaskEnvelope::new(None, job_type, &serde_json::json!({}))?;
        self.queue.enqueue(queue_for(job_type), &task).await
    }

    /// Loads a job for a staff member of its library or a global admin.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Unauthorized`.
    pub async fn get(&self, actor: &Actor, id: JobId) -> Result<Job, AppError> {
        let job = self.repo.get_job(id).await?;
        authz::authorize(self.repo.as_ref(), actor, job.library_id, Permission::FrontDesk).await?;
        Ok(job)
    }

    /// Presigns the file produced by a completed export.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, or `Validation` when the job is not a
    /// completed export.
    pub async fn download_url(&self, actor: &Actor, id: JobId) -> Result<String, AppError> {
        let job = self.get(actor, id).await?;
        if job.job_type != JobType::ExportBorrowings {
            return Err(AppError::Validation("only export jobs can be downloaded".into()));
        }
        if job.status != JobStatus::Completed {
            return Err(AppError::Validation(format!(
                "job is {}, not COMPLETED",
                job.status
            )));
        }
        let path = job
            .result
            .as_ref()
            .and_then(|r| r.get("path"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AppError::Internal(format!("export job {id} has no result path")))?;
        self.storage.presign_get(path, DOWNLOAD_URL_TTL).await
    }

    /// Moves a job from `PENDING` to `PROCESSING`.
    ///
    /// # Errors
    ///
    /// `InvalidJobTransition` if the job is not pending, `NotFound`.
    pub async fn start(&self, id: JobId) -> Result<Job, AppError> {
        let mut job = self.repo.get_job(id).await?;
        job.start(Utc::now())?;
        self.repo.update_job(&job).await?;
        tracing::info!(job_id = %id, job_type = %job.job_type, "job started");
        Ok(job)
    }

    /// Writes the terminal state and notifies the submitter.
    ///
    /// # Errors
    ///
    /// `InvalidJobTransition` if the job is not processing, or the
    /// persistence failure.
    pub async fn finish(
        &self,
        mut job: Job,
        outcome: Result<serde_json::Value, AppError>,
    ) -> Result<Job, AppError> {
        let now = Utc::now();
        match outcome {
            Ok(result) => {
                job.complete(result, now)?;
                tracing::info!(job_id = %job.id, job_type = %job.job_type, "job completed");
            }
            Err(e) => {
                job.fail(e.to_string(), now)?;
                tracing::warn!(job_id = %job.id, job_type = %job.job_type, error = %e, "job failed");
            }
        }
        self.repo.update_job(&job).await?;
        self.notify_submitter(&job);
        Ok(job)
    }

    fn notify_submitter(&self, job: &Job) {
        let reference_type = match job.job_type {
            JobType::ExportBorrowings => ReferenceType::ExportBorrowing,
            JobType::ImportBooks => ReferenceType::ImportBooks,
            JobType::CheckOverdue => return,
        };
        let what = match job.job_type {
            JobType::ExportBorrowings => "Borrowings export",
            _ => "Book import",
        };
        let (title, message) = match job.status {
            JobStatus::Completed => (
                format!("{what} completed"),
                format!("{what} finished successfully."),
            ),
            _ => (
                format!("{what} failed"),
                format!(
                    "{what} failed: {}",
                    job.error.as_deref().unwrap_or("unknown error")
                ),
            ),
        };

        let repo = Arc::clone(&self.repo);
        let notifications = self.notifications.clone();
        let staff_id = job.staff_id;
        let job_id = job.id;
        tokio::spawn(async move {
            let staff = match repo.get_staff(staff_id).await {
                Ok(staff) => staff,
                Err(e) => {
                    tracing::error!(%job_id, %staff_id, error = %e, "cannot resolve job submitter");
                    return;
                }
            };
            let reference = Some((reference_type, uuid::Uuid::from(job_id)));
            if let Err(e) = notifications
                .emit(staff.user_id, &title, &message, reference)
                .await
            {
                tracing::error!(%job_id, error = %e, "failed to notify job submitter");
            }
        });
    }
}
