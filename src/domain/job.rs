//! Durable background jobs and their status DAG.
//!
//! ```text
//! PENDING ──► PROCESSING ──► COMPLETED
//!                       └──► FAILED
//! ```
//!
//! Terminal states are immutable; a retry is a new job.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, LibraryId, StaffId};
use crate::error::{AppError, Invariant};

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Persisted, waiting in the broker.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// `COMPLETED` and `FAILED` are terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if `self → next` is an edge of the DAG.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Kind of background work. The string form doubles as the broker task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// CSV export of borrowings.
    #[serde(rename = "export:borrowings")]
    ExportBorrowings,
    /// CSV import of books.
    #[serde(rename = "import:books")]
    ImportBooks,
    /// Periodic overdue sweep (no job row).
    #[serde(rename = "check:overdue")]
    CheckOverdue,
}

impl JobType {
    /// Broker task type string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExportBorrowings => "export:borrowings",
            Self::ImportBooks => "import:books",
            Self::CheckOverdue => "check:overdue",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "export:borrowings" => Ok(Self::ExportBorrowings),
            "import:books" => Ok(Self::ImportBooks),
            "check:overdue" => Ok(Self::CheckOverdue),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// A durable record of asynchronous work submitted by a staff member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job id.
    pub id: JobId,
    /// Work kind.
    pub job_type: JobType,
    /// Library the job operates on.
    pub library_id: LibraryId,
    /// Submitting staff.
    pub staff_id: StaffId,
    /// Current status.
    pub status: JobStatus,
    /// Typed payload, serialized.
    pub payload: serde_json::Value,
    /// Result document once completed.
    pub result: Option<serde_json::Value>,
    /// Failure message once failed.
    pub error: Option<String>,
    /// When a worker claimed the job.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Builds a `PENDING` job.
    #[must_use]
    pub fn pending(
        job_type: JobType,
        library_id: LibraryId,
        staff_id: StaffId,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            library_id,
            staff_id,
            status: JobStatus::Pending,
            payload,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
            created_at: now,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(Invariant::InvalidJobTransition {
                from: self.status,
                to: next,
            }
            .into());
        }
        self.status = next;
        Ok(())
    }

    /// `PENDING → PROCESSING`, stamping `started_at`.
    ///
    /// # Errors
    ///
    /// [`Invariant::InvalidJobTransition`] from any other status.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// `PROCESSING → COMPLETED`, recording the result.
    ///
    /// # Errors
    ///
    /// [`Invariant::InvalidJobTransition`] unless processing.
    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.finished_at = Some(now);
        Ok(())
    }

    /// `PROCESSING → FAILED`, recording the error.
    ///
    /// # Errors
    ///
    /// [`Invariant::InvalidJobTransition`] unless processing.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.finished_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::pending(
            JobType::ExportBorrowings,
            LibraryId::new(),
            StaffId::new(),
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut j = job();
        assert!(j.start(Utc::now()).is_ok());
        assert!(j.started_at.is_some());
        assert!(j.complete(serde_json::json!({"path": "x"}), Utc::now()).is_ok());
        assert_eq!(j.status, JobStatus::Completed);
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut j = job();
        assert!(j.start(Utc::now()).is_ok());
        assert!(j.fail("boom", Utc::now()).is_ok());
        assert!(j.start(Utc::now()).is_err());
        assert!(j.complete(serde_json::json!({}), Utc::now()).is_err());
        assert!(j.fail("again", Utc::now()).is_err());
        assert_eq!(j.error.as_deref(), Some("boom"));
    }

    #[test]
    fn reentry_into_processing_is_rejected() {
        let mut j = job();
        assert!(j.start(Utc::now()).is_ok());
        let Err(err) = j.start(Utc::now()) else {
            panic!("second start must fail");
        };
        assert_eq!(
            err.invariant(),
            Some(&Invariant::InvalidJobTransition {
                from: JobStatus::Processing,
                to: JobStatus::Processing,
            })
        );
    }

    #[test]
    fn pending_cannot_finish_directly() {
        let mut j = job();
        assert!(j.complete(serde_json::json!({}), Utc::now()).is_err());
        assert!(j.fail("x", Utc::now()).is_err());
    }

    #[test]
    fn job_type_serializes_as_task_type() {
        let Ok(json) = serde_json::to_string(&JobType::ImportBooks) else {
            panic!("serialize");
        };
        assert_eq!(json, "\"import:books\"");
        assert_eq!("check:overdue".parse::<JobType>(), Ok(JobType::CheckOverdue));
    }
}
