//! Book import: preview, confirm and apply.
//!
//! A preview uploads the file and validates it concurrently. Confirming
//! submits an `import:books` job that re-reads the stored file and
//! applies it; see [`apply::apply`].

pub mod apply;
pub mod validator;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{Actor, Job, JobType, LibraryId};
use crate::error::AppError;
use crate::ports::external::import_path;
use crate::ports::{FileStorage, Repository};
use crate::service::JobService;
use crate::service::authz::{self, Permission};

pub use apply::{FailedRow, ImportResult};
pub use validator::{ImportSummary, RowAction, ValidatedRow};

/// Task payload of an `import:books` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPayload {
    /// Stored file, as returned by the preview.
    pub path: String,
    /// Target library.
    pub library_id: LibraryId,
}

/// Outcome of a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPreview {
    /// Where the file was stored.
    pub path: String,
    /// Per-action counts.
    pub summary: ImportSummary,
    /// Verdicts in file order.
    pub rows: Vec<ValidatedRow>,
}

/// Entry points of the import pipeline.
#[derive(Debug, Clone)]
pub struct ImportService {
    repo: Arc<dyn Repository>,
    storage: Arc<dyn FileStorage>,
    jobs: JobService,
}

impl ImportService {
    /// Creates a new `ImportService`.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, storage: Arc<dyn FileStorage>, jobs: JobService) -> Self {
        Self {
            repo,
            storage,
            jobs,
        }
    }

    /// Stores `bytes` and validates them against the library's catalog.
    ///
    /// Nothing is written to the catalog.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `Validation` for an unusable file, or the storage
    /// failure.
    pub async fn preview(
        &self,
        actor: &Actor,
        library_id: LibraryId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ImportPreview, AppError> {
        authz::authorize(self.repo.as_ref(), actor, library_id, Permission::FrontDesk).await?;

        let path = import_path(library_id, filename);
        let bytes: Arc<[u8]> = Arc::from(bytes);
        let ((), rows) = tokio::try_join!(
            self.storage.put(&path, &bytes, "text/csv"),
            validator::validate(Arc::clone(&self.repo), library_id, Arc::clone(&bytes)),
        )?;

        let summary = ImportSummary::of(&rows);
        tracing::info!(
            %library_id,
            %path,
            created = summary.created,
            updated = summary.updated,
            invalid = summary.invalid,
            "import previewed"
        );
        Ok(ImportPreview {
            path,
            summary,
            rows,
        })
    }

    /// Submits the previewed file for application.
    ///
    /// # Errors
    ///
    /// `Validation` when `path` is not an import of `library_id`,
    /// `Unauthorized` as for [`JobService::submit`].
    pub async fn confirm(&self, actor: &Actor, payload: ImportPayload) -> Result<Job, AppError> {
        let prefix = format!("{}/imports/", payload.library_id);
        if !payload.path.starts_with(&prefix) || payload.path.contains("..") {
            return Err(AppError::Validation(
                "path does not belong to this library's imports".into(),
            ));
        }
        self.jobs
            .submit(actor, payload.library_id, JobType::ImportBooks, &payload)
            .await
    }
}
