//! Applies a confirmed import file to the catalog.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ImportPayload;
use super::validator::{RowAction, ValidatedRow, validate};
use crate::domain::{Book, BookId};
use crate::error::AppError;
use crate::ports::{FileStorage, Repository};

/// A row that was skipped or could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    /// 1-based line number in the file.
    pub line: u64,
    /// Reason.
    pub error: String,
}

/// Stored on the job row of a completed import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    /// Data rows in the file.
    pub total: usize,
    /// Rows written.
    pub success: usize,
    /// Valid rows whose write failed.
    pub failed: usize,
    /// Invalid rows.
    pub skipped: usize,
    /// Books created.
    pub created_ids: Vec<BookId>,
    /// Books updated.
    pub updated_ids: Vec<BookId>,
    /// Skipped and failed rows with their reasons.
    pub failed_rows: Vec<FailedRow>,
}

/// Re-reads the uploaded file, revalidates it against the current catalog
/// and writes the rows one at a time.
///
/// A row that fails to persist is recorded and the run continues.
///
/// # Errors
///
/// Returns an error only when the file cannot be read or validated as a
/// whole.
pub async fn apply(
    repo: Arc<dyn Repository>,
    storage: &dyn FileStorage,
    payload: &ImportPayload,
    now: DateTime<Utc>,
) -> Result<ImportResult, AppError> {
    let bytes = storage.read(&payload.path).await?;
    let rows = validate(Arc::clone(&repo), payload.library_id, Arc::from(bytes)).await?;

    let mut result = ImportResult {
        total: rows.len(),
        ..ImportResult::default()
    };
    for row in rows {
        let line = row.line;
        match write_row(repo.as_ref(), payload, row, now).await {
            Ok(Written::Created(id)) => {
                result.success += 1;
                result.created_ids.push(id);
            }
            Ok(Written::Updated(id)) => {
                result.success += 1;
                result.updated_ids.push(id);
            }
            Ok(Written::Skipped(error)) => {
                result.skipped += 1;
                result.failed_rows.push(FailedRow { line, error });
            }
            Err(e) => {
                tracing::warn!(line, error = %e, "import row failed");
                result.failed += 1;
                result.failed_rows.push(FailedRow {
                    line,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        library_id = %payload.library_id,
        total = result.total,
        success = result.success,
        failed = result.failed,
        skipped = result.skipped,
        "import applied"
    );
    Ok(result)
}

enum Written {
    Created(BookId),
    Updated(BookId),
    Skipped(String),
}

async fn write_row(
    repo: &dyn Repository,
    payload: &ImportPayload,
    row: ValidatedRow,
    now: DateTime<Utc>,
) -> Result<Written, AppError> {
    match (row.action, row.book_id) {
        (RowAction::Create, _) => {
            let book = Book::new(payload.library_id, row.fields, now);
            repo.insert_book(&book).await?;
            Ok(Written::Created(book.id))
        }
        (RowAction::Update, Some(id)) => {
            let mut book = repo.get_book(id).await?;
            book.apply(row.fields, now);
            repo.update_book(&book).await?;
            Ok(Written::Updated(id))
        }
        (RowAction::Update, None) => Err(AppError::Internal(format!(
            "update row {} has no target book",
            row.line
        ))),
        (RowAction::Invalid, _) => Ok(Written::Skipped(
            row.error.unwrap_or_else(|| "invalid row".to_string()),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::adapters::MemoryFileStorage;
    use crate::domain::{BookFields, LibraryId};
    use crate::persistence::InMemoryRepository;

    #[tokio::test]
    async fn apply_creates_updates_and_skips() {
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let storage = MemoryFileStorage::new();
        let library_id = LibraryId::new();
        let existing = Book::new(
            library_id,
            BookFields {
                code: "A1".into(),
                title: "Old".into(),
                author: "X".into(),
                year: 2000,
            },
            Utc::now(),
        );
        assert!(repo.insert_book(&existing).await.is_ok());

        let csv = format!(
            "id,code,title,author,year\n{},A1,Renamed,X,2000\n,B2,Fresh,Y,2020\n,,Bad,Z,1\n",
            existing.id
        );
        let path = format!("{library_id}/imports/books.csv");
        assert!(storage.put(&path, csv.as_bytes(), "text/csv").await.is_ok());

        let payload = ImportPayload { path, library_id };
        let Ok(result) = apply(Arc::clone(&repo), &storage, &payload, Utc::now()).await else {
            panic!("apply should succeed");
        };
        assert_eq!(result.total, 3);
        assert_eq!(result.success, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(result.updated_ids, vec![existing.id]);
        assert_eq!(result.created_ids.len(), 1);
        assert_eq!(
            result.failed_rows,
            vec![FailedRow {
                line: 4,
                error: "code is required".into()
            }]
        );

        let Ok(renamed) = repo.get_book(existing.id).await else {
            panic!("book should exist");
        };
        assert_eq!(renamed.title, "Renamed");
    }

    #[tokio::test]
    async fn missing_file_fails_the_run() {
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let payload = ImportPayload {
            path: "nowhere/imports/x.csv".into(),
            library_id: LibraryId::new(),
        };
        assert!(matches!(
            apply(repo, &MemoryFileStorage::new(), &payload, Utc::now()).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
