//! Streaming CSV validator for book imports.
//!
//! Three tasks joined by bounded channels:
//!
//! ```text
//! parser ──rows──► validator ──verdicts──► collector
//! ```
//!
//! All three share a [`CancellationToken`]; the first stage to fail
//! cancels the others. The collector keeps file order.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::domain::{Book, BookFields, BookId, LibraryId};
use crate::error::AppError;
use crate::ports::Repository;

/// Minimum header width: `id, code, title, author, year`.
pub const REQUIRED_COLUMNS: usize = 5;

const CHANNEL_CAPACITY: usize = 10;

/// One data line of the import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    /// 1-based line number in the file.
    pub line: u64,
    /// Number of cells present.
    pub columns: usize,
    /// Raw `id` cell; empty for new books.
    pub id: String,
    /// Parsed catalog fields. `year` is 0 when unparsable.
    pub fields: BookFields,
}

/// What applying a row would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    /// Insert a new book.
    Create,
    /// Overwrite an existing book.
    Update,
    /// Skip; see `error`.
    Invalid,
}

/// Validator verdict for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRow {
    /// 1-based line number in the file.
    pub line: u64,
    /// Decided action.
    pub action: RowAction,
    /// Target book of an update.
    pub book_id: Option<BookId>,
    /// Trimmed catalog fields.
    pub fields: BookFields,
    /// Reason the row is invalid.
    pub error: Option<String>,
}

/// Per-action row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Rows that would create a book.
    pub created: usize,
    /// Rows that would update a book.
    pub updated: usize,
    /// Rows that would be skipped.
    pub invalid: usize,
}

impl ImportSummary {
    /// Counts the actions in `rows`.
    #[must_use]
    pub fn of(rows: &[ValidatedRow]) -> Self {
        rows.iter().fold(Self::default(), |mut acc, row| {
            match row.action {
                RowAction::Create => acc.created += 1,
                RowAction::Update => acc.updated += 1,
                RowAction::Invalid => acc.invalid += 1,
            }
            acc
        })
    }
}

/// Library books indexed once before validation.
#[derive(Debug, Default)]
struct Snapshot {
    by_id: HashMap<BookId, Book>,
    by_code: HashMap<String, BookId>,
}

impl Snapshot {
    fn new(books: Vec<Book>) -> Self {
        let mut snapshot = Self::default();
        for book in books {
            snapshot.by_code.insert(book.code.clone(), book.id);
            snapshot.by_id.insert(book.id, book);
        }
        snapshot
    }
}

/// Validates an import file against the current catalog of `library_id`.
///
/// # Errors
///
/// [`AppError::Validation`] for a header narrower than
/// [`REQUIRED_COLUMNS`] or malformed CSV, or a repository failure.
pub async fn validate(
    repo: Arc<dyn Repository>,
    library_id: LibraryId,
    bytes: Arc<[u8]>,
) -> Result<Vec<ValidatedRow>, AppError> {
    let snapshot = Snapshot::new(repo.list_books(library_id).await?);
    let cancel = CancellationToken::new();
    let (row_tx, row_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (verdict_tx, verdict_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let parser = tokio::spawn(cancel_on_error(
        cancel.clone(),
        parse_stage(bytes, row_tx, cancel.clone()),
    ));
    let validator = tokio::spawn(cancel_on_error(
        cancel.clone(),
        validate_stage(repo, snapshot, row_rx, verdict_tx, cancel.clone()),
    ));
    let collector = tokio::spawn(cancel_on_error(
        cancel.clone(),
        collect_stage(verdict_rx, cancel.clone()),
    ));

    let (parsed, validated, collected) = tokio::join!(parser, validator, collector);
    parsed.map_err(join_error)??;
    validated.map_err(join_error)??;
    collected.map_err(join_error)?
}

fn join_error(e: JoinError) -> AppError {
    AppError::Internal(format!("import stage aborted: {e}"))
}

async fn cancel_on_error<T>(
    cancel: CancellationToken,
    stage: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    let result = stage.await;
    if result.is_err() {
        cancel.cancel();
    }
    result
}

async fn parse_stage(
    bytes: Arc<[u8]>,
    tx: mpsc::Sender<ImportRow>,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes.as_ref());

    let width = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("malformed csv header: {e}")))?
        .len();
    if width < REQUIRED_COLUMNS {
        return Err(AppError::Validation(
            "missing columns: expected id, code, title, author, year".into(),
        ));
    }

    for record in reader.records() {
        let record = record.map_err(|e| AppError::Validation(format!("malformed csv: {e}")))?;
        let cell = |i: usize| record.get(i).unwrap_or_default().to_string();
        let row = ImportRow {
            line: record.position().map_or(0, csv::Position::line),
            columns: record.len(),
            id: cell(0),
            fields: BookFields {
                code: cell(1),
                title: cell(2),
                author: cell(3),
                year: record.get(4).and_then(|y| y.parse().ok()).unwrap_or(0),
            },
        };
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            sent = tx.send(row) => if sent.is_err() { return Ok(()) },
        }
    }
    Ok(())
}

async fn validate_stage(
    repo: Arc<dyn Repository>,
    snapshot: Snapshot,
    mut rx: mpsc::Receiver<ImportRow>,
    tx: mpsc::Sender<ValidatedRow>,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let mut seen_codes = HashSet::new();
    loop {
        let row = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            row = rx.recv() => row,
        };
        let Some(row) = row else { return Ok(()) };
        let verdict = classify(repo.as_ref(), &snapshot, &mut seen_codes, row).await?;
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            sent = tx.send(verdict) => if sent.is_err() { return Ok(()) },
        }
    }
}

async fn collect_stage(
    mut rx: mpsc::Receiver<ValidatedRow>,
    cancel: CancellationToken,
) -> Result<Vec<ValidatedRow>, AppError> {
    let mut rows = Vec::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(rows),
            verdict = rx.recv() => match verdict {
                Some(verdict) => rows.push(verdict),
                None => return Ok(rows),
            },
        }
    }
}

fn invalid(line: u64, fields: BookFields, reason: impl Into<String>) -> ValidatedRow {
    ValidatedRow {
        line,
        action: RowAction::Invalid,
        book_id: None,
        fields,
        error: Some(reason.into()),
    }
}

async fn classify(
    repo: &dyn Repository,
    snapshot: &Snapshot,
    seen_codes: &mut HashSet<String>,
    row: ImportRow,
) -> Result<ValidatedRow, AppError> {
    let line = row.line;
    if row.columns < REQUIRED_COLUMNS {
        return Ok(invalid(line, row.fields, "missing columns"));
    }

    let target = if row.id.is_empty() {
        None
    } else {
        let Ok(id) = row.id.parse::<BookId>() else {
            return Ok(invalid(line, row.fields, "invalid id"));
        };
        match snapshot.by_id.get(&id) {
            Some(book) => Some(book),
            None => {
                return match repo.get_book(id).await {
                    Ok(_) => Ok(invalid(line, row.fields, "book not in library")),
                    Err(AppError::NotFound { .. }) => Ok(invalid(line, row.fields, "book not found")),
                    Err(e) => Err(e),
                };
            }
        }
    };

    let raw = row.fields.clone();
    let fields = match row.fields.validated() {
        Ok(fields) => fields,
        Err(AppError::Validation(reason)) => return Ok(invalid(line, raw, reason)),
        Err(e) => return Err(e),
    };

    let owner = snapshot.by_code.get(&fields.code);
    if owner.is_some_and(|owner| target.is_none_or(|book| *owner != book.id)) {
        return Ok(invalid(line, fields, "code already exists"));
    }
    if !seen_codes.insert(fields.code.clone()) {
        return Ok(invalid(line, fields, "duplicate code in file"));
    }

    match target {
        Some(book) if book.matches(&fields) => Ok(invalid(line, fields, "no changes detected")),
        Some(book) => Ok(ValidatedRow {
            line,
            action: RowAction::Update,
            book_id: Some(book.id),
            fields,
            error: None,
        }),
        None => Ok(ValidatedRow {
            line,
            action: RowAction::Create,
            book_id: None,
            fields,
            error: None,
        }),
    }
}
