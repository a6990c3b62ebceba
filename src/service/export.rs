//! Borrowings export: filtered listing rendered as CSV and stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BorrowingFilter, BorrowingView, LibraryId};
use crate::error::AppError;
use crate::ports::external::export_path;
use crate::ports::{FileStorage, Repository};

/// Column headers of the export file.
pub const CSV_HEADER: [&str; 7] = [
    "User",
    "Book",
    "Status",
    "Borrowed At",
    "Due At",
    "Returned At",
    "Lost At",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Task payload of an `export:borrowings` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPayload {
    /// Library to export.
    pub library_id: LibraryId,
    /// Include active loans.
    #[serde(default)]
    pub is_active: bool,
    /// Include overdue loans.
    #[serde(default)]
    pub is_overdue: bool,
    /// Include returned loans.
    #[serde(default)]
    pub is_returned: bool,
    /// Include lost loans.
    #[serde(default)]
    pub is_lost: bool,
    /// Lower bound on `borrowed_at`.
    #[serde(default)]
    pub borrowed_at_from: Option<DateTime<Utc>>,
    /// Upper bound on `borrowed_at`.
    #[serde(default)]
    pub borrowed_at_to: Option<DateTime<Utc>>,
}

impl ExportPayload {
    /// Listing filter equivalent to this payload.
    #[must_use]
    pub fn filter(&self) -> BorrowingFilter {
        BorrowingFilter {
            library_id: Some(self.library_id),
            is_active: self.is_active,
            is_overdue: self.is_overdue,
            is_returned: self.is_returned,
            is_lost: self.is_lost,
            borrowed_at_from: self.borrowed_at_from,
            borrowed_at_to: self.borrowed_at_to,
            ..BorrowingFilter::default()
        }
    }
}

/// Stored on the job row of a completed export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    /// Object-store path.
    pub path: String,
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

fn format_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

/// Renders `views` as CSV with `\n` line endings.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if the writer fails.
pub fn write_csv(views: &[BorrowingView], now: DateTime<Utc>) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    let csv_err = |e: csv::Error| AppError::Internal(format!("csv: {e}"));

    writer.write_record(CSV_HEADER).map_err(csv_err)?;
    for view in views {
        let b = &view.borrowing;
        let borrowed_at = format_ts(Some(b.borrowed_at));
        let due_at = format_ts(Some(b.due_at));
        let returned_at = format_ts(b.returning().map(|r| r.returned_at));
        let lost_at = format_ts(b.lost().map(|l| l.reported_at));
        writer
            .write_record([
                view.user.name.as_str(),
                view.book.title.as_str(),
                b.status_at(now).as_str(),
                borrowed_at.as_str(),
                due_at.as_str(),
                returned_at.as_str(),
                lost_at.as_str(),
            ])
            .map_err(csv_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("csv: {e}")))
}

/// Runs an export end to end and returns the stored file's description.
///
/// # Errors
///
/// Listing, rendering or upload failures.
pub async fn run(
    repo: &dyn Repository,
    storage: &dyn FileStorage,
    payload: &ExportPayload,
    now: DateTime<Utc>,
) -> Result<ExportResult, AppError> {
    let listing = repo.list_borrowings(&payload.filter(), now, None).await?;
    let bytes = write_csv(&listing.items, now)?;

    let path = export_path(payload.library_id, now);
    let name = path.rsplit('/').next().unwrap_or(&path).to_string();
    storage.put(&path, &bytes, "text/csv").await?;

    tracing::info!(
        library_id = %payload.library_id,
        rows = listing.items.len(),
        %path,
        "borrowings exported"
    );
    Ok(ExportResult {
        path,
        name,
        size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::{
        Book, BookFields, Borrowing, BorrowingId, Resolution, Returning, StaffId, SubscriptionId,
        User, UserId,
    };

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        let Some(t) = Utc.with_ymd_and_hms(2025, 3, d, h, 5, 0).single() else {
            panic!("valid date");
        };
        t
    }

    fn view(title: &str, resolution: Option<Resolution>) -> BorrowingView {
        let library_id = LibraryId::new();
        let book = Book::new(
            library_id,
            BookFields {
                code: "C1".into(),
                title: title.into(),
                author: "A".into(),
                year: 2000,
            },
            at(1, 0),
        );
        BorrowingView {
            borrowing: Borrowing {
                id: BorrowingId::new(),
                book_id: book.id,
                subscription_id: SubscriptionId::new(),
                staff_id: StaffId::new(),
                borrowed_at: at(1, 9),
                due_at: at(15, 9),
                resolution,
                created_at: at(1, 9),
                deleted_at: None,
            },
            library_id,
            book,
            user: User {
                id: UserId::new(),
                name: "Ada".into(),
                email: "ada@example.test".into(),
                created_at: at(1, 0),
                deleted_at: None,
            },
        }
    }

    #[test]
    fn csv_has_header_and_formatted_rows() {
        let returned = Resolution::Returned(Returning {
            returned_at: at(10, 14),
            fine: 0,
            staff_id: StaffId::new(),
        });
        let views = [view("Dune", Some(returned)), view("Emma", None)];
        let Ok(bytes) = write_csv(&views, at(20, 0)) else {
            panic!("csv should render");
        };
        let Ok(text) = String::from_utf8(bytes) else {
            panic!("csv is utf-8");
        };
        let mut lines = text.split('\n');
        assert_eq!(
            lines.next(),
            Some("User,Book,Status,Borrowed At,Due At,Returned At,Lost At")
        );
        assert_eq!(
            lines.next(),
            Some("Ada,Dune,Returned,2025-03-01 09:05,2025-03-15 09:05,2025-03-10 14:05,")
        );
        assert_eq!(
            lines.next(),
            Some("Ada,Emma,Overdue,2025-03-01 09:05,2025-03-15 09:05,,")
        );
        assert_eq!(lines.next(), Some(""));
        assert!(!text.contains('\r'));
    }

    #[test]
    fn payload_without_flags_matches_every_status() {
        let payload = ExportPayload {
            library_id: LibraryId::new(),
            is_active: false,
            is_overdue: false,
            is_returned: false,
            is_lost: false,
            borrowed_at_from: None,
            borrowed_at_to: None,
        };
        let mut v = view("Dune", None);
        v.library_id = payload.library_id;
        assert!(payload.filter().matches(&v, at(20, 0)));
    }
}
