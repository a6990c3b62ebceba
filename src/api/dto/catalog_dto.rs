//! Book, import, upload and review DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Book, BookFields, Review};
use crate::service::import::{ImportPreview, ImportSummary, RowAction, ValidatedRow};

/// Catalog fields shared by create and update.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BookFieldsDto {
    /// Library-local shelf code.
    pub code: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year.
    #[serde(default)]
    pub year: i32,
}

impl From<BookFieldsDto> for BookFields {
    fn from(dto: BookFieldsDto) -> Self {
        Self {
            code: dto.code,
            title: dto.title,
            author: dto.author,
            year: dto.year,
        }
    }
}

/// Request body for `POST /books`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBookRequest {
    /// Owning library.
    pub library_id: uuid::Uuid,
    /// Catalog fields.
    #[serde(flatten)]
    pub fields: BookFieldsDto,
    /// Key returned by `POST /files/upload` to use as the cover.
    #[serde(default)]
    pub cover_key: Option<String>,
}

/// Request body for `POST /books/{id}/cover`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetCoverRequest {
    /// Key returned by `POST /files/upload`.
    pub key: String,
}

/// A catalog book.
#[derive(Debug, Serialize, ToSchema)]
pub struct BookDto {
    /// Book UUID.
    pub id: uuid::Uuid,
    /// Owning library.
    pub library_id: uuid::Uuid,
    /// Shelf code.
    pub code: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year (0 when unknown).
    pub year: i32,
    /// Public cover URL.
    pub cover: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<Book> for BookDto {
    fn from(book: Book) -> Self {
        Self {
            id: book.id.into(),
            library_id: book.library_id.into(),
            code: book.code,
            title: book.title,
            author: book.author,
            year: book.year,
            cover: book.cover,
            created_at: book.created_at,
            updated_at: book.updated_at,
        }
    }
}

/// Per-action counts of an import preview.
#[derive(Debug, Serialize, ToSchema)]
pub struct ImportSummaryDto {
    /// Rows that would create a book.
    pub created: usize,
    /// Rows that would update a book.
    pub updated: usize,
    /// Rows that would be skipped.
    pub invalid: usize,
}

impl From<ImportSummary> for ImportSummaryDto {
    fn from(summary: ImportSummary) -> Self {
        Self {
            created: summary.created,
            updated: summary.updated,
            invalid: summary.invalid,
        }
    }
}

/// Verdict for one import row.
#[derive(Debug, Serialize, ToSchema)]
pub struct ImportRowDto {
    /// 1-based line number.
    pub line: u64,
    /// `create`, `update` or `invalid`.
    #[schema(value_type = String, example = "create")]
    pub action: RowAction,
    /// Target book of an update.
    pub book_id: Option<uuid::Uuid>,
    /// Shelf code.
    pub code: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year.
    pub year: i32,
    /// Reason the row is invalid.
    pub error: Option<String>,
}

impl From<ValidatedRow> for ImportRowDto {
    fn from(row: ValidatedRow) -> Self {
        Self {
            line: row.line,
            action: row.action,
            book_id: row.book_id.map(Into::into),
            code: row.fields.code,
            title: row.fields.title,
            author: row.fields.author,
            year: row.fields.year,
            error: row.error,
        }
    }
}

/// Response body for `POST /books/import`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ImportPreviewDto {
    /// Stored file; pass it to `POST /books/import/confirm`.
    pub path: String,
    /// Per-action counts.
    pub summary: ImportSummaryDto,
    /// Verdicts in file order.
    pub rows: Vec<ImportRowDto>,
}

impl From<ImportPreview> for ImportPreviewDto {
    fn from(preview: ImportPreview) -> Self {
        Self {
            path: preview.path,
            summary: preview.summary.into(),
            rows: preview.rows.into_iter().map(Into::into).collect(),
        }
    }
}

/// Request body for `POST /books/import/confirm`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportConfirmRequest {
    /// Path returned by the preview.
    pub path: String,
    /// Target library.
    pub library_id: uuid::Uuid,
}

/// Response body for `POST /files/upload`.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// Temp key to reference in later requests.
    pub key: String,
}

/// Request body for `POST /reviews`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReviewRequest {
    /// Returned borrowing being reviewed.
    pub borrowing_id: uuid::Uuid,
    /// Rating, 0 to 5.
    pub rating: i16,
    /// Optional comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// A review.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewDto {
    /// Review UUID.
    pub id: uuid::Uuid,
    /// Reviewed borrowing.
    pub borrowing_id: uuid::Uuid,
    /// Rating.
    pub rating: i16,
    /// Comment.
    pub comment: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Review> for ReviewDto {
    fn from(review: Review) -> Self {
        Self {
            id: review.id.into(),
            borrowing_id: review.borrowing_id.into(),
            rating: review.rating,
            comment: review.comment,
            created_at: review.created_at,
        }
    }
}

/// Multipart body of `POST /files/upload`. Documentation only.
#[derive(Debug, ToSchema)]
pub struct UploadForm {
    /// The file.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Multipart body of `POST /books/import`. Documentation only.
#[derive(Debug, ToSchema)]
pub struct ImportForm {
    /// Target library.
    pub library_id: uuid::Uuid,
    /// CSV file with header `id,code,title,author,year`.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}
