//! Service error types with HTTP status code mapping.
//!
//! [`AppError`] is the closed set of failure kinds every core operation can
//! return. Domain rule violations are grouped under [`Invariant`] so the
//! HTTP layer can map them without inspecting message strings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::JobStatus;

/// Structured JSON error response body.
///
/// All error responses follow the shared envelope shape:
/// ```json
/// { "error": "book_not_available", "message": "book is currently borrowed" }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// Domain rule violations. Surfaced as `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Invariant {
    /// The subscription has expired.
    #[error("membership expired")]
    MembershipExpired,
    /// The subscription already has its maximum number of active loans.
    #[error("active loan limit reached")]
    ActiveLoanLimitReached,
    /// The book already has an active borrowing.
    #[error("book is not available")]
    BookNotAvailable,
    /// The book belongs to a different library than the membership.
    #[error("book does not belong to the membership's library")]
    BookNotInLibrary,
    /// The staff member belongs to a different library.
    #[error("staff does not belong to the library")]
    StaffNotInLibrary,
    /// The borrowing already has a returning record.
    #[error("borrowing already returned")]
    AlreadyReturned,
    /// The borrowing was already reported lost.
    #[error("borrowing already reported lost")]
    AlreadyLost,
    /// An update would not change anything.
    #[error("no changes detected")]
    NoChangesDetected,
    /// `returned_at` precedes `borrowed_at`.
    #[error("return date is before borrow date")]
    InvalidReturnDate,
    /// `reported_at` precedes `borrowed_at`.
    #[error("report date is before borrow date")]
    InvalidReportDate,
    /// `due_at` precedes `borrowed_at`.
    #[error("due date is before borrow date")]
    InvalidDueDate,
    /// A newer borrowing exists for the same book.
    #[error("borrowing is not the most recent for this book")]
    NotMostRecentBorrowing,
    /// The membership plan was soft-deleted.
    #[error("membership has been deleted")]
    MembershipDeleted,
    /// Another book in the library already uses this code.
    #[error("book code already exists in library")]
    DuplicateBookCode,
    /// The borrowing already has a review.
    #[error("borrowing already reviewed")]
    AlreadyReviewed,
    /// Reviews require a returned borrowing.
    #[error("borrowing has not been returned")]
    BorrowingNotResolved,
    /// A job status change outside the allowed DAG.
    #[error("invalid job transition from {from} to {to}")]
    InvalidJobTransition {
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },
}

impl Invariant {
    /// Returns the snake_case code used in error responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MembershipExpired => "membership_expired",
            Self::ActiveLoanLimitReached => "active_loan_limit_reached",
            Self::BookNotAvailable => "book_not_available",
            Self::BookNotInLibrary => "book_not_in_library",
            Self::StaffNotInLibrary => "staff_not_in_library",
            Self::AlreadyReturned => "already_returned",
            Self::AlreadyLost => "already_lost",
            Self::NoChangesDetected => "no_changes_detected",
            Self::InvalidReturnDate => "invalid_return_date",
            Self::InvalidReportDate => "invalid_report_date",
            Self::InvalidDueDate => "invalid_due_date",
            Self::NotMostRecentBorrowing => "not_most_recent_borrowing",
            Self::MembershipDeleted => "membership_deleted",
            Self::DuplicateBookCode => "duplicate_book_code",
            Self::AlreadyReviewed => "already_reviewed",
            Self::BorrowingNotResolved => "borrowing_not_resolved",
            Self::InvalidJobTransition { .. } => "invalid_job_transition",
        }
    }
}

/// Central error enum with HTTP status code mapping.
///
/// | Variant       | HTTP Status                  |
/// |---------------|------------------------------|
/// | `Validation`  | 422 Unprocessable Entity     |
/// | `NotFound`    | 404 Not Found                |
/// | `Invariant`   | 400 Bad Request              |
/// | `Unauthorized`| 401 Unauthorized             |
/// | `Upstream`    | 500 Internal Server Error    |
/// | `Internal`    | 500 Internal Server Error    |
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Input shape or constraint failure.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist (or is soft-deleted).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"book"`.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A domain rule was violated.
    #[error(transparent)]
    Invariant(#[from] Invariant),

    /// The actor lacks standing on the target library.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// An external collaborator (identity, storage, mail, push, broker) failed.
    #[error("{service} error: {message}")]
    Upstream {
        /// Collaborator name.
        service: &'static str,
        /// Failure description.
        message: String,
    },

    /// Programmer or persistence error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for [`AppError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`AppError::Upstream`].
    pub fn upstream(service: &'static str, err: impl ToString) -> Self {
        Self::Upstream {
            service,
            message: err.to_string(),
        }
    }

    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub fn error_code(&self) -> String {
        match self {
            Self::Validation(_) => "validation_error".to_string(),
            Self::NotFound { entity, .. } => format!("{entity}_not_found"),
            Self::Invariant(inv) => inv.code().to_string(),
            Self::Unauthorized(_) => "unauthorized".to_string(),
            Self::Upstream { service, .. } => format!("{service}_error"),
            Self::Internal(_) => "internal_error".to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Invariant(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the wrapped invariant, if any.
    #[must_use]
    pub const fn invariant(&self) -> Option<&Invariant> {
        match self {
            Self::Invariant(inv) => Some(inv),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.error_code(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariants_map_to_bad_request() {
        let err = AppError::from(Invariant::BookNotAvailable);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "book_not_available");
    }

    #[test]
    fn not_found_carries_entity_code() {
        let err = AppError::not_found("job", "abc");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "job_not_found");
        assert_eq!(err.to_string(), "job not found: abc");
    }

    #[test]
    fn validation_is_unprocessable() {
        let err = AppError::Validation("title is required".into());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn upstream_and_internal_are_server_errors() {
        assert!(AppError::upstream("storage", "timeout").status_code().is_server_error());
        assert!(AppError::Internal("boom".into()).status_code().is_server_error());
    }

    #[test]
    fn unauthorized_is_401() {
        let err = AppError::Unauthorized("not staff".into());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
