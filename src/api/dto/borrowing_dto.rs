//! Loan DTOs: borrow, return, lost, listing and export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::account_dto::UserDto;
use super::catalog_dto::BookDto;
use crate::domain::{
    Borrowing, BorrowingContext, BorrowingFilter, BorrowingView, LibraryId, Resolution,
    SubscriptionId, UserId,
};
use crate::service::export::ExportPayload;
use crate::service::{LostInput, NewBorrowing, ReturnInput};

/// Request body for `POST /borrowings`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBorrowingRequest {
    /// Book to lend.
    pub book_id: uuid::Uuid,
    /// Subscription to charge.
    pub subscription_id: uuid::Uuid,
    /// Issuing staff; ignored for front-desk staff.
    #[serde(default)]
    pub staff_id: Option<uuid::Uuid>,
    /// Loan start; defaults to now.
    #[serde(default)]
    pub borrowed_at: Option<DateTime<Utc>>,
    /// Due instant; defaults to `borrowed_at + loan_period` days.
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

impl From<CreateBorrowingRequest> for NewBorrowing {
    fn from(req: CreateBorrowingRequest) -> Self {
        Self {
            book_id: req.book_id.into(),
            subscription_id: req.subscription_id.into(),
            staff_id: req.staff_id.map(Into::into),
            borrowed_at: req.borrowed_at,
            due_at: req.due_at,
        }
    }
}

/// Request body for `POST /borrowings/{id}/return`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReturnBorrowingRequest {
    /// Processing staff; ignored for front-desk staff.
    #[serde(default)]
    pub staff_id: Option<uuid::Uuid>,
    /// Return instant; defaults to now.
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
    /// Explicit fine; absent or negative computes it from overdue days.
    #[serde(default)]
    pub fine: Option<i64>,
}

impl From<ReturnBorrowingRequest> for ReturnInput {
    fn from(req: ReturnBorrowingRequest) -> Self {
        Self {
            staff_id: req.staff_id.map(Into::into),
            returned_at: req.returned_at,
            fine: req.fine,
        }
    }
}

/// Request body for `POST /borrowings/{id}/lost`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LostBorrowingRequest {
    /// Reporting staff; ignored for front-desk staff.
    #[serde(default)]
    pub staff_id: Option<uuid::Uuid>,
    /// Report instant; defaults to now.
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
    /// Fine charged.
    #[serde(default)]
    pub fine: i64,
    /// Free-form note.
    #[serde(default)]
    pub note: Option<String>,
}

impl From<LostBorrowingRequest> for LostInput {
    fn from(req: LostBorrowingRequest) -> Self {
        Self {
            staff_id: req.staff_id.map(Into::into),
            reported_at: req.reported_at,
            fine: req.fine,
            note: req.note,
        }
    }
}

/// Return record.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReturningDto {
    /// Return instant.
    pub returned_at: DateTime<Utc>,
    /// Fine charged.
    pub fine: i64,
    /// Processing staff.
    pub staff_id: uuid::Uuid,
}

/// Loss record.
#[derive(Debug, Serialize, ToSchema)]
pub struct LostDto {
    /// Report instant.
    pub reported_at: DateTime<Utc>,
    /// Fine charged.
    pub fine: i64,
    /// Note.
    pub note: Option<String>,
    /// Reporting staff.
    pub staff_id: uuid::Uuid,
}

/// A borrowing.
#[derive(Debug, Serialize, ToSchema)]
pub struct BorrowingDto {
    /// Borrowing UUID.
    pub id: uuid::Uuid,
    /// Borrowed book.
    pub book_id: uuid::Uuid,
    /// Charged subscription.
    pub subscription_id: uuid::Uuid,
    /// Issuing staff.
    pub staff_id: uuid::Uuid,
    /// Loan start.
    pub borrowed_at: DateTime<Utc>,
    /// Due instant.
    pub due_at: DateTime<Utc>,
    /// `Active`, `Overdue`, `Returned` or `Lost`.
    pub status: String,
    /// Present once returned.
    pub returning: Option<ReturningDto>,
    /// Present once reported lost.
    pub lost: Option<LostDto>,
}

impl BorrowingDto {
    /// Renders `borrowing` with its status as of `now`.
    #[must_use]
    pub fn at(borrowing: Borrowing, now: DateTime<Utc>) -> Self {
        let status = borrowing.status_at(now).as_str().to_string();
        let (returning, lost) = match borrowing.resolution {
            Some(Resolution::Returned(r)) => (
                Some(ReturningDto {
                    returned_at: r.returned_at,
                    fine: r.fine,
                    staff_id: r.staff_id.into(),
                }),
                None,
            ),
            Some(Resolution::Lost(l)) => (
                None,
                Some(LostDto {
                    reported_at: l.reported_at,
                    fine: l.fine,
                    note: l.note,
                    staff_id: l.staff_id.into(),
                }),
            ),
            None => (None, None),
        };
        Self {
            id: borrowing.id.into(),
            book_id: borrowing.book_id.into(),
            subscription_id: borrowing.subscription_id.into(),
            staff_id: borrowing.staff_id.into(),
            borrowed_at: borrowing.borrowed_at,
            due_at: borrowing.due_at,
            status,
            returning,
            lost,
        }
    }
}

/// A borrowing with its library and borrower.
#[derive(Debug, Serialize, ToSchema)]
pub struct BorrowingDetailDto {
    /// The borrowing.
    #[serde(flatten)]
    pub borrowing: BorrowingDto,
    /// Library of the loan.
    pub library_id: uuid::Uuid,
    /// Borrower.
    pub user_id: uuid::Uuid,
}

impl BorrowingDetailDto {
    /// Renders a loaded context as of `now`.
    #[must_use]
    pub fn at(ctx: BorrowingContext, now: DateTime<Utc>) -> Self {
        Self {
            library_id: ctx.library_id.into(),
            user_id: ctx.user_id.into(),
            borrowing: BorrowingDto::at(ctx.borrowing, now),
        }
    }
}

/// A listed borrowing with its book and borrower.
#[derive(Debug, Serialize, ToSchema)]
pub struct BorrowingListItemDto {
    /// The borrowing.
    #[serde(flatten)]
    pub borrowing: BorrowingDto,
    /// Library of the loan.
    pub library_id: uuid::Uuid,
    /// Borrowed book.
    pub book: BookDto,
    /// Borrower.
    pub user: UserDto,
}

impl BorrowingListItemDto {
    /// Renders a listing row as of `now`.
    #[must_use]
    pub fn at(view: BorrowingView, now: DateTime<Utc>) -> Self {
        Self {
            borrowing: BorrowingDto::at(view.borrowing, now),
            library_id: view.library_id.into(),
            book: view.book.into(),
            user: view.user.into(),
        }
    }
}

/// Query parameters for `GET /borrowings`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BorrowingQuery {
    /// Restrict to a library.
    pub library_id: Option<uuid::Uuid>,
    /// Restrict to a borrower.
    pub user_id: Option<uuid::Uuid>,
    /// Restrict to a subscription.
    pub subscription_id: Option<uuid::Uuid>,
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
    pub borrowed_at_from: Option<DateTime<Utc>>,
    /// Upper bound on `borrowed_at`.
    pub borrowed_at_to: Option<DateTime<Utc>>,
    /// Items to skip.
    pub skip: Option<i64>,
    /// Page size.
    pub limit: Option<i64>,
}

impl BorrowingQuery {
    /// The listing filter part of the query.
    #[must_use]
    pub fn filter(&self) -> BorrowingFilter {
        BorrowingFilter {
            library_id: self.library_id.map(LibraryId::from),
            user_id: self.user_id.map(UserId::from),
            subscription_id: self.subscription_id.map(SubscriptionId::from),
            is_active: self.is_active,
            is_overdue: self.is_overdue,
            is_returned: self.is_returned,
            is_lost: self.is_lost,
            borrowed_at_from: self.borrowed_at_from,
            borrowed_at_to: self.borrowed_at_to,
        }
    }
}

/// Request body for `POST /borrowings/export`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExportRequest {
    /// Library to export.
    pub library_id: uuid::Uuid,
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

impl From<ExportRequest> for ExportPayload {
    fn from(req: ExportRequest) -> Self {
        Self {
            library_id: req.library_id.into(),
            is_active: req.is_active,
            is_overdue: req.is_overdue,
            is_returned: req.is_returned,
            is_lost: req.is_lost,
            borrowed_at_from: req.borrowed_at_from,
            borrowed_at_to: req.borrowed_at_to,
        }
    }
}
