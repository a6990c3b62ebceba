//! Loan lifecycle: admissibility, fines and resolution.
//!
//! The functions here are pure. Repositories load an [`AdmissionContext`]
//! or [`BorrowingContext`] under a row lock, call into this module to
//! decide, and persist the outcome in the same transaction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Book, BookId, BorrowingId, LibraryId, Staff, StaffId, Subscription, SubscriptionId, User, UserId};
use crate::error::{AppError, Invariant};

/// Record of a returned book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Returning {
    /// Return instant.
    pub returned_at: DateTime<Utc>,
    /// Fine charged, in minor units.
    pub fine: i64,
    /// Staff who processed the return.
    pub staff_id: StaffId,
}

/// Record of a book reported lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lost {
    /// Report instant.
    pub reported_at: DateTime<Utc>,
    /// Fine charged, in minor units.
    pub fine: i64,
    /// Free-form note.
    pub note: Option<String>,
    /// Staff who filed the report.
    pub staff_id: StaffId,
}

/// The single terminal child of a borrowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// The book came back.
    Returned(Returning),
    /// The book was lost.
    Lost(Lost),
}

/// A loan of one book under one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrowing {
    /// Borrowing id.
    pub id: BorrowingId,
    /// Borrowed book.
    pub book_id: BookId,
    /// Subscription the loan counts against.
    pub subscription_id: SubscriptionId,
    /// Staff who issued the loan.
    pub staff_id: StaffId,
    /// Loan start.
    pub borrowed_at: DateTime<Utc>,
    /// Due instant.
    pub due_at: DateTime<Utc>,
    /// Return or loss record; `None` while active.
    pub resolution: Option<Resolution>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Display status derived from a borrowing's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BorrowingStatus {
    /// Out and not yet due.
    Active,
    /// Out and past due.
    Overdue,
    /// Returned.
    Returned,
    /// Reported lost.
    Lost,
}

impl BorrowingStatus {
    /// Human-readable label used in exports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Overdue => "Overdue",
            Self::Returned => "Returned",
            Self::Lost => "Lost",
        }
    }
}

impl Borrowing {
    /// Active iff unresolved and not soft-deleted.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.resolution.is_none() && self.deleted_at.is_none()
    }

    /// Derives the status: Lost, then Returned, then Overdue, then Active.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> BorrowingStatus {
        match &self.resolution {
            Some(Resolution::Lost(_)) => BorrowingStatus::Lost,
            Some(Resolution::Returned(_)) => BorrowingStatus::Returned,
            None if now > self.due_at => BorrowingStatus::Overdue,
            None => BorrowingStatus::Active,
        }
    }

    /// Returns the returning record, if any.
    #[must_use]
    pub const fn returning(&self) -> Option<&Returning> {
        match &self.resolution {
            Some(Resolution::Returned(r)) => Some(r),
            _ => None,
        }
    }

    /// Returns the lost record, if any.
    #[must_use]
    pub const fn lost(&self) -> Option<&Lost> {
        match &self.resolution {
            Some(Resolution::Lost(l)) => Some(l),
            _ => None,
        }
    }

    fn ensure_active(&self) -> Result<(), AppError> {
        match &self.resolution {
            Some(Resolution::Returned(_)) => Err(Invariant::AlreadyReturned.into()),
            Some(Resolution::Lost(_)) => Err(Invariant::AlreadyLost.into()),
            None if self.deleted_at.is_some() => {
                Err(AppError::not_found("borrowing", self.id))
            }
            None => Ok(()),
        }
    }
}

/// Computes the overdue fine: whole overdue days times `fine_per_day`.
///
/// Partial days are floored and early returns cost nothing.
#[must_use]
pub fn compute_fine(due_at: DateTime<Utc>, returned_at: DateTime<Utc>, fine_per_day: i64) -> i64 {
    if returned_at <= due_at {
        return 0;
    }
    (returned_at - due_at).num_days().saturating_mul(fine_per_day)
}

/// Caller input for a new loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRequest {
    /// Book to lend.
    pub book_id: BookId,
    /// Subscription to charge.
    pub subscription_id: SubscriptionId,
    /// Issuing staff.
    pub staff_id: StaffId,
    /// Loan start; defaults to now.
    pub borrowed_at: Option<DateTime<Utc>>,
    /// Due instant; defaults to `borrowed_at + loan_period`.
    pub due_at: Option<DateTime<Utc>>,
}

/// Everything the admissibility checks read, loaded under lock.
#[derive(Debug, Clone)]
pub struct AdmissionContext {
    /// Subscription being charged.
    pub subscription: Subscription,
    /// Library of the subscription's membership.
    pub library_id: LibraryId,
    /// Requested book.
    pub book: Book,
    /// Issuing staff.
    pub staff: Staff,
    /// Active borrowings under the subscription.
    pub active_for_subscription: i64,
    /// Active borrowings of the book.
    pub active_for_book: i64,
}

/// Runs the five admissibility checks in order and builds the borrowing.
///
/// # Errors
///
/// Returns the first failing [`Invariant`]: `MembershipExpired`,
/// `ActiveLoanLimitReached`, `BookNotAvailable`, `BookNotInLibrary`,
/// `StaffNotInLibrary`, or `InvalidDueDate` for an inverted window.
/// Returns [`AppError::Validation`] if the default due date overflows.
pub fn admit(
    ctx: &AdmissionContext,
    req: &BorrowRequest,
    now: DateTime<Utc>,
) -> Result<Borrowing, AppError> {
    if !ctx.subscription.is_valid_at(now) {
        return Err(Invariant::MembershipExpired.into());
    }
    if ctx.active_for_subscription >= i64::from(ctx.subscription.terms.active_loan_limit) {
        return Err(Invariant::ActiveLoanLimitReached.into());
    }
    if ctx.active_for_book != 0 {
        return Err(Invariant::BookNotAvailable.into());
    }
    if ctx.book.library_id != ctx.library_id {
        return Err(Invariant::BookNotInLibrary.into());
    }
    if !ctx.staff.serves(ctx.library_id) {
        return Err(Invariant::StaffNotInLibrary.into());
    }

    let borrowed_at = req.borrowed_at.unwrap_or(now);
    let due_at = match req.due_at {
        Some(due_at) => due_at,
        None => borrowed_at
            .checked_add_signed(Duration::days(i64::from(
                ctx.subscription.terms.loan_period,
            )))
            .ok_or_else(|| AppError::Validation("loan period out of range".into()))?,
    };
    if due_at < borrowed_at {
        return Err(Invariant::InvalidDueDate.into());
    }

    Ok(Borrowing {
        id: BorrowingId::new(),
        book_id: ctx.book.id,
        subscription_id: ctx.subscription.id,
        staff_id: ctx.staff.id,
        borrowed_at,
        due_at,
        resolution: None,
        created_at: now,
        deleted_at: None,
    })
}

/// A borrowing plus the facts needed to resolve it, loaded under lock.
#[derive(Debug, Clone)]
pub struct BorrowingContext {
    /// The locked borrowing.
    pub borrowing: Borrowing,
    /// Library the loan belongs to.
    pub library_id: LibraryId,
    /// Borrowing user.
    pub user_id: UserId,
    /// Snapshotted fine rate of the subscription.
    pub fine_per_day: i64,
    /// Most recent borrowing of the same book.
    pub latest_for_book: BorrowingId,
}

/// Caller input for a return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    /// Processing staff.
    pub staff_id: StaffId,
    /// Return instant; defaults to now.
    pub returned_at: Option<DateTime<Utc>>,
    /// Explicit fine; `None` or negative means compute from overdue days.
    pub fine: Option<i64>,
}

/// Caller input for a loss report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostReport {
    /// Reporting staff.
    pub staff_id: StaffId,
    /// Report instant; defaults to now.
    pub reported_at: Option<DateTime<Utc>>,
    /// Fine charged.
    pub fine: i64,
    /// Free-form note.
    pub note: Option<String>,
}

/// Decides the returning record for an active borrowing.
///
/// # Errors
///
/// `AlreadyReturned`/`AlreadyLost` for resolved loans, `InvalidReturnDate`
/// when returning before the loan started, `StaffNotInLibrary` when the
/// staff serves another library.
pub fn resolve_return(
    ctx: &BorrowingContext,
    staff: &Staff,
    req: &ReturnRequest,
    now: DateTime<Utc>,
) -> Result<Resolution, AppError> {
    ctx.borrowing.ensure_active()?;
    let returned_at = req.returned_at.unwrap_or(now);
    if returned_at < ctx.borrowing.borrowed_at {
        return Err(Invariant::InvalidReturnDate.into());
    }
    if !staff.serves(ctx.library_id) {
        return Err(Invariant::StaffNotInLibrary.into());
    }
    let fine = match req.fine {
        Some(fine) if fine >= 0 => fine,
        _ => compute_fine(ctx.borrowing.due_at, returned_at, ctx.fine_per_day),
    };
    Ok(Resolution::Returned(Returning {
        returned_at,
        fine,
        staff_id: staff.id,
    }))
}

/// Decides the lost record for an active borrowing.
///
/// # Errors
///
/// `AlreadyReturned`/`AlreadyLost`, `InvalidReportDate`,
/// `NotMostRecentBorrowing` for a stale id, `StaffNotInLibrary`, or
/// [`AppError::Validation`] for a negative fine.
pub fn resolve_lost(
    ctx: &BorrowingContext,
    staff: &Staff,
    req: &LostReport,
    now: DateTime<Utc>,
) -> Result<Resolution, AppError> {
    ctx.borrowing.ensure_active()?;
    let reported_at = req.reported_at.unwrap_or(now);
    if reported_at < ctx.borrowing.borrowed_at {
        return Err(Invariant::InvalidReportDate.into());
    }
    if ctx.latest_for_book != ctx.borrowing.id {
        return Err(Invariant::NotMostRecentBorrowing.into());
    }
    if !staff.serves(ctx.library_id) {
        return Err(Invariant::StaffNotInLibrary.into());
    }
    if req.fine < 0 {
        return Err(AppError::Validation("fine must not be negative".into()));
    }
    Ok(Resolution::Lost(Lost {
        reported_at,
        fine: req.fine,
        note: req.note.clone().filter(|n| !n.trim().is_empty()),
        staff_id: staff.id,
    }))
}

/// A borrowing with its book and borrower eagerly loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowingView {
    /// The borrowing.
    pub borrowing: Borrowing,
    /// Library of the loan.
    pub library_id: LibraryId,
    /// Borrowed book.
    pub book: Book,
    /// Borrowing user.
    pub user: User,
}

/// Listing filter shared by the API and the export pipeline.
///
/// Status flags combine with OR; when none is set every status matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowingFilter {
    /// Restrict to a library.
    pub library_id: Option<LibraryId>,
    /// Restrict to a borrower.
    pub user_id: Option<UserId>,
    /// Restrict to a subscription.
    pub subscription_id: Option<SubscriptionId>,
    /// Include active, not overdue loans.
    #[serde(default)]
    pub is_active: bool,
    /// Include active, overdue loans.
    #[serde(default)]
    pub is_overdue: bool,
    /// Include returned loans.
    #[serde(default)]
    pub is_returned: bool,
    /// Include lost loans.
    #[serde(default)]
    pub is_lost: bool,
    /// Lower bound on `borrowed_at` (inclusive).
    pub borrowed_at_from: Option<DateTime<Utc>>,
    /// Upper bound on `borrowed_at` (inclusive).
    pub borrowed_at_to: Option<DateTime<Utc>>,
}

impl BorrowingFilter {
    /// Returns `true` if `view` passes the filter at `now`.
    #[must_use]
    pub fn matches(&self, view: &BorrowingView, now: DateTime<Utc>) -> bool {
        let b = &view.borrowing;
        if b.deleted_at.is_some() {
            return false;
        }
        if self.library_id.is_some_and(|id| id != view.library_id)
            || self.user_id.is_some_and(|id| id != view.user.id)
            || self.subscription_id.is_some_and(|id| id != b.subscription_id)
            || self.borrowed_at_from.is_some_and(|from| b.borrowed_at < from)
            || self.borrowed_at_to.is_some_and(|to| b.borrowed_at > to)
        {
            return false;
        }
        if !(self.is_active || self.is_overdue || self.is_returned || self.is_lost) {
            return true;
        }
        match b.status_at(now) {
            BorrowingStatus::Active => self.is_active,
            BorrowingStatus::Overdue => self.is_overdue,
            BorrowingStatus::Returned => self.is_returned,
            BorrowingStatus::Lost => self.is_lost,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::{BookFields, MembershipId, StaffRole, SubscriptionTerms};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        let Some(t) = Utc.with_ymd_and_hms(y, m, d, h, min, 0).single() else {
            panic!("valid date");
        };
        t
    }

    fn context(library_id: LibraryId) -> AdmissionContext {
        let now = at(2025, 1, 1, 0, 0);
        let subscription = Subscription {
            id: SubscriptionId::new(),
            user_id: UserId::new(),
            membership_id: MembershipId::new(),
            terms: SubscriptionTerms {
                expires_at: at(2025, 12, 31, 0, 0),
                loan_period: 14,
                fine_per_day: 100,
                active_loan_limit: 3,
                usage_limit: 0,
                amount: 0,
            },
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let book = Book::new(
            library_id,
            BookFields {
                code: "K1".into(),
                title: "Kindred".into(),
                author: "Butler".into(),
                year: 1979,
            },
            now,
        );
        let staff = Staff {
            id: StaffId::new(),
            user_id: UserId::new(),
            library_id,
            role: StaffRole::Staff,
            created_at: now,
            deleted_at: None,
        };
        AdmissionContext {
            subscription,
            library_id,
            book,
            staff,
            active_for_subscription: 0,
            active_for_book: 0,
        }
    }

    fn request(ctx: &AdmissionContext) -> BorrowRequest {
        BorrowRequest {
            book_id: ctx.book.id,
            subscription_id: ctx.subscription.id,
            staff_id: ctx.staff.id,
            borrowed_at: Some(at(2025, 2, 1, 0, 0)),
            due_at: None,
        }
    }

    fn admit_err(ctx: &AdmissionContext) -> Invariant {
        let Err(err) = admit(ctx, &request(ctx), at(2025, 2, 1, 0, 0)) else {
            panic!("admission should fail");
        };
        let Some(inv) = err.invariant() else {
            panic!("expected invariant, got {err}");
        };
        inv.clone()
    }

    #[test]
    fn fine_floors_partial_days() {
        let due = at(2025, 2, 15, 0, 0);
        assert_eq!(compute_fine(due, due, 100), 0);
        assert_eq!(compute_fine(due, at(2025, 2, 15, 23, 59), 100), 0);
        assert_eq!(compute_fine(due, at(2025, 2, 16, 0, 0), 100), 100);
        assert_eq!(compute_fine(due, at(2025, 2, 18, 12, 0), 100), 300);
        assert_eq!(compute_fine(due, at(2025, 2, 10, 0, 0), 100), 0);
    }

    #[test]
    fn admit_defaults_due_date_from_loan_period() {
        let ctx = context(LibraryId::new());
        let Ok(b) = admit(&ctx, &request(&ctx), at(2025, 2, 1, 0, 0)) else {
            panic!("admission should succeed");
        };
        assert_eq!(b.due_at, at(2025, 2, 15, 0, 0));
        assert!(b.is_active());
    }

    #[test]
    fn admit_defaults_borrowed_at_to_now() {
        let ctx = context(LibraryId::new());
        let mut req = request(&ctx);
        req.borrowed_at = None;
        let now = at(2025, 3, 1, 9, 30);
        let Ok(b) = admit(&ctx, &req, now) else {
            panic!("admission should succeed");
        };
        assert_eq!(b.borrowed_at, now);
    }

    #[test]
    fn admit_checks_fire_in_order() {
        let library = LibraryId::new();

        let mut ctx = context(library);
        ctx.subscription.terms.expires_at = at(2025, 1, 15, 0, 0);
        ctx.active_for_book = 1;
        assert_eq!(admit_err(&ctx), Invariant::MembershipExpired);

        let mut ctx = context(library);
        ctx.active_for_subscription = 3;
        ctx.active_for_book = 1;
        assert_eq!(admit_err(&ctx), Invariant::ActiveLoanLimitReached);

        let mut ctx = context(library);
        ctx.active_for_book = 1;
        ctx.book.library_id = LibraryId::new();
        assert_eq!(admit_err(&ctx), Invariant::BookNotAvailable);

        let mut ctx = context(library);
        ctx.book.library_id = LibraryId::new();
        ctx.staff.library_id = LibraryId::new();
        assert_eq!(admit_err(&ctx), Invariant::BookNotInLibrary);

        let mut ctx = context(library);
        ctx.staff.library_id = LibraryId::new();
        assert_eq!(admit_err(&ctx), Invariant::StaffNotInLibrary);
    }

    #[test]
    fn admit_reports_due_date_overflow() {
        let mut ctx = context(LibraryId::new());
        ctx.subscription.terms.loan_period = i32::MAX;
        let Err(AppError::Validation(_)) = admit(&ctx, &request(&ctx), at(2025, 2, 1, 0, 0)) else {
            panic!("overflowing due date must be an error");
        };
    }

    #[test]
    fn admit_rejects_due_before_borrow() {
        let ctx = context(LibraryId::new());
        let mut req = request(&ctx);
        req.due_at = Some(at(2025, 1, 20, 0, 0));
        let Err(err) = admit(&ctx, &req, at(2025, 2, 1, 0, 0)) else {
            panic!("inverted window must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::InvalidDueDate));
    }

    fn borrowing_context() -> (BorrowingContext, Staff) {
        let ctx = context(LibraryId::new());
        let Ok(borrowing) = admit(&ctx, &request(&ctx), at(2025, 2, 1, 0, 0)) else {
            panic!("admission should succeed");
        };
        let bctx = BorrowingContext {
            latest_for_book: borrowing.id,
            borrowing,
            library_id: ctx.library_id,
            user_id: ctx.subscription.user_id,
            fine_per_day: 100,
        };
        (bctx, ctx.staff)
    }

    #[test]
    fn return_computes_fine_when_omitted() {
        let (ctx, staff) = borrowing_context();
        let req = ReturnRequest {
            staff_id: staff.id,
            returned_at: Some(at(2025, 2, 18, 12, 0)),
            fine: None,
        };
        let Ok(Resolution::Returned(r)) = resolve_return(&ctx, &staff, &req, Utc::now()) else {
            panic!("return should succeed");
        };
        assert_eq!(r.fine, 300);
    }

    #[test]
    fn return_uses_explicit_fine_and_treats_negative_as_absent() {
        let (ctx, staff) = borrowing_context();
        let mut req = ReturnRequest {
            staff_id: staff.id,
            returned_at: Some(at(2025, 2, 18, 12, 0)),
            fine: Some(42),
        };
        let Ok(Resolution::Returned(r)) = resolve_return(&ctx, &staff, &req, Utc::now()) else {
            panic!("return should succeed");
        };
        assert_eq!(r.fine, 42);

        req.fine = Some(-1);
        let Ok(Resolution::Returned(r)) = resolve_return(&ctx, &staff, &req, Utc::now()) else {
            panic!("return should succeed");
        };
        assert_eq!(r.fine, 300);
    }

    #[test]
    fn return_rejects_resolved_and_early_dates() {
        let (mut ctx, staff) = borrowing_context();
        let req = ReturnRequest {
            staff_id: staff.id,
            returned_at: Some(at(2025, 1, 31, 0, 0)),
            fine: None,
        };
        let Err(err) = resolve_return(&ctx, &staff, &req, Utc::now()) else {
            panic!("early return must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::InvalidReturnDate));

        ctx.borrowing.resolution = Some(Resolution::Returned(Returning {
            returned_at: at(2025, 2, 2, 0, 0),
            fine: 0,
            staff_id: staff.id,
        }));
        let Err(err) = resolve_return(&ctx, &staff, &req, Utc::now()) else {
            panic!("double return must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::AlreadyReturned));
    }

    #[test]
    fn lost_requires_most_recent_borrowing() {
        let (mut ctx, staff) = borrowing_context();
        ctx.latest_for_book = BorrowingId::new();
        let req = LostReport {
            staff_id: staff.id,
            reported_at: None,
            fine: 1_000,
            note: None,
        };
        let Err(err) = resolve_lost(&ctx, &staff, &req, at(2025, 2, 5, 0, 0)) else {
            panic!("stale borrowing must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::NotMostRecentBorrowing));
    }

    #[test]
    fn lost_after_return_fails_already_returned() {
        let (mut ctx, staff) = borrowing_context();
        ctx.borrowing.resolution = Some(Resolution::Lost(Lost {
            reported_at: at(2025, 2, 3, 0, 0),
            fine: 0,
            note: None,
            staff_id: staff.id,
        }));
        let req = ReturnRequest {
            staff_id: staff.id,
            returned_at: None,
            fine: None,
        };
        let Err(err) = resolve_return(&ctx, &staff, &req, at(2025, 2, 5, 0, 0)) else {
            panic!("returning a lost book must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::AlreadyLost));
    }

    #[test]
    fn status_precedence() {
        let (ctx, staff) = borrowing_context();
        let mut b = ctx.borrowing;
        assert_eq!(b.status_at(at(2025, 2, 10, 0, 0)), BorrowingStatus::Active);
        assert_eq!(b.status_at(at(2025, 2, 16, 0, 0)), BorrowingStatus::Overdue);
        b.resolution = Some(Resolution::Returned(Returning {
            returned_at: at(2025, 2, 20, 0, 0),
            fine: 0,
            staff_id: staff.id,
        }));
        assert_eq!(b.status_at(at(2025, 3, 1, 0, 0)), BorrowingStatus::Returned);
    }
}
