//! Loan lifecycle orchestration: borrow, return, report lost, list and the
//! overdue sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::borrowing::{admit, resolve_lost, resolve_return};
use crate::domain::{
    Actor, BookId, BorrowRequest, Borrowing, BorrowingContext, BorrowingFilter, BorrowingId,
    BorrowingView, LostReport, ReferenceType, ReturnRequest, Staff, StaffId, SubscriptionId,
};
use crate::error::AppError;
use crate::ports::{Listing, Page, Repository};
use crate::service::authz::{self, Permission};
use crate::service::NotificationService;

/// Caller input for [`LoanService::borrow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBorrowing {
    /// Book to lend.
    pub book_id: BookId,
    /// Subscription to charge.
    pub subscription_id: SubscriptionId,
    /// Issuing staff; honoured for admins only.
    pub staff_id: Option<StaffId>,
    /// Loan start; defaults to now.
    pub borrowed_at: Option<DateTime<Utc>>,
    /// Due instant; defaults to `borrowed_at + loan_period`.
    pub due_at: Option<DateTime<Utc>>,
}

/// Caller input for [`LoanService::return_borrowing`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnInput {
    /// Processing staff; honoured for admins only.
    pub staff_id: Option<StaffId>,
    /// Return instant; defaults to now.
    pub returned_at: Option<DateTime<Utc>>,
    /// Explicit fine; absent or negative means computed.
    pub fine: Option<i64>,
}

/// Caller input for [`LoanService::report_lost`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LostInput {
    /// Reporting staff; honoured for admins only.
    pub staff_id: Option<StaffId>,
    /// Report instant; defaults to now.
    pub reported_at: Option<DateTime<Utc>>,
    /// Fine charged.
    pub fine: i64,
    /// Free-form note.
    pub note: Option<String>,
}

/// Orchestration layer for loans.
///
/// Admission and resolution run inside the repository under row locks;
/// this service authorizes, resolves the acting staff, and schedules the
/// borrower notification once the write has committed.
#[derive(Debug, Clone)]
pub struct LoanService {
    repo: Arc<dyn Repository>,
    notifications: NotificationService,
}

impl LoanService {
    /// Creates a new `LoanService`.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, notifications: NotificationService) -> Self {
        Self {
            repo,
            notifications,
        }
    }

    /// Lends a book.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the actor is not staff of the book's library,
    /// `NotFound` for missing rows, and the admission invariants in order:
    /// `MembershipExpired`, `ActiveLoanLimitReached`, `BookNotAvailable`,
    /// `BookNotInLibrary`, `StaffNotInLibrary`, `InvalidDueDate`.
    pub async fn borrow(&self, actor: &Actor, input: NewBorrowing) -> Result<Borrowing, AppError> {
        let book = self.repo.get_book(input.book_id).await?;
        let staff_id =
            authz::resolve_staff_id(self.repo.as_ref(), actor, book.library_id, input.staff_id)
                .await?;

        let req = BorrowRequest {
            book_id: input.book_id,
            subscription_id: input.subscription_id,
            staff_id,
            borrowed_at: input.borrowed_at,
            due_at: input.due_at,
        };
        let now = Utc::now();
        let borrowing = self
            .repo
            .create_borrowing(&req, &|ctx| admit(ctx, &req, now))
            .await?;

        tracing::info!(
            borrowing_id = %borrowing.id,
            book_id = %borrowing.book_id,
            %staff_id,
            "borrowing created"
        );
        Ok(borrowing)
    }

    /// Records a return and notifies the borrower.
    ///
    /// # Errors
    ///
    /// `AlreadyReturned`, `AlreadyLost`, `InvalidReturnDate`,
    /// `StaffNotInLibrary`, `Unauthorized` or `NotFound`.
    pub async fn return_borrowing(
        &self,
        actor: &Actor,
        id: BorrowingId,
        input: ReturnInput,
    ) -> Result<Borrowing, AppError> {
        let staff = self.acting_staff(actor, id, input.staff_id).await?;
        let req = ReturnRequest {
            staff_id: staff.id,
            returned_at: input.returned_at,
            fine: input.fine,
        };
        let now = Utc::now();
        let ctx = self
            .repo
            .resolve_borrowing(id, &|ctx| resolve_return(ctx, &staff, &req, now))
            .await?;

        let fine = ctx.borrowing.returning().map_or(0, |r| r.fine);
        tracing::info!(borrowing_id = %id, fine, "borrowing returned");
        self.notify_borrower(&ctx, "Book returned", format!("Your loan was returned. Fine: {fine}."));
        Ok(ctx.borrowing)
    }

    /// Records a loss report and notifies the borrower.
    ///
    /// # Errors
    ///
    /// `AlreadyReturned`, `AlreadyLost`, `InvalidReportDate`,
    /// `NotMostRecentBorrowing`, `StaffNotInLibrary`, `Unauthorized`,
    /// `NotFound`, or `Validation` for a negative fine.
    pub async fn report_lost(
        &self,
        actor: &Actor,
        id: BorrowingId,
        input: LostInput,
    ) -> Result<Borrowing, AppError> {
        let staff = self.acting_staff(actor, id, input.staff_id).await?;
        let req = LostReport {
            staff_id: staff.id,
            reported_at: input.reported_at,
            fine: input.fine,
            note: input.note,
        };
        let now = Utc::now();
        let ctx = self
            .repo
            .resolve_borrowing(id, &|ctx| resolve_lost(ctx, &staff, &req, now))
            .await?;

        tracing::info!(borrowing_id = %id, fine = req.fine, "borrowing reported lost");
        self.notify_borrower(
            &ctx,
            "Book reported lost",
            format!("Your loan was reported lost. Fine: {}.", req.fine),
        );
        Ok(ctx.borrowing)
    }

    /// Loads one borrowing visible to the actor.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Unauthorized` for someone else's loan outside the
    /// actor's libraries.
    pub async fn get(&self, actor: &Actor, id: BorrowingId) -> Result<BorrowingContext, AppError> {
        let ctx = self.repo.get_borrowing_context(id).await?;
        if ctx.user_id != actor.user_id {
            authz::authorize(self.repo.as_ref(), actor, ctx.library_id, Permission::FrontDesk)
                .await?;
        }
        Ok(ctx)
    }

    /// Lists borrowings.
    ///
    /// Staff of the filtered library and global admins see every match;
    /// anyone else sees only their own loans.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn list(
        &self,
        actor: &Actor,
        mut filter: BorrowingFilter,
        page: Page,
    ) -> Result<Listing<BorrowingView>, AppError> {
        let sees_all = match filter.library_id {
            _ if actor.is_global_admin() => true,
            Some(library_id) => self
                .repo
                .find_staff(actor.user_id, library_id)
                .await?
                .is_some(),
            None => false,
        };
        if !sees_all {
            filter.user_id = Some(actor.user_id);
        }
        self.repo
            .list_borrowings(&filter, Utc::now(), Some(page))
            .await
    }

    /// Notifies the borrower of every active loan past due at `now`.
    ///
    /// Returns how many notifications were emitted. Individual failures are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Propagates the listing failure.
    pub async fn notify_overdue(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let filter = BorrowingFilter {
            is_overdue: true,
            ..BorrowingFilter::default()
        };
        let overdue = self.repo.list_borrowings(&filter, now, None).await?;
        let mut emitted = 0;
        for view in overdue.items {
            let message = format!(
                "\"{}\" was due on {}.",
                view.book.title,
                view.borrowing.due_at.format("%Y-%m-%d")
            );
            let reference = Some((
                ReferenceType::BorrowingOverdue,
                uuid::Uuid::from(view.borrowing.id),
            ));
            match self
                .notifications
                .emit(view.user.id, "Book overdue", &message, reference)
                .await
            {
                Ok(_) => emitted += 1,
                Err(e) => tracing::warn!(
                    borrowing_id = %view.borrowing.id,
                    error = %e,
                    "failed to emit overdue notification"
                ),
            }
        }
        tracing::info!(emitted, "overdue sweep finished");
        Ok(emitted)
    }

    async fn acting_staff(
        &self,
        actor: &Actor,
        id: BorrowingId,
        requested: Option<StaffId>,
    ) -> Result<Staff, AppError> {
        let ctx = self.repo.get_borrowing_context(id).await?;
        let staff_id =
            authz::resolve_staff_id(self.repo.as_ref(), actor, ctx.library_id, requested).await?;
        self.repo.get_staff(staff_id).await
    }

    fn notify_borrower(&self, ctx: &BorrowingContext, title: &str, message: String) {
        self.notifications.emit_detached(
            ctx.user_id,
            title.to_string(),
            message,
            Some((ReferenceType::Borrowing, uuid::Uuid::from(ctx.borrowing.id))),
        );
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Duration;
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::adapters::LogPushDispatcher;
    use crate::domain::{
        AuthUser, Book, BookFields, GlobalRole, Library, LibraryId, Membership, MembershipPlan,
        NotificationHub, StaffRole, Subscription, User, UserId,
    };
    use crate::error::Invariant;
    use crate::persistence::InMemoryRepository;

    struct Fixture {
        repo: Arc<dyn Repository>,
        loans: LoanService,
        notifications: NotificationService,
        clerk: Actor,
        reader: Actor,
        library_id: LibraryId,
        book_id: BookId,
        subscription_id: SubscriptionId,
    }

    async fn user(repo: &InMemoryRepository, name: &str) -> UserId {
        let user = User {
            id: UserId::new(),
            name: name.into(),
            email: format!("{name}@example.test"),
            created_at: Utc::now(),
            deleted_at: None,
        };
        let auth = AuthUser {
            user_id: user.id,
            provider_uid: name.into(),
            role: GlobalRole::User,
        };
        assert!(repo.insert_user(&user, &auth).await.is_ok());
        user.id
    }

    async fn fixture() -> Fixture {
        fixture_with_limit(2).await
    }

    async fn fixture_with_limit(active_loan_limit: i32) -> Fixture {
        let hub = NotificationHub::new();
        let repo = Arc::new(InMemoryRepository::with_hub(hub.clone()));
        let now = Utc::now();

        let library = Library {
            id: LibraryId::new(),
            name: "Central".into(),
            address: None,
            description: None,
            created_at: now,
            deleted_at: None,
        };
        assert!(repo.insert_library(&library).await.is_ok());

        let clerk_id = user(&repo, "clerk").await;
        let staff = Staff {
            id: StaffId::new(),
            user_id: clerk_id,
            library_id: library.id,
            role: StaffRole::Staff,
            created_at: now,
            deleted_at: None,
        };
        assert!(repo.insert_staff(&staff).await.is_ok());
        let reader_id = user(&repo, "reader").await;

        let book = Book::new(
            library.id,
            BookFields {
                code: "A-1".into(),
                title: "Dune".into(),
                author: "Herbert".into(),
                year: 1965,
            },
            now,
        );
        assert!(repo.insert_book(&book).await.is_ok());

        let plan = MembershipPlan {
            name: "Basic".into(),
            duration: 30,
            active_loan_limit,
            loan_period: 7,
            fine_per_day: 50,
            price: 1000,
            usage_limit: 0,
            description: None,
        };
        let Ok(membership) = Membership::new(library.id, plan, now - Duration::days(20)) else {
            panic!("plan should be valid");
        };
        assert!(repo.insert_membership(&membership).await.is_ok());
        let Ok(subscription) = Subscription::purchase(reader_id, &membership, now - Duration::days(20))
        else {
            panic!("purchase should succeed");
        };
        assert!(repo.insert_subscription(&subscription).await.is_ok());

        let repo: Arc<dyn Repository> = repo;
        let notifications =
            NotificationService::new(Arc::clone(&repo), Arc::new(LogPushDispatcher), hub);
        Fixture {
            loans: LoanService::new(Arc::clone(&repo), notifications.clone()),
            repo,
            notifications,
            clerk: Actor::new(clerk_id, GlobalRole::User),
            reader: Actor::new(reader_id, GlobalRole::User),
            library_id: library.id,
            book_id: book.id,
            subscription_id: subscription.id,
        }
    }

    fn lend(f: &Fixture, borrowed_days_ago: i64) -> NewBorrowing {
        NewBorrowing {
            book_id: f.book_id,
            subscription_id: f.subscription_id,
            staff_id: None,
            borrowed_at: Some(Utc::now() - Duration::days(borrowed_days_ago)),
            due_at: None,
        }
    }

    #[tokio::test]
    async fn late_return_charges_fine_and_notifies_borrower() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        let mut inbox = f.notifications.stream(&f.reader, cancel.clone());

        let Ok(borrowing) = f.loans.borrow(&f.clerk, lend(&f, 10)).await else {
            panic!("borrow should succeed");
        };
        let Ok(returned) = f
            .loans
            .return_borrowing(&f.clerk, borrowing.id, ReturnInput::default())
            .await
        else {
            panic!("return should succeed");
        };
        assert_eq!(returned.returning().map(|r| r.fine), Some(150));

        let Ok(Some(notification)) =
            tokio::time::timeout(StdDuration::from_secs(1), inbox.recv()).await
        else {
            panic!("borrower should be notified");
        };
        assert_eq!(notification.title, "Book returned");
        cancel.cancel();
    }

    async fn shelve(f: &Fixture, code: &str) -> BookId {
        let book = Book::new(
            f.library_id,
            BookFields {
                code: code.into(),
                title: format!("Volume {code}"),
                author: "Various".into(),
                year: 2000,
            },
            Utc::now(),
        );
        assert!(f.repo.insert_book(&book).await.is_ok());
        book.id
    }

    /// Runs every request at once and tallies admissions and refusals.
    async fn race(f: &Fixture, requests: Vec<NewBorrowing>) -> (usize, Vec<Invariant>) {
        let mut tasks = JoinSet::new();
        for input in requests {
            let loans = f.loans.clone();
            let clerk = f.clerk;
            tasks.spawn(async move { loans.borrow(&clerk, input).await });
        }
        let mut admitted = 0;
        let mut refused = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok(outcome) = joined else {
                panic!("borrow task panicked");
            };
            match outcome {
                Ok(_) => admitted += 1,
                Err(err) => {
                    let Some(inv) = err.invariant() else {
                        panic!("unexpected error: {err}");
                    };
                    refused.push(inv.clone());
                }
            }
        }
        (admitted, refused)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_borrows_of_one_book_admit_exactly_one() {
        let f = fixture().await;
        let requests = (0..8).map(|_| lend(&f, 0)).collect();

        let (admitted, refused) = race(&f, requests).await;

        assert_eq!(admitted, 1);
        assert_eq!(refused.len(), 7);
        assert!(refused.iter().all(|inv| *inv == Invariant::BookNotAvailable));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_borrows_respect_active_loan_limit() {
        let f = fixture_with_limit(3).await;
        let mut requests = Vec::new();
        for i in 0..6 {
            let book_id = shelve(&f, &format!("R-{i}")).await;
            requests.push(NewBorrowing {
                book_id,
                ..lend(&f, 0)
            });
        }

        let (admitted, refused) = race(&f, requests).await;

        assert_eq!(admitted, 3);
        assert_eq!(refused.len(), 3);
        assert!(refused.iter().all(|inv| *inv == Invariant::ActiveLoanLimitReached));
        let filter = BorrowingFilter {
            subscription_id: Some(f.subscription_id),
            is_active: true,
            is_overdue: true,
            ..BorrowingFilter::default()
        };
        let Ok(active) = f.repo.list_borrowings(&filter, Utc::now(), None).await else {
            panic!("listing should succeed");
        };
        assert_eq!(active.total, 3);
    }

    #[tokio::test]
    async fn borrowed_book_cannot_be_lent_twice() {
        let f = fixture().await;
        assert!(f.loans.borrow(&f.clerk, lend(&f, 1)).await.is_ok());
        let Err(err) = f.loans.borrow(&f.clerk, lend(&f, 0)).await else {
            panic!("second loan must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::BookNotAvailable));
    }

    #[tokio::test]
    async fn reader_cannot_issue_loans() {
        let f = fixture().await;
        let Err(err) = f.loans.borrow(&f.reader, lend(&f, 0)).await else {
            panic!("a reader must not lend books");
        };
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn lost_loan_cannot_be_returned() {
        let f = fixture().await;
        let Ok(borrowing) = f.loans.borrow(&f.clerk, lend(&f, 2)).await else {
            panic!("borrow should succeed");
        };
        let lost = LostInput {
            fine: 2000,
            note: Some("water damage".into()),
            ..LostInput::default()
        };
        assert!(f.loans.report_lost(&f.clerk, borrowing.id, lost).await.is_ok());
        let Err(err) = f
            .loans
            .return_borrowing(&f.clerk, borrowing.id, ReturnInput::default())
            .await
        else {
            panic!("return after loss must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::AlreadyLost));
    }

    #[tokio::test]
    async fn listing_scopes_readers_to_their_own_loans() {
        let f = fixture().await;
        assert!(f.loans.borrow(&f.clerk, lend(&f, 1)).await.is_ok());

        let library_filter = BorrowingFilter {
            library_id: Some(f.library_id),
            ..BorrowingFilter::default()
        };
        let Ok(staff_view) = f
            .loans
            .list(&f.clerk, library_filter.clone(), Page::default())
            .await
        else {
            panic!("staff listing should succeed");
        };
        assert_eq!(staff_view.total, 1);

        let stranger = Actor::new(UserId::new(), GlobalRole::User);
        let Ok(stranger_view) = f.loans.list(&stranger, library_filter, Page::default()).await
        else {
            panic!("listing should succeed");
        };
        assert_eq!(stranger_view.total, 0);

        let Ok(reader_view) = f
            .loans
            .list(&f.reader, BorrowingFilter::default(), Page::default())
            .await
        else {
            panic!("reader listing should succeed");
        };
        assert_eq!(reader_view.total, 1);
    }

    #[tokio::test]
    async fn overdue_sweep_notifies_each_overdue_borrower() {
        let f = fixture().await;
        assert!(f.loans.borrow(&f.clerk, lend(&f, 9)).await.is_ok());
        let Ok(emitted) = f.loans.notify_overdue(Utc::now()).await else {
            panic!("sweep should succeed");
        };
        assert_eq!(emitted, 1);

        let Ok(inbox) = f.notifications.list(&f.reader, Page::default()).await else {
            panic!("inbox should load");
        };
        assert_eq!(inbox.unread, 1);
        assert!(
            inbox
                .items
                .iter()
                .any(|n| n.title == "Book overdue")
        );
    }
}
