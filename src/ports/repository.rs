//! Persistence port.
//!
//! Writes are atomic per aggregate. The two loan transitions take a
//! decision callback so that the checks run under the same lock as the
//! write: implementations load the context, lock the relevant rows, call
//! the callback and persist its result before releasing the lock.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AdmissionContext, Asset, AuthUser, Book, BookId, BorrowRequest, Borrowing, BorrowingContext,
    BorrowingFilter, BorrowingId, BorrowingView, Job, JobId, Library, LibraryId, Membership,
    MembershipId, Notification, NotificationId, PushToken, Resolution, Review, Staff, StaffId,
    Subscription, SubscriptionId, User, UserId,
};
use crate::error::AppError;

/// Decision callback for a new borrowing.
pub type AdmitFn<'a> =
    &'a (dyn Fn(&AdmissionContext) -> Result<Borrowing, AppError> + Send + Sync);

/// Decision callback for returning or losing a borrowing.
pub type ResolveFn<'a> =
    &'a (dyn Fn(&BorrowingContext) -> Result<Resolution, AppError> + Send + Sync);

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Rows to skip.
    pub skip: i64,
    /// Maximum rows to return.
    pub limit: i64,
}

impl Page {
    /// Largest accepted page size.
    pub const MAX_LIMIT: i64 = 100;

    /// Builds a page, clamping `limit` to `1..=MAX_LIMIT` and `skip` to `>= 0`.
    #[must_use]
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip: skip.max(0),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: 20 }
    }
}

/// One page of a listing plus the unpaged total.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    /// Page items.
    pub items: Vec<T>,
    /// Total matching rows.
    pub total: i64,
}

/// A page of notifications with the recipient's unread count.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationListing {
    /// Page items, newest first.
    pub items: Vec<Notification>,
    /// Total notifications of the user.
    pub total: i64,
    /// Unread notifications of the user.
    pub unread: i64,
}

/// Entity-level persistence operations.
#[async_trait]
pub trait Repository: Send + Sync + fmt::Debug {
    // --- Accounts ---

    /// Inserts a user with its credential mapping.
    async fn insert_user(&self, user: &User, auth: &AuthUser) -> Result<(), AppError>;

    /// Loads a non-deleted user.
    async fn get_user(&self, id: UserId) -> Result<User, AppError>;

    /// Finds the credential mapping of a user.
    async fn find_auth_user(&self, user_id: UserId) -> Result<Option<AuthUser>, AppError>;

    /// Finds the credential mapping for an identity-provider subject.
    async fn find_auth_user_by_uid(&self, provider_uid: &str)
    -> Result<Option<AuthUser>, AppError>;

    // --- Libraries and staff ---

    /// Inserts a library.
    async fn insert_library(&self, library: &Library) -> Result<(), AppError>;

    /// Loads a non-deleted library.
    async fn get_library(&self, id: LibraryId) -> Result<Library, AppError>;

    /// Inserts a staff position; `(user, library)` must be unique.
    async fn insert_staff(&self, staff: &Staff) -> Result<(), AppError>;

    /// Loads a non-deleted staff position.
    async fn get_staff(&self, id: StaffId) -> Result<Staff, AppError>;

    /// Finds the non-deleted staff position of `user_id` in `library_id`.
    async fn find_staff(
        &self,
        user_id: UserId,
        library_id: LibraryId,
    ) -> Result<Option<Staff>, AppError>;

    // --- Catalog ---

    /// Inserts a book; fails with `DuplicateBookCode` on a code clash.
    async fn insert_book(&self, book: &Book) -> Result<(), AppError>;

    /// Overwrites a book; fails with `DuplicateBookCode` on a code clash.
    async fn update_book(&self, book: &Book) -> Result<(), AppError>;

    /// Loads a non-deleted book.
    async fn get_book(&self, id: BookId) -> Result<Book, AppError>;

    /// Lists every non-deleted book of a library.
    async fn list_books(&self, library_id: LibraryId) -> Result<Vec<Book>, AppError>;

    /// Inserts an asset, demoting other primary assets of the same owner and kind.
    async fn insert_asset(&self, asset: &Asset) -> Result<(), AppError>;

    /// Inserts a review; fails with `AlreadyReviewed` if one exists.
    async fn insert_review(&self, review: &Review) -> Result<(), AppError>;

    // --- Memberships and subscriptions ---

    /// Inserts a membership plan.
    async fn insert_membership(&self, membership: &Membership) -> Result<(), AppError>;

    /// Overwrites a membership plan. Never touches subscriptions.
    async fn update_membership(&self, membership: &Membership) -> Result<(), AppError>;

    /// Loads a membership, including soft-deleted ones.
    async fn get_membership(&self, id: MembershipId) -> Result<Membership, AppError>;

    /// Lists non-deleted memberships of a library.
    async fn list_memberships(&self, library_id: LibraryId) -> Result<Vec<Membership>, AppError>;

    /// Inserts a subscription.
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;

    /// Overwrites a subscription's terms.
    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;

    /// Loads a non-deleted subscription.
    async fn get_subscription(&self, id: SubscriptionId) -> Result<Subscription, AppError>;

    // --- Borrowings ---

    /// Loads the admission context for `req` under lock, runs `admit`, and
    /// inserts the borrowing it returns in the same transaction.
    async fn create_borrowing(
        &self,
        req: &BorrowRequest,
        admit: AdmitFn<'_>,
    ) -> Result<Borrowing, AppError>;

    /// Locks the borrowing, runs `decide`, and persists the resolution.
    /// Returns the context with the resolution applied.
    async fn resolve_borrowing(
        &self,
        id: BorrowingId,
        decide: ResolveFn<'_>,
    ) -> Result<BorrowingContext, AppError>;

    /// Loads a borrowing context without locking.
    async fn get_borrowing_context(&self, id: BorrowingId) -> Result<BorrowingContext, AppError>;

    /// Lists borrowings with book and user eagerly loaded, newest first.
    /// `page = None` returns every match.
    async fn list_borrowings(
        &self,
        filter: &BorrowingFilter,
        now: DateTime<Utc>,
        page: Option<Page>,
    ) -> Result<Listing<BorrowingView>, AppError>;

    // --- Notifications ---

    /// Inserts a notification. The store announces it on `new_notification`.
    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError>;

    /// Lists a user's notifications, newest first.
    async fn list_notifications(
        &self,
        user_id: UserId,
        page: Page,
    ) -> Result<NotificationListing, AppError>;

    /// Sets `read_at` once; later calls return the stored row unchanged.
    async fn mark_notification_read(
        &self,
        user_id: UserId,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<Notification, AppError>;

    /// Marks every unread notification of a user read. Returns rows changed.
    async fn mark_all_notifications_read(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Registers a push token; re-registering the same token is a no-op.
    async fn upsert_push_token(&self, token: &PushToken) -> Result<(), AppError>;

    /// Lists a user's push tokens.
    async fn list_push_tokens(&self, user_id: UserId) -> Result<Vec<PushToken>, AppError>;

    // --- Jobs ---

    /// Inserts a job row.
    async fn insert_job(&self, job: &Job) -> Result<(), AppError>;

    /// Overwrites status, timestamps, result and error of a job.
    async fn update_job(&self, job: &Job) -> Result<(), AppError>;

    /// Loads a job.
    async fn get_job(&self, id: JobId) -> Result<Job, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_clamped() {
        assert_eq!(Page::new(-5, 0), Page { skip: 0, limit: 1 });
        assert_eq!(Page::new(10, 1_000), Page { skip: 10, limit: 100 });
    }
}
