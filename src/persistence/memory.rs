//! In-memory [`Repository`] for tests and database-less local runs.
//!
//! All state sits behind one mutex that is held across each check and
//! write, which gives the loan transitions the same serialization the
//! Postgres row locks provide. When a [`NotificationHub`] is attached,
//! inserted notifications are published to it directly, standing in for
//! the `new_notification` trigger.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AdmissionContext, Asset, AuthUser, Book, BookId, BorrowRequest, Borrowing, BorrowingContext,
    BorrowingFilter, BorrowingId, BorrowingView, Job, JobId, Library, LibraryId, Membership,
    MembershipId, Notification, NotificationHub, NotificationId, PushToken, Review, Staff,
    StaffId, Subscription, SubscriptionId, User, UserId,
};
use crate::error::{AppError, Invariant};
use crate::ports::{AdmitFn, Listing, NotificationListing, Page, Repository, ResolveFn};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    auth_users: HashMap<UserId, AuthUser>,
    libraries: HashMap<LibraryId, Library>,
    staffs: HashMap<StaffId, Staff>,
    books: HashMap<BookId, Book>,
    assets: Vec<Asset>,
    reviews: Vec<Review>,
    memberships: HashMap<MembershipId, Membership>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    borrowings: HashMap<BorrowingId, Borrowing>,
    notifications: Vec<Notification>,
    push_tokens: Vec<PushToken>,
    jobs: HashMap<JobId, Job>,
}

impl State {
    fn code_taken(&self, book: &Book) -> bool {
        self.books.values().any(|b| {
            b.id != book.id
                && b.deleted_at.is_none()
                && b.library_id == book.library_id
                && b.code == book.code
        })
    }

    fn library_of_subscription(&self, id: SubscriptionId) -> Result<LibraryId, AppError> {
        let subscription = self
            .subscriptions
            .get(&id)
            .ok_or_else(|| AppError::not_found("subscription", id))?;
        self.memberships
            .get(&subscription.membership_id)
            .map(|m| m.library_id)
            .ok_or_else(|| AppError::not_found("membership", subscription.membership_id))
    }

    fn borrowing_context(&self, id: BorrowingId) -> Result<BorrowingContext, AppError> {
        let borrowing = self
            .borrowings
            .get(&id)
            .ok_or_else(|| AppError::not_found("borrowing", id))?;
        let subscription = self
            .subscriptions
            .get(&borrowing.subscription_id)
            .ok_or_else(|| AppError::not_found("subscription", borrowing.subscription_id))?;
        let library_id = self.library_of_subscription(subscription.id)?;
        let latest_for_book = self
            .borrowings
            .values()
            .filter(|b| b.book_id == borrowing.book_id && b.deleted_at.is_none())
            .max_by_key(|b| (b.borrowed_at, b.created_at))
            .map_or(borrowing.id, |b| b.id);
        Ok(BorrowingContext {
            borrowing: borrowing.clone(),
            library_id,
            user_id: subscription.user_id,
            fine_per_day: subscription.terms.fine_per_day,
            latest_for_book,
        })
    }

    fn view(&self, borrowing: &Borrowing) -> Result<BorrowingView, AppError> {
        let book = self
            .books
            .get(&borrowing.book_id)
            .ok_or_else(|| AppError::not_found("book", borrowing.book_id))?;
        let subscription = self
            .subscriptions
            .get(&borrowing.subscription_id)
            .ok_or_else(|| AppError::not_found("subscription", borrowing.subscription_id))?;
        let user = self
            .users
            .get(&subscription.user_id)
            .ok_or_else(|| AppError::not_found("user", subscription.user_id))?;
        Ok(BorrowingView {
            borrowing: borrowing.clone(),
            library_id: self.library_of_subscription(subscription.id)?,
            book: book.clone(),
            user: user.clone(),
        })
    }
}

/// Mutex-guarded in-memory repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    hub: Option<NotificationHub>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty repository that publishes inserted notifications to `hub`.
    #[must_use]
    pub fn with_hub(hub: NotificationHub) -> Self {
        Self {
            state: Mutex::default(),
            hub: Some(hub),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn page_of<T>(items: Vec<T>, page: Page) -> Vec<T> {
    let skip = usize::try_from(page.skip).unwrap_or(0);
    let limit = usize::try_from(page.limit).unwrap_or(usize::MAX);
    items.into_iter().skip(skip).take(limit).collect()
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_user(&self, user: &User, auth: &AuthUser) -> Result<(), AppError> {
        let mut state = self.lock();
        let email = user.email.to_lowercase();
        if state
            .users
            .values()
            .any(|u| u.deleted_at.is_none() && u.email.to_lowercase() == email)
        {
            return Err(AppError::Validation("email is already registered".into()));
        }
        if state
            .auth_users
            .values()
            .any(|a| a.provider_uid == auth.provider_uid)
        {
            return Err(AppError::Validation(
                "identity is already linked to a user".into(),
            ));
        }
        state.users.insert(user.id, user.clone());
        state.auth_users.insert(auth.user_id, auth.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, AppError> {
        self.lock()
            .users
            .get(&id)
            .filter(|u| u.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found("user", id))
    }

    async fn find_auth_user(&self, user_id: UserId) -> Result<Option<AuthUser>, AppError> {
        Ok(self.lock().auth_users.get(&user_id).cloned())
    }

    async fn find_auth_user_by_uid(
        &self,
        provider_uid: &str,
    ) -> Result<Option<AuthUser>, AppError> {
        Ok(self
            .lock()
            .auth_users
            .values()
            .find(|a| a.provider_uid == provider_uid)
            .cloned())
    }

    async fn insert_library(&self, library: &Library) -> Result<(), AppError> {
        self.lock().libraries.insert(library.id, library.clone());
        Ok(())
    }

    async fn get_library(&self, id: LibraryId) -> Result<Library, AppError> {
        self.lock()
            .libraries
            .get(&id)
            .filter(|l| l.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found("library", id))
    }

    async fn insert_staff(&self, staff: &Staff) -> Result<(), AppError> {
        let mut state = self.lock();
        if state.staffs.values().any(|s| {
            s.deleted_at.is_none() && s.user_id == staff.user_id && s.library_id == staff.library_id
        }) {
            return Err(AppError::Validation(
                "user is already staff of this library".into(),
            ));
        }
        state.staffs.insert(staff.id, staff.clone());
        Ok(())
    }

    async fn get_staff(&self, id: StaffId) -> Result<Staff, AppError> {
        self.lock()
            .staffs
            .get(&id)
            .filter(|s| s.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found("staff", id))
    }

    async fn find_staff(
        &self,
        user_id: UserId,
        library_id: LibraryId,
    ) -> Result<Option<Staff>, AppError> {
        Ok(self
            .lock()
            .staffs
            .values()
            .find(|s| s.user_id == user_id && s.serves(library_id))
            .cloned())
    }

    async fn insert_book(&self, book: &Book) -> Result<(), AppError> {
        let mut state = self.lock();
        if state.code_taken(book) {
            return Err(Invariant::DuplicateBookCode.into());
        }
        state.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn update_book(&self, book: &Book) -> Result<(), AppError> {
        let mut state = self.lock();
        if !state
            .books
            .get(&book.id)
            .is_some_and(|b| b.deleted_at.is_none())
        {
            return Err(AppError::not_found("book", book.id));
        }
        if state.code_taken(book) {
            return Err(Invariant::DuplicateBookCode.into());
        }
        state.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn get_book(&self, id: BookId) -> Result<Book, AppError> {
        self.lock()
            .books
            .get(&id)
            .filter(|b| b.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found("book", id))
    }

    async fn list_books(&self, library_id: LibraryId) -> Result<Vec<Book>, AppError> {
        let mut books: Vec<Book> = self
            .lock()
            .books
            .values()
            .filter(|b| b.library_id == library_id && b.deleted_at.is_none())
            .cloned()
            .collect();
        books.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(books)
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), AppError> {
        let mut state = self.lock();
        if asset.is_primary {
            for other in &mut state.assets {
                if other.owner == asset.owner && other.kind == asset.kind {
                    other.is_primary = false;
                }
            }
        }
        state.assets.push(asset.clone());
        Ok(())
    }

    async fn insert_review(&self, review: &Review) -> Result<(), AppError> {
        let mut state = self.lock();
        if state
            .reviews
            .iter()
            .any(|r| r.borrowing_id == review.borrowing_id)
        {
            return Err(Invariant::AlreadyReviewed.into());
        }
        state.reviews.push(review.clone());
        Ok(())
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<(), AppError> {
        self.lock()
            .memberships
            .insert(membership.id, membership.clone());
        Ok(())
    }

    async fn update_membership(&self, membership: &Membership) -> Result<(), AppError> {
        let mut state = self.lock();
        let Some(slot) = state.memberships.get_mut(&membership.id) else {
            return Err(AppError::not_found("membership", membership.id));
        };
        *slot = membership.clone();
        Ok(())
    }

    async fn get_membership(&self, id: MembershipId) -> Result<Membership, AppError> {
        self.lock()
            .memberships
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("membership", id))
    }

    async fn list_memberships(&self, library_id: LibraryId) -> Result<Vec<Membership>, AppError> {
        let mut memberships: Vec<Membership> = self
            .lock()
            .memberships
            .values()
            .filter(|m| m.library_id == library_id && m.deleted_at.is_none())
            .cloned()
            .collect();
        memberships.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(memberships)
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        self.lock()
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let mut state = self.lock();
        let Some(slot) = state
            .subscriptions
            .get_mut(&subscription.id)
            .filter(|s| s.deleted_at.is_none())
        else {
            return Err(AppError::not_found("subscription", subscription.id));
        };
        slot.terms = subscription.terms.clone();
        slot.updated_at = subscription.updated_at;
        Ok(())
    }

    async fn get_subscription(&self, id: SubscriptionId) -> Result<Subscription, AppError> {
        self.lock()
            .subscriptions
            .get(&id)
            .filter(|s| s.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found("subscription", id))
    }

    async fn create_borrowing(
        &self,
        req: &BorrowRequest,
        admit: AdmitFn<'_>,
    ) -> Result<Borrowing, AppError> {
        let mut state = self.lock();
        let subscription = state
            .subscriptions
            .get(&req.subscription_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("subscription", req.subscription_id))?;
        let book = state
            .books
            .get(&req.book_id)
            .filter(|b| b.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found("book", req.book_id))?;
        let staff = state
            .staffs
            .get(&req.staff_id)
            .filter(|s| s.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::not_found("staff", req.staff_id))?;
        let library_id = state.library_of_subscription(subscription.id)?;
        let active = |pred: &dyn Fn(&Borrowing) -> bool| {
            count(
                state
                    .borrowings
                    .values()
                    .filter(|b| b.is_active() && pred(b))
                    .count(),
            )
        };
        let ctx = AdmissionContext {
            active_for_subscription: active(&|b| b.subscription_id == subscription.id),
            active_for_book: active(&|b| b.book_id == book.id),
            subscription,
            library_id,
            book,
            staff,
        };
        let borrowing = admit(&ctx)?;
        state.borrowings.insert(borrowing.id, borrowing.clone());
        Ok(borrowing)
    }

    async fn resolve_borrowing(
        &self,
        id: BorrowingId,
        decide: ResolveFn<'_>,
    ) -> Result<BorrowingContext, AppError> {
        let mut state = self.lock();
        let mut ctx = state.borrowing_context(id)?;
        let resolution = decide(&ctx)?;
        if let Some(stored) = state.borrowings.get_mut(&id) {
            stored.resolution = Some(resolution.clone());
        }
        ctx.borrowing.resolution = Some(resolution);
        Ok(ctx)
    }

    async fn get_borrowing_context(&self, id: BorrowingId) -> Result<BorrowingContext, AppError> {
        let ctx = self.lock().borrowing_context(id)?;
        if ctx.borrowing.deleted_at.is_some() {
            return Err(AppError::not_found("borrowing", id));
        }
        Ok(ctx)
    }

    async fn list_borrowings(
        &self,
        filter: &BorrowingFilter,
        now: DateTime<Utc>,
        page: Option<Page>,
    ) -> Result<Listing<BorrowingView>, AppError> {
        let state = self.lock();
        let mut items = Vec::new();
        for borrowing in state.borrowings.values() {
            let view = state.view(borrowing)?;
            if filter.matches(&view, now) {
                items.push(view);
            }
        }
        items.sort_by(|a, b| {
            b.borrowing
                .borrowed_at
                .cmp(&a.borrowing.borrowed_at)
                .then_with(|| a.borrowing.id.cmp(&b.borrowing.id))
        });
        let total = count(items.len());
        let items = match page {
            Some(page) => page_of(items, page),
            None => items,
        };
        Ok(Listing { items, total })
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        self.lock().notifications.push(notification.clone());
        if let Some(hub) = &self.hub {
            hub.publish(notification);
        }
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        page: Page,
    ) -> Result<NotificationListing, AppError> {
        let state = self.lock();
        let mut mine: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        let total = count(mine.len());
        let unread = count(mine.iter().filter(|n| n.read_at.is_none()).count());
        Ok(NotificationListing {
            items: page_of(mine, page),
            total,
            unread,
        })
    }

    async fn mark_notification_read(
        &self,
        user_id: UserId,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<Notification, AppError> {
        let mut state = self.lock();
        let Some(notification) = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        else {
            return Err(AppError::not_found("notification", id));
        };
        notification.mark_read(now);
        Ok(notification.clone())
    }

    async fn mark_all_notifications_read(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut changed = 0;
        for n in &mut self.lock().notifications {
            if n.user_id == user_id && n.read_at.is_none() {
                n.mark_read(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn upsert_push_token(&self, token: &PushToken) -> Result<(), AppError> {
        let mut state = self.lock();
        if !state
            .push_tokens
            .iter()
            .any(|t| t.user_id == token.user_id && t.token == token.token)
        {
            state.push_tokens.push(token.clone());
        }
        Ok(())
    }

    async fn list_push_tokens(&self, user_id: UserId) -> Result<Vec<PushToken>, AppError> {
        Ok(self
            .lock()
            .push_tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_job(&self, job: &Job) -> Result<(), AppError> {
        self.lock().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), AppError> {
        let mut state = self.lock();
        let Some(slot) = state.jobs.get_mut(&job.id) else {
            return Err(AppError::not_found("job", job.id));
        };
        *slot = job.clone();
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, AppError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("job", id))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{BookFields, StaffRole};

    fn book(library_id: LibraryId, code: &str) -> Book {
        Book::new(
            library_id,
            BookFields {
                code: code.into(),
                title: "Title".into(),
                author: "Author".into(),
                year: 2000,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_code_is_scoped_to_library() {
        let repo = InMemoryRepository::new();
        let lib_a = LibraryId::new();
        let lib_b = LibraryId::new();
        assert!(repo.insert_book(&book(lib_a, "X1")).await.is_ok());
        assert!(repo.insert_book(&book(lib_b, "X1")).await.is_ok());
        let Err(err) = repo.insert_book(&book(lib_a, "X1")).await else {
            panic!("duplicate code must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::DuplicateBookCode));
    }

    #[tokio::test]
    async fn staff_is_unique_per_library() {
        let repo = InMemoryRepository::new();
        let staff = Staff {
            id: StaffId::new(),
            user_id: UserId::new(),
            library_id: LibraryId::new(),
            role: StaffRole::Staff,
            created_at: Utc::now(),
            deleted_at: None,
        };
        assert!(repo.insert_staff(&staff).await.is_ok());
        let again = Staff {
            id: StaffId::new(),
            ..staff.clone()
        };
        assert!(matches!(
            repo.insert_staff(&again).await,
            Err(AppError::Validation(_))
        ));
        let Ok(Some(found)) = repo.find_staff(staff.user_id, staff.library_id).await else {
            panic!("staff should be found");
        };
        assert_eq!(found.id, staff.id);
    }

    #[tokio::test]
    async fn notifications_publish_to_attached_hub() {
        let hub = NotificationHub::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        hub.subscribe(tx);
        let repo = InMemoryRepository::with_hub(hub);
        let n = Notification::new(UserId::new(), "t", "m", None, Utc::now());
        assert!(repo.insert_notification(&n).await.is_ok());
        let Some(received) = rx.recv().await else {
            panic!("hub should deliver");
        };
        assert_eq!(received.id, n.id);
    }

    #[tokio::test]
    async fn mark_read_keeps_first_timestamp_and_counts_unread() {
        let repo = InMemoryRepository::new();
        let user = UserId::new();
        let t0 = Utc::now();
        let a = Notification::new(user, "a", "a", None, t0);
        let b = Notification::new(user, "b", "b", None, t0);
        assert!(repo.insert_notification(&a).await.is_ok());
        assert!(repo.insert_notification(&b).await.is_ok());

        let Ok(first) = repo.mark_notification_read(user, a.id, t0).await else {
            panic!("mark read");
        };
        let Ok(second) = repo
            .mark_notification_read(user, a.id, t0 + chrono::Duration::hours(1))
            .await
        else {
            panic!("mark read again");
        };
        assert_eq!(first.read_at, second.read_at);

        let Ok(listing) = repo.list_notifications(user, Page::default()).await else {
            panic!("list");
        };
        assert_eq!(listing.total, 2);
        assert_eq!(listing.unread, 1);

        assert!(matches!(
            repo.mark_notification_read(UserId::new(), a.id, t0).await,
            Err(AppError::NotFound { .. })
        ));
    }
}
