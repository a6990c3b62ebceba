//! PostgreSQL implementation of [`Repository`].
//!
//! Loan transitions run in one transaction each. Borrow admission locks
//! the subscription row and then the book row (`FOR UPDATE`, always in
//! that order); return and loss lock the borrowing row. The partial
//! unique index on active borrowings per book backs the availability
//! check.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{
    AssetRow, AuthUserRecord, BookRecord, BorrowingContextRecord,
    BorrowingViewRecord, JobRecord, LibraryRecord, MembershipRecord, NotificationRecord,
    PushTokenRecord, ResolutionRow, StaffRecord, SubscriptionRecord, UserRecord,
};
use crate::config::AppConfig;
use crate::domain::{
    AdmissionContext, Asset, AuthUser, Book, BookId, BorrowRequest, Borrowing, BorrowingContext,
    BorrowingFilter, BorrowingId, BorrowingView, Job, JobId, Library, LibraryId, Membership,
    MembershipId, Notification, NotificationId, PushToken, Review, Staff, StaffId, Subscription,
    SubscriptionId, User, UserId,
};
use crate::error::{AppError, Invariant};
use crate::ports::{AdmitFn, Listing, NotificationListing, Page, Repository, ResolveFn};

const BORROWING_COLUMNS: &str = "b.id, b.book_id, b.subscription_id, b.staff_id, b.borrowed_at, \
     b.due_at, b.resolution, b.resolved_at, b.fine, b.note, b.resolved_by, b.created_at, \
     b.deleted_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, membership_id, expires_at, loan_period, \
     fine_per_day, active_loan_limit, usage_limit, amount, created_at, updated_at, deleted_at";

const MEMBERSHIP_COLUMNS: &str = "id, library_id, name, duration, active_loan_limit, loan_period, \
     fine_per_day, price, usage_limit, description, created_at, updated_at, deleted_at";

const BOOK_COLUMNS: &str =
    "id, library_id, code, title, author, year, cover, created_at, updated_at, deleted_at";

const STAFF_COLUMNS: &str = "id, user_id, library_id, role, created_at, deleted_at";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, title, message, reference_type, reference_id, read_at, created_at";

const JOB_COLUMNS: &str = "id, type, library_id, staff_id, status, payload, result, error, \
     started_at, finished_at, created_at";

const VIEW_JOINS: &str = " FROM borrowings b \
     JOIN books bk ON bk.id = b.book_id \
     JOIN subscriptions s ON s.id = b.subscription_id \
     JOIN memberships m ON m.id = s.membership_id \
     JOIN users u ON u.id = s.user_id \
     WHERE b.deleted_at IS NULL";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Maps a unique-key violation to `conflict`, anything else to `Internal`.
fn on_conflict(conflict: impl FnOnce() -> AppError) -> impl FnOnce(sqlx::Error) -> AppError {
    move |err| {
        if is_unique_violation(&err) {
            conflict()
        } else {
            AppError::from(err)
        }
    }
}

fn push_borrowing_filter(
    qb: &mut QueryBuilder<'_, Postgres>,
    filter: &BorrowingFilter,
    now: DateTime<Utc>,
) {
    if let Some(id) = filter.library_id {
        qb.push(" AND m.library_id = ").push_bind(Uuid::from(id));
    }
    if let Some(id) = filter.user_id {
        qb.push(" AND s.user_id = ").push_bind(Uuid::from(id));
    }
    if let Some(id) = filter.subscription_id {
        qb.push(" AND b.subscription_id = ").push_bind(Uuid::from(id));
    }
    if let Some(from) = filter.borrowed_at_from {
        qb.push(" AND b.borrowed_at >= ").push_bind(from);
    }
    if let Some(to) = filter.borrowed_at_to {
        qb.push(" AND b.borrowed_at <= ").push_bind(to);
    }
    if !(filter.is_active || filter.is_overdue || filter.is_returned || filter.is_lost) {
        return;
    }
    qb.push(" AND (");
    {
        let mut any = qb.separated(" OR ");
        if filter.is_active {
            any.push("(b.resolution IS NULL AND b.due_at >= ")
                .push_bind_unseparated(now)
                .push_unseparated(")");
        }
        if filter.is_overdue {
            any.push("(b.resolution IS NULL AND b.due_at < ")
                .push_bind_unseparated(now)
                .push_unseparated(")");
        }
        if filter.is_returned {
            any.push("b.resolution = 'returned'");
        }
        if filter.is_lost {
            any.push("b.resolution = 'lost'");
        }
    }
    qb.push(")");
}

/// PostgreSQL-backed repository over a shared `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool on `url` sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Upstream`] if the database is unreachable.
    pub async fn connect(url: &str, config: &AppConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| AppError::upstream("database", e))?;
        Ok(Self { pool })
    }

    /// Applies pending migrations from `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Upstream`] if a migration fails.
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::upstream("database", e))
    }

    /// The underlying pool, shared with the notification listener.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Most recent non-deleted borrowing of `book_id`, or `fallback` if none.
async fn latest_for_book(
    conn: &mut sqlx::PgConnection,
    book_id: Uuid,
    fallback: Uuid,
) -> Result<Uuid, AppError> {
    let latest = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM borrowings WHERE book_id = $1 AND deleted_at IS NULL \
         ORDER BY borrowed_at DESC, created_at DESC LIMIT 1",
    )
    .bind(book_id)
    .fetch_optional(conn)
    .await?;
    Ok(latest.unwrap_or(fallback))
}

#[async_trait]
impl Repository for PgRepository {
    async fn insert_user(&self, user: &User, auth: &AuthUser) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO users (id, name, email, created_at, deleted_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::from(user.id))
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.created_at)
        .bind(user.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(on_conflict(|| {
            AppError::Validation("email is already registered".into())
        }))?;
        sqlx::query("INSERT INTO auth_users (user_id, provider_uid, role) VALUES ($1, $2, $3)")
            .bind(Uuid::from(auth.user_id))
            .bind(&auth.provider_uid)
            .bind(auth.role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(on_conflict(|| {
                AppError::Validation("identity is already linked to a user".into())
            }))?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, AppError> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, created_at, deleted_at FROM users \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await?
        .map(UserRecord::into_domain)
        .ok_or_else(|| AppError::not_found("user", id))
    }

    async fn find_auth_user(&self, user_id: UserId) -> Result<Option<AuthUser>, AppError> {
        sqlx::query_as::<_, AuthUserRecord>(
            "SELECT user_id, provider_uid, role FROM auth_users WHERE user_id = $1",
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await?
        .map(AuthUserRecord::into_domain)
        .transpose()
    }

    async fn find_auth_user_by_uid(
        &self,
        provider_uid: &str,
    ) -> Result<Option<AuthUser>, AppError> {
        sqlx::query_as::<_, AuthUserRecord>(
            "SELECT user_id, provider_uid, role FROM auth_users WHERE provider_uid = $1",
        )
        .bind(provider_uid)
        .fetch_optional(&self.pool)
        .await?
        .map(AuthUserRecord::into_domain)
        .transpose()
    }

    async fn insert_library(&self, library: &Library) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO libraries (id, name, address, description, created_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(library.id))
        .bind(&library.name)
        .bind(&library.address)
        .bind(&library.description)
        .bind(library.created_at)
        .bind(library.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_library(&self, id: LibraryId) -> Result<Library, AppError> {
        sqlx::query_as::<_, LibraryRecord>(
            "SELECT id, name, address, description, created_at, deleted_at FROM libraries \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await?
        .map(LibraryRecord::into_domain)
        .ok_or_else(|| AppError::not_found("library", id))
    }

    async fn insert_staff(&self, staff: &Staff) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO staffs (id, user_id, library_id, role, created_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(staff.id))
        .bind(Uuid::from(staff.user_id))
        .bind(Uuid::from(staff.library_id))
        .bind(staff.role.as_str())
        .bind(staff.created_at)
        .bind(staff.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(on_conflict(|| {
            AppError::Validation("user is already staff of this library".into())
        }))?;
        Ok(())
    }

    async fn get_staff(&self, id: StaffId) -> Result<Staff, AppError> {
        let sql = format!("SELECT {STAFF_COLUMNS} FROM staffs WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, StaffRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("staff", id))?
            .into_domain()
    }

    async fn find_staff(
        &self,
        user_id: UserId,
        library_id: LibraryId,
    ) -> Result<Option<Staff>, AppError> {
        let sql = format!(
            "SELECT {STAFF_COLUMNS} FROM staffs \
             WHERE user_id = $1 AND library_id = $2 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, StaffRecord>(&sql)
            .bind(Uuid::from(user_id))
            .bind(Uuid::from(library_id))
            .fetch_optional(&self.pool)
            .await?
            .map(StaffRecord::into_domain)
            .transpose()
    }

    async fn insert_book(&self, book: &Book) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO books (id, library_id, code, title, author, year, cover, created_at, \
             updated_at, deleted_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::from(book.id))
        .bind(Uuid::from(book.library_id))
        .bind(&book.code)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.year)
        .bind(&book.cover)
        .bind(book.created_at)
        .bind(book.updated_at)
        .bind(book.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(on_conflict(|| Invariant::DuplicateBookCode.into()))?;
        Ok(())
    }

    async fn update_book(&self, book: &Book) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE books SET code = $2, title = $3, author = $4, year = $5, cover = $6, \
             updated_at = $7 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(Uuid::from(book.id))
        .bind(&book.code)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.year)
        .bind(&book.cover)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await
        .map_err(on_conflict(|| Invariant::DuplicateBookCode.into()))?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("book", book.id));
        }
        Ok(())
    }

    async fn get_book(&self, id: BookId) -> Result<Book, AppError> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, BookRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(BookRecord::into_domain)
            .ok_or_else(|| AppError::not_found("book", id))
    }

    async fn list_books(&self, library_id: LibraryId) -> Result<Vec<Book>, AppError> {
        let sql = format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE library_id = $1 AND deleted_at IS NULL \
             ORDER BY code"
        );
        let rows = sqlx::query_as::<_, BookRecord>(&sql)
            .bind(Uuid::from(library_id))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(BookRecord::into_domain).collect())
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), AppError> {
        let row = AssetRow::from_domain(asset)?;
        let mut tx = self.pool.begin().await?;
        if row.is_primary {
            sqlx::query(
                "UPDATE assets SET is_primary = FALSE \
                 WHERE owner_type = $1 AND owner_id = $2 AND kind = $3",
            )
            .bind(row.owner_type)
            .bind(row.owner_id)
            .bind(&row.kind)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "INSERT INTO assets (id, owner_type, owner_id, kind, path, is_primary, position, colors) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(row.id)
        .bind(row.owner_type)
        .bind(row.owner_id)
        .bind(&row.kind)
        .bind(&row.path)
        .bind(row.is_primary)
        .bind(row.position)
        .bind(&row.colors)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_review(&self, review: &Review) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO reviews (id, borrowing_id, rating, comment, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::from(review.id))
        .bind(Uuid::from(review.borrowing_id))
        .bind(review.rating)
        .bind(&review.comment)
        .bind(review.created_at)
        .execute(&self.pool)
        .await
        .map_err(on_conflict(|| Invariant::AlreadyReviewed.into()))?;
        Ok(())
    }

    async fn insert_membership(&self, m: &Membership) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO memberships ({MEMBERSHIP_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(m.id))
            .bind(Uuid::from(m.library_id))
            .bind(&m.name)
            .bind(m.duration)
            .bind(m.active_loan_limit)
            .bind(m.loan_period)
            .bind(m.fine_per_day)
            .bind(m.price)
            .bind(m.usage_limit)
            .bind(&m.description)
            .bind(m.created_at)
            .bind(m.updated_at)
            .bind(m.deleted_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_membership(&self, m: &Membership) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE memberships SET name = $2, duration = $3, active_loan_limit = $4, \
             loan_period = $5, fine_per_day = $6, price = $7, usage_limit = $8, \
             description = $9, updated_at = $10, deleted_at = $11 WHERE id = $1",
        )
        .bind(Uuid::from(m.id))
        .bind(&m.name)
        .bind(m.duration)
        .bind(m.active_loan_limit)
        .bind(m.loan_period)
        .bind(m.fine_per_day)
        .bind(m.price)
        .bind(m.usage_limit)
        .bind(&m.description)
        .bind(m.updated_at)
        .bind(m.deleted_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("membership", m.id));
        }
        Ok(())
    }

    async fn get_membership(&self, id: MembershipId) -> Result<Membership, AppError> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = $1");
        sqlx::query_as::<_, MembershipRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(MembershipRecord::into_domain)
            .ok_or_else(|| AppError::not_found("membership", id))
    }

    async fn list_memberships(&self, library_id: LibraryId) -> Result<Vec<Membership>, AppError> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships \
             WHERE library_id = $1 AND deleted_at IS NULL ORDER BY name"
        );
        let rows = sqlx::query_as::<_, MembershipRecord>(&sql)
            .bind(Uuid::from(library_id))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(MembershipRecord::into_domain).collect())
    }

    async fn insert_subscription(&self, s: &Subscription) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(s.id))
            .bind(Uuid::from(s.user_id))
            .bind(Uuid::from(s.membership_id))
            .bind(s.terms.expires_at)
            .bind(s.terms.loan_period)
            .bind(s.terms.fine_per_day)
            .bind(s.terms.active_loan_limit)
            .bind(s.terms.usage_limit)
            .bind(s.terms.amount)
            .bind(s.created_at)
            .bind(s.updated_at)
            .bind(s.deleted_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_subscription(&self, s: &Subscription) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET expires_at = $2, loan_period = $3, fine_per_day = $4, \
             active_loan_limit = $5, usage_limit = $6, amount = $7, updated_at = $8 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(Uuid::from(s.id))
        .bind(s.terms.expires_at)
        .bind(s.terms.loan_period)
        .bind(s.terms.fine_per_day)
        .bind(s.terms.active_loan_limit)
        .bind(s.terms.usage_limit)
        .bind(s.terms.amount)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("subscription", s.id));
        }
        Ok(())
    }

    async fn get_subscription(&self, id: SubscriptionId) -> Result<Subscription, AppError> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, SubscriptionRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(SubscriptionRecord::into_domain)
            .ok_or_else(|| AppError::not_found("subscription", id))
    }

    async fn create_borrowing(
        &self,
        req: &BorrowRequest,
        admit: AdmitFn<'_>,
    ) -> Result<Borrowing, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1 FOR UPDATE");
        let subscription = sqlx::query_as::<_, SubscriptionRecord>(&sql)
            .bind(Uuid::from(req.subscription_id))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("subscription", req.subscription_id))?
            .into_domain();

        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1 AND deleted_at IS NULL FOR UPDATE");
        let book = sqlx::query_as::<_, BookRecord>(&sql)
            .bind(Uuid::from(req.book_id))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("book", req.book_id))?
            .into_domain();

        let library_id = sqlx::query_scalar::<_, Uuid>("SELECT library_id FROM memberships WHERE id = $1")
            .bind(Uuid::from(subscription.membership_id))
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!("SELECT {STAFF_COLUMNS} FROM staffs WHERE id = $1 AND deleted_at IS NULL");
        let staff = sqlx::query_as::<_, StaffRecord>(&sql)
            .bind(Uuid::from(req.staff_id))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("staff", req.staff_id))?
            .into_domain()?;

        let active_for_subscription = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM borrowings \
             WHERE subscription_id = $1 AND resolution IS NULL AND deleted_at IS NULL",
        )
        .bind(Uuid::from(subscription.id))
        .fetch_one(&mut *tx)
        .await?;

        let active_for_book = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM borrowings \
             WHERE book_id = $1 AND resolution IS NULL AND deleted_at IS NULL",
        )
        .bind(Uuid::from(book.id))
        .fetch_one(&mut *tx)
        .await?;

        let ctx = AdmissionContext {
            subscription,
            library_id: library_id.into(),
            book,
            staff,
            active_for_subscription,
            active_for_book,
        };
        let borrowing = admit(&ctx)?;

        sqlx::query(
            "INSERT INTO borrowings (id, book_id, subscription_id, staff_id, borrowed_at, due_at, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::from(borrowing.id))
        .bind(Uuid::from(borrowing.book_id))
        .bind(Uuid::from(borrowing.subscription_id))
        .bind(Uuid::from(borrowing.staff_id))
        .bind(borrowing.borrowed_at)
        .bind(borrowing.due_at)
        .bind(borrowing.created_at)
        .execute(&mut *tx)
        .await
        .map_err(on_conflict(|| Invariant::BookNotAvailable.into()))?;

        tx.commit().await?;
        Ok(borrowing)
    }

    async fn resolve_borrowing(
        &self,
        id: BorrowingId,
        decide: ResolveFn<'_>,
    ) -> Result<BorrowingContext, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {BORROWING_COLUMNS}, m.library_id, s.user_id, s.fine_per_day \
             FROM borrowings b \
             JOIN subscriptions s ON s.id = b.subscription_id \
             JOIN memberships m ON m.id = s.membership_id \
             WHERE b.id = $1 FOR UPDATE OF b"
        );
        let record = sqlx::query_as::<_, BorrowingContextRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("borrowing", id))?;
        let latest = latest_for_book(&mut *tx, record.book_id(), record.id()).await?;
        let mut ctx = record.into_domain(latest)?;

        let resolution = decide(&ctx)?;
        let row = ResolutionRow::from_domain(&resolution);
        sqlx::query(
            "UPDATE borrowings SET resolution = $2, resolved_at = $3, fine = $4, note = $5, \
             resolved_by = $6 WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(row.kind)
        .bind(row.at)
        .bind(row.fine)
        .bind(&row.note)
        .bind(row.staff_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        ctx.borrowing.resolution = Some(resolution);
        Ok(ctx)
    }

    async fn get_borrowing_context(&self, id: BorrowingId) -> Result<BorrowingContext, AppError> {
        let sql = format!(
            "SELECT {BORROWING_COLUMNS}, m.library_id, s.user_id, s.fine_per_day \
             FROM borrowings b \
             JOIN subscriptions s ON s.id = b.subscription_id \
             JOIN memberships m ON m.id = s.membership_id \
             WHERE b.id = $1 AND b.deleted_at IS NULL"
        );
        let mut conn = self.pool.acquire().await?;
        let record = sqlx::query_as::<_, BorrowingContextRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::not_found("borrowing", id))?;
        let latest = latest_for_book(&mut *conn, record.book_id(), record.id()).await?;
        record.into_domain(latest)
    }

    async fn list_borrowings(
        &self,
        filter: &BorrowingFilter,
        now: DateTime<Utc>,
        page: Option<Page>,
    ) -> Result<Listing<BorrowingView>, AppError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        count.push(VIEW_JOINS);
        push_borrowing_filter(&mut count, filter, now);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {BORROWING_COLUMNS}, m.library_id, \
             bk.code AS book_code, bk.title AS book_title, bk.author AS book_author, \
             bk.year AS book_year, bk.cover AS book_cover, bk.created_at AS book_created_at, \
             bk.updated_at AS book_updated_at, bk.deleted_at AS book_deleted_at, \
             u.id AS user_id, u.name AS user_name, u.email AS user_email, \
             u.created_at AS user_created_at, u.deleted_at AS user_deleted_at"
        ));
        select.push(VIEW_JOINS);
        push_borrowing_filter(&mut select, filter, now);
        select.push(" ORDER BY b.borrowed_at DESC, b.id");
        if let Some(page) = page {
            select.push(" OFFSET ").push_bind(page.skip);
            select.push(" LIMIT ").push_bind(page.limit);
        }
        let rows = select
            .build_query_as::<BorrowingViewRecord>()
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(BorrowingViewRecord::into_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Listing { items, total })
    }

    async fn insert_notification(&self, n: &Notification) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(n.id))
            .bind(Uuid::from(n.user_id))
            .bind(&n.title)
            .bind(&n.message)
            .bind(n.reference_type.map(|t| t.as_str()))
            .bind(n.reference_id)
            .bind(n.read_at)
            .bind(n.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        page: Page,
    ) -> Result<NotificationListing, AppError> {
        let (total, unread) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE read_at IS NULL) \
             FROM notifications WHERE user_id = $1",
        )
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = $1 \
             ORDER BY created_at DESC, id OFFSET $2 LIMIT $3"
        );
        let rows = sqlx::query_as::<_, NotificationRecord>(&sql)
            .bind(Uuid::from(user_id))
            .bind(page.skip)
            .bind(page.limit)
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(NotificationRecord::into_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(NotificationListing {
            items,
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
        let sql = format!(
            "UPDATE notifications SET read_at = COALESCE(read_at, $3) \
             WHERE id = $1 AND user_id = $2 RETURNING {NOTIFICATION_COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRecord>(&sql)
            .bind(Uuid::from(id))
            .bind(Uuid::from(user_id))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("notification", id))?
            .into_domain()
    }

    async fn mark_all_notifications_read(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = $2 WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(Uuid::from(user_id))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_push_token(&self, token: &PushToken) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO push_tokens (id, user_id, token, provider, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (user_id, token) DO NOTHING",
        )
        .bind(Uuid::from(token.id))
        .bind(Uuid::from(token.user_id))
        .bind(&token.token)
        .bind(token.provider.as_str())
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_push_tokens(&self, user_id: UserId) -> Result<Vec<PushToken>, AppError> {
        let rows = sqlx::query_as::<_, PushTokenRecord>(
            "SELECT id, user_id, token, provider, created_at FROM push_tokens WHERE user_id = $1",
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PushTokenRecord::into_domain).collect()
    }

    async fn insert_job(&self, job: &Job) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(job.id))
            .bind(job.job_type.as_str())
            .bind(Uuid::from(job.library_id))
            .bind(Uuid::from(job.staff_id))
            .bind(job.status.as_str())
            .bind(&job.payload)
            .bind(&job.result)
            .bind(&job.error)
            .bind(job.started_at)
            .bind(job.finished_at)
            .bind(job.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, result = $3, error = $4, started_at = $5, \
             finished_at = $6 WHERE id = $1",
        )
        .bind(Uuid::from(job.id))
        .bind(job.status.as_str())
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("job", job.id));
        }
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, AppError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("job", id))?
            .into_domain()
    }
}
