//! Database row records and their conversion into domain types.
//!
//! Records mirror table columns one to one. Enum columns are stored as
//! text and parsed on the way out; a value the domain does not know is
//! reported as [`AppError::Internal`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    Asset, AuthUser, Book, Borrowing, BorrowingContext, BorrowingView, Job, Library, Lost, Membership,
    Notification, PushToken, Resolution, Returning, Staff, Subscription, SubscriptionTerms, User,
};
use crate::error::AppError;

fn parse_column<T>(column: &str, value: &str) -> Result<T, AppError>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| AppError::Internal(format!("bad {column} column: {e}")))
}

#[derive(Debug, FromRow)]
pub(crate) struct LibraryRecord {
    id: Uuid,
    name: String,
    address: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl LibraryRecord {
    pub(crate) fn into_domain(self) -> Library {
        Library {
            id: self.id.into(),
            name: self.name,
            address: self.address,
            description: self.description,
            created_at: self.created_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRecord {
    id: Uuid,
    name: String,
    email: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub(crate) fn into_domain(self) -> User {
        User {
            id: self.id.into(),
            name: self.name,
            email: self.email,
            created_at: self.created_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AuthUserRecord {
    user_id: Uuid,
    provider_uid: String,
    role: String,
}

impl AuthUserRecord {
    pub(crate) fn into_domain(self) -> Result<AuthUser, AppError> {
        Ok(AuthUser {
            user_id: self.user_id.into(),
            provider_uid: self.provider_uid,
            role: parse_column("auth_users.role", &self.role)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct StaffRecord {
    id: Uuid,
    user_id: Uuid,
    library_id: Uuid,
    role: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl StaffRecord {
    pub(crate) fn into_domain(self) -> Result<Staff, AppError> {
        Ok(Staff {
            id: self.id.into(),
            user_id: self.user_id.into(),
            library_id: self.library_id.into(),
            role: parse_column("staffs.role", &self.role)?,
            created_at: self.created_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct BookRecord {
    id: Uuid,
    library_id: Uuid,
    code: String,
    title: String,
    author: String,
    year: i32,
    cover: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl BookRecord {
    pub(crate) fn into_domain(self) -> Book {
        Book {
            id: self.id.into(),
            library_id: self.library_id.into(),
            code: self.code,
            title: self.title,
            author: self.author,
            year: self.year,
            cover: self.cover,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Flattened asset columns for inserts.
#[derive(Debug)]
pub(crate) struct AssetRow {
    pub(crate) id: Uuid,
    pub(crate) owner_type: &'static str,
    pub(crate) owner_id: Uuid,
    pub(crate) kind: String,
    pub(crate) path: String,
    pub(crate) is_primary: bool,
    pub(crate) position: i32,
    pub(crate) colors: serde_json::Value,
}

impl AssetRow {
    pub(crate) fn from_domain(asset: &Asset) -> Result<Self, AppError> {
        let (owner_type, owner_id) = asset.owner.to_parts();
        Ok(Self {
            id: asset.id.into(),
            owner_type,
            owner_id,
            kind: asset.kind.clone(),
            path: asset.path.clone(),
            is_primary: asset.is_primary,
            position: asset.position,
            colors: serde_json::to_value(&asset.colors)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MembershipRecord {
    id: Uuid,
    library_id: Uuid,
    name: String,
    duration: i32,
    active_loan_limit: i32,
    loan_period: i32,
    fine_per_day: i64,
    price: i64,
    usage_limit: i32,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl MembershipRecord {
    pub(crate) fn into_domain(self) -> Membership {
        Membership {
            id: self.id.into(),
            library_id: self.library_id.into(),
            name: self.name,
            duration: self.duration,
            active_loan_limit: self.active_loan_limit,
            loan_period: self.loan_period,
            fine_per_day: self.fine_per_day,
            price: self.price,
            usage_limit: self.usage_limit,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SubscriptionRecord {
    id: Uuid,
    user_id: Uuid,
    membership_id: Uuid,
    expires_at: DateTime<Utc>,
    loan_period: i32,
    fine_per_day: i64,
    active_loan_limit: i32,
    usage_limit: i32,
    amount: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    pub(crate) fn into_domain(self) -> Subscription {
        Subscription {
            id: self.id.into(),
            user_id: self.user_id.into(),
            membership_id: self.membership_id.into(),
            terms: SubscriptionTerms {
                expires_at: self.expires_at,
                loan_period: self.loan_period,
                fine_per_day: self.fine_per_day,
                active_loan_limit: self.active_loan_limit,
                usage_limit: self.usage_limit,
                amount: self.amount,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Borrowing columns with the inline resolution.
#[derive(Debug, FromRow)]
pub(crate) struct BorrowingRecord {
    id: Uuid,
    book_id: Uuid,
    subscription_id: Uuid,
    staff_id: Uuid,
    borrowed_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    resolution: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    fine: Option<i64>,
    note: Option<String>,
    resolved_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl BorrowingRecord {
    pub(crate) fn into_domain(self) -> Result<Borrowing, AppError> {
        let resolution = match self.resolution.as_deref() {
            None => None,
            Some(kind) => {
                let (Some(at), Some(staff)) = (self.resolved_at, self.resolved_by) else {
                    return Err(AppError::Internal(format!(
                        "borrowing {} has an incomplete resolution",
                        self.id
                    )));
                };
                let fine = self.fine.unwrap_or(0);
                match kind {
                    "returned" => Some(Resolution::Returned(Returning {
                        returned_at: at,
                        fine,
                        staff_id: staff.into(),
                    })),
                    "lost" => Some(Resolution::Lost(Lost {
                        reported_at: at,
                        fine,
                        note: self.note,
                        staff_id: staff.into(),
                    })),
                    other => {
                        return Err(AppError::Internal(format!(
                            "bad borrowings.resolution column: {other}"
                        )));
                    }
                }
            }
        };
        Ok(Borrowing {
            id: self.id.into(),
            book_id: self.book_id.into(),
            subscription_id: self.subscription_id.into(),
            staff_id: self.staff_id.into(),
            borrowed_at: self.borrowed_at,
            due_at: self.due_at,
            resolution,
            created_at: self.created_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Flattened resolution columns for updates.
#[derive(Debug)]
pub(crate) struct ResolutionRow {
    pub(crate) kind: &'static str,
    pub(crate) at: DateTime<Utc>,
    pub(crate) fine: i64,
    pub(crate) note: Option<String>,
    pub(crate) staff_id: Uuid,
}

impl ResolutionRow {
    pub(crate) fn from_domain(resolution: &Resolution) -> Self {
        match resolution {
            Resolution::Returned(r) => Self {
                kind: "returned",
                at: r.returned_at,
                fine: r.fine,
                note: None,
                staff_id: r.staff_id.into(),
            },
            Resolution::Lost(l) => Self {
                kind: "lost",
                at: l.reported_at,
                fine: l.fine,
                note: l.note.clone(),
                staff_id: l.staff_id.into(),
            },
        }
    }
}

/// A borrowing joined with its library, borrower and fine rate.
#[derive(Debug, FromRow)]
pub(crate) struct BorrowingContextRecord {
    #[sqlx(flatten)]
    borrowing: BorrowingRecord,
    library_id: Uuid,
    user_id: Uuid,
    fine_per_day: i64,
}

impl BorrowingContextRecord {
    pub(crate) fn id(&self) -> Uuid {
        self.borrowing.id
    }

    pub(crate) fn book_id(&self) -> Uuid {
        self.borrowing.book_id
    }

    pub(crate) fn into_domain(self, latest_for_book: Uuid) -> Result<BorrowingContext, AppError> {
        Ok(BorrowingContext {
            borrowing: self.borrowing.into_domain()?,
            library_id: self.library_id.into(),
            user_id: self.user_id.into(),
            fine_per_day: self.fine_per_day,
            latest_for_book: latest_for_book.into(),
        })
    }
}

/// One row of the borrowing listing join.
#[derive(Debug, FromRow)]
pub(crate) struct BorrowingViewRecord {
    #[sqlx(flatten)]
    borrowing: BorrowingRecord,
    library_id: Uuid,
    book_code: String,
    book_title: String,
    book_author: String,
    book_year: i32,
    book_cover: Option<String>,
    book_created_at: DateTime<Utc>,
    book_updated_at: DateTime<Utc>,
    book_deleted_at: Option<DateTime<Utc>>,
    user_id: Uuid,
    user_name: String,
    user_email: String,
    user_created_at: DateTime<Utc>,
    user_deleted_at: Option<DateTime<Utc>>,
}

impl BorrowingViewRecord {
    pub(crate) fn into_domain(self) -> Result<BorrowingView, AppError> {
        let borrowing = self.borrowing.into_domain()?;
        let book = Book {
            id: borrowing.book_id,
            library_id: self.library_id.into(),
            code: self.book_code,
            title: self.book_title,
            author: self.book_author,
            year: self.book_year,
            cover: self.book_cover,
            created_at: self.book_created_at,
            updated_at: self.book_updated_at,
            deleted_at: self.book_deleted_at,
        };
        let user = User {
            id: self.user_id.into(),
            name: self.user_name,
            email: self.user_email,
            created_at: self.user_created_at,
            deleted_at: self.user_deleted_at,
        };
        Ok(BorrowingView {
            borrowing,
            library_id: self.library_id.into(),
            book,
            user,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct NotificationRecord {
    id: Uuid,
    user_id: Uuid,
    title: String,
    message: String,
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub(crate) fn into_domain(self) -> Result<Notification, AppError> {
        let reference_type = self
            .reference_type
            .as_deref()
            .map(|v| parse_column("notifications.reference_type", v))
            .transpose()?;
        Ok(Notification {
            id: self.id.into(),
            user_id: self.user_id.into(),
            title: self.title,
            message: self.message,
            reference_type,
            reference_id: self.reference_id,
            read_at: self.read_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PushTokenRecord {
    id: Uuid,
    user_id: Uuid,
    token: String,
    provider: String,
    created_at: DateTime<Utc>,
}

impl PushTokenRecord {
    pub(crate) fn into_domain(self) -> Result<PushToken, AppError> {
        Ok(PushToken {
            id: self.id.into(),
            user_id: self.user_id.into(),
            token: self.token,
            provider: parse_column("push_tokens.provider", &self.provider)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct JobRecord {
    id: Uuid,
    #[sqlx(rename = "type")]
    job_type: String,
    library_id: Uuid,
    staff_id: Uuid,
    status: String,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl JobRecord {
    pub(crate) fn into_domain(self) -> Result<Job, AppError> {
        Ok(Job {
            id: self.id.into(),
            job_type: parse_column("jobs.type", &self.job_type)?,
            library_id: self.library_id.into(),
            staff_id: self.staff_id.into(),
            status: parse_column("jobs.status", &self.status)?,
            payload: self.payload,
            result: self.result,
            error: self.error,
            started_at: self.started_at,
            finished_at: self.finished_at,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{BorrowingId, StaffId};

    fn record(resolution: Option<&str>) -> BorrowingRecord {
        let now = Utc::now();
        BorrowingRecord {
            id: BorrowingId::new().into(),
            book_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            staff_id: Uuid::new_v4(),
            borrowed_at: now,
            due_at: now,
            resolution: resolution.map(str::to_string),
            resolved_at: resolution.map(|_| now),
            fine: Some(150),
            note: Some("water damage".into()),
            resolved_by: resolution.map(|_| StaffId::new().into()),
            created_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn inline_resolution_maps_to_enum() {
        let Ok(b) = record(None).into_domain() else {
            panic!("active row converts");
        };
        assert!(b.is_active());

        let Ok(b) = record(Some("lost")).into_domain() else {
            panic!("lost row converts");
        };
        let Some(lost) = b.lost() else {
            panic!("expected lost resolution");
        };
        assert_eq!(lost.fine, 150);
        assert_eq!(lost.note.as_deref(), Some("water damage"));

        assert!(record(Some("stolen")).into_domain().is_err());
    }

    #[test]
    fn resolution_row_round_trips_kind() {
        let Ok(b) = record(Some("returned")).into_domain() else {
            panic!("returned row converts");
        };
        let Some(resolution) = b.resolution.as_ref() else {
            panic!("expected resolution");
        };
        let row = ResolutionRow::from_domain(resolution);
        assert_eq!(row.kind, "returned");
        assert_eq!(row.fine, 150);
        assert!(row.note.is_none());
    }
}
