//! Membership plan and subscription DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    Membership, MembershipPatch, MembershipPlan, Subscription, SubscriptionPatch,
};

/// Request body for `POST /memberships`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateMembershipRequest {
    /// Owning library.
    pub library_id: uuid::Uuid,
    /// Display name.
    pub name: String,
    /// Subscription length in days.
    pub duration: i32,
    /// Maximum simultaneous active loans.
    pub active_loan_limit: i32,
    /// Default loan period in days.
    pub loan_period: i32,
    /// Fine per overdue day, in minor units.
    #[serde(default)]
    pub fine_per_day: i64,
    /// Purchase price, in minor units.
    #[serde(default)]
    pub price: i64,
    /// Lifetime loan cap (0 = unlimited).
    #[serde(default)]
    pub usage_limit: i32,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

impl From<CreateMembershipRequest> for MembershipPlan {
    fn from(req: CreateMembershipRequest) -> Self {
        Self {
            name: req.name,
            duration: req.duration,
            active_loan_limit: req.active_loan_limit,
            loan_period: req.loan_period,
            fine_per_day: req.fine_per_day,
            price: req.price,
            usage_limit: req.usage_limit,
            description: req.description,
        }
    }
}

/// Request body for `PATCH /memberships/{id}`. Absent fields are kept.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateMembershipRequest {
    /// New name.
    pub name: Option<String>,
    /// New duration.
    pub duration: Option<i32>,
    /// New active loan limit.
    pub active_loan_limit: Option<i32>,
    /// New loan period.
    pub loan_period: Option<i32>,
    /// New fine per day.
    pub fine_per_day: Option<i64>,
    /// New price.
    pub price: Option<i64>,
    /// New usage limit.
    pub usage_limit: Option<i32>,
    /// New description.
    pub description: Option<String>,
}

impl From<UpdateMembershipRequest> for MembershipPatch {
    fn from(req: UpdateMembershipRequest) -> Self {
        Self {
            name: req.name,
            duration: req.duration,
            active_loan_limit: req.active_loan_limit,
            loan_period: req.loan_period,
            fine_per_day: req.fine_per_day,
            price: req.price,
            usage_limit: req.usage_limit,
            description: req.description,
        }
    }
}

/// A membership plan.
#[derive(Debug, Serialize, ToSchema)]
pub struct MembershipDto {
    /// Membership UUID.
    pub id: uuid::Uuid,
    /// Owning library.
    pub library_id: uuid::Uuid,
    /// Display name.
    pub name: String,
    /// Subscription length in days.
    pub duration: i32,
    /// Maximum simultaneous active loans.
    pub active_loan_limit: i32,
    /// Default loan period in days.
    pub loan_period: i32,
    /// Fine per overdue day.
    pub fine_per_day: i64,
    /// Purchase price.
    pub price: i64,
    /// Lifetime loan cap.
    pub usage_limit: i32,
    /// Free-form description.
    pub description: Option<String>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<Membership> for MembershipDto {
    fn from(m: Membership) -> Self {
        Self {
            id: m.id.into(),
            library_id: m.library_id.into(),
            name: m.name,
            duration: m.duration,
            active_loan_limit: m.active_loan_limit,
            loan_period: m.loan_period,
            fine_per_day: m.fine_per_day,
            price: m.price,
            usage_limit: m.usage_limit,
            description: m.description,
            updated_at: m.updated_at,
        }
    }
}

/// Request body for `POST /subscriptions`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    /// Subscriber.
    pub user_id: uuid::Uuid,
    /// Plan to purchase.
    pub membership_id: uuid::Uuid,
}

/// Request body for `PATCH /subscriptions/{id}`. Absent fields are kept.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateSubscriptionRequest {
    /// New expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// New loan period.
    pub loan_period: Option<i32>,
    /// New fine per day.
    pub fine_per_day: Option<i64>,
    /// New active loan limit.
    pub active_loan_limit: Option<i32>,
    /// New usage limit.
    pub usage_limit: Option<i32>,
    /// New amount.
    pub amount: Option<i64>,
}

impl From<UpdateSubscriptionRequest> for SubscriptionPatch {
    fn from(req: UpdateSubscriptionRequest) -> Self {
        Self {
            expires_at: req.expires_at,
            loan_period: req.loan_period,
            fine_per_day: req.fine_per_day,
            active_loan_limit: req.active_loan_limit,
            usage_limit: req.usage_limit,
            amount: req.amount,
        }
    }
}

/// A subscription with its grandfathered terms.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionDto {
    /// Subscription UUID.
    pub id: uuid::Uuid,
    /// Subscriber.
    pub user_id: uuid::Uuid,
    /// Source plan.
    pub membership_id: uuid::Uuid,
    /// No new loans after this instant.
    pub expires_at: DateTime<Utc>,
    /// Loan period in days.
    pub loan_period: i32,
    /// Fine per overdue day.
    pub fine_per_day: i64,
    /// Maximum simultaneous active loans.
    pub active_loan_limit: i32,
    /// Lifetime loan cap.
    pub usage_limit: i32,
    /// Amount paid.
    pub amount: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionDto {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id.into(),
            user_id: s.user_id.into(),
            membership_id: s.membership_id.into(),
            expires_at: s.terms.expires_at,
            loan_period: s.terms.loan_period,
            fine_per_day: s.terms.fine_per_day,
            active_loan_limit: s.terms.active_loan_limit,
            usage_limit: s.terms.usage_limit,
            amount: s.terms.amount,
            created_at: s.created_at,
        }
    }
}
