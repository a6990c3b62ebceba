//! Membership plans and grandfathered subscriptions.
//!
//! A [`Subscription`] copies the loan-relevant parameters of its
//! [`Membership`] into [`SubscriptionTerms`] at purchase time. Later edits
//! to the plan never reach existing subscriptions; only an explicit
//! [`SubscriptionPatch`] can change the snapshot.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{LibraryId, MembershipId, SubscriptionId, UserId};
use crate::error::{AppError, Invariant};

/// A per-library loan plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Membership id.
    pub id: MembershipId,
    /// Owning library.
    pub library_id: LibraryId,
    /// Display name.
    pub name: String,
    /// Subscription length in days.
    pub duration: i32,
    /// Maximum simultaneous active loans.
    pub active_loan_limit: i32,
    /// Default loan period in days.
    pub loan_period: i32,
    /// Fine per overdue day, in minor currency units.
    pub fine_per_day: i64,
    /// Purchase price, in minor currency units.
    pub price: i64,
    /// Maximum number of loans over the subscription lifetime (0 = unlimited).
    pub usage_limit: i32,
    /// Free-form description.
    pub description: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Plan parameters supplied when creating a membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPlan {
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
    /// Lifetime loan cap (0 = unlimited).
    pub usage_limit: i32,
    /// Free-form description.
    pub description: Option<String>,
}

/// Partial update of a membership plan. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPatch {
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

/// Upper bound for plan durations and loan periods, in days.
pub const MAX_TERM_DAYS: i32 = 36_500;

fn check_plan_numbers(
    duration: i32,
    active_loan_limit: i32,
    loan_period: i32,
    fine_per_day: i64,
    price: i64,
    usage_limit: i32,
) -> Result<(), AppError> {
    if duration <= 0 || duration > MAX_TERM_DAYS {
        return Err(AppError::Validation(format!(
            "duration must be between 1 and {MAX_TERM_DAYS} days"
        )));
    }
    if active_loan_limit <= 0 {
        return Err(AppError::Validation(
            "active_loan_limit must be positive".into(),
        ));
    }
    if loan_period <= 0 || loan_period > MAX_TERM_DAYS {
        return Err(AppError::Validation(format!(
            "loan_period must be between 1 and {MAX_TERM_DAYS} days"
        )));
    }
    if fine_per_day < 0 || price < 0 || usage_limit < 0 {
        return Err(AppError::Validation(
            "fine_per_day, price and usage_limit must not be negative".into(),
        ));
    }
    Ok(())
}

impl Membership {
    /// Builds a new plan for `library_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for an empty name or out-of-range
    /// numbers.
    pub fn new(
        library_id: LibraryId,
        plan: MembershipPlan,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if plan.name.trim().is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        check_plan_numbers(
            plan.duration,
            plan.active_loan_limit,
            plan.loan_period,
            plan.fine_per_day,
            plan.price,
            plan.usage_limit,
        )?;
        Ok(Self {
            id: MembershipId::new(),
            library_id,
            name: plan.name.trim().to_string(),
            duration: plan.duration,
            active_loan_limit: plan.active_loan_limit,
            loan_period: plan.loan_period,
            fine_per_day: plan.fine_per_day,
            price: plan.price,
            usage_limit: plan.usage_limit,
            description: plan.description,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// Applies a patch to the plan. Existing subscriptions are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the patched plan is invalid.
    pub fn apply(&mut self, patch: MembershipPatch, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
        }
        next.duration = patch.duration.unwrap_or(next.duration);
        next.active_loan_limit = patch.active_loan_limit.unwrap_or(next.active_loan_limit);
        next.loan_period = patch.loan_period.unwrap_or(next.loan_period);
        next.fine_per_day = patch.fine_per_day.unwrap_or(next.fine_per_day);
        next.price = patch.price.unwrap_or(next.price);
        next.usage_limit = patch.usage_limit.unwrap_or(next.usage_limit);
        if patch.description.is_some() {
            next.description = patch.description;
        }
        if next.name.is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        check_plan_numbers(
            next.duration,
            next.active_loan_limit,
            next.loan_period,
            next.fine_per_day,
            next.price,
            next.usage_limit,
        )?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }
}

/// The membership parameters frozen into a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTerms {
    /// Instant after which no new loans are admitted.
    pub expires_at: DateTime<Utc>,
    /// Loan period in days.
    pub loan_period: i32,
    /// Fine per overdue day.
    pub fine_per_day: i64,
    /// Maximum simultaneous active loans.
    pub active_loan_limit: i32,
    /// Lifetime loan cap (0 = unlimited).
    pub usage_limit: i32,
    /// Amount paid.
    pub amount: i64,
}

impl SubscriptionTerms {
    /// Snapshots `membership` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the expiry falls outside the
    /// representable time range.
    pub fn snapshot(membership: &Membership, now: DateTime<Utc>) -> Result<Self, AppError> {
        let expires_at = now
            .checked_add_signed(Duration::days(i64::from(membership.duration)))
            .ok_or_else(|| AppError::Validation("membership duration out of range".into()))?;
        Ok(Self {
            expires_at,
            loan_period: membership.loan_period,
            fine_per_day: membership.fine_per_day,
            active_loan_limit: membership.active_loan_limit,
            usage_limit: membership.usage_limit,
            amount: membership.price,
        })
    }
}

/// A user's purchase of a membership, with grandfathered terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription id.
    pub id: SubscriptionId,
    /// Subscriber.
    pub user_id: UserId,
    /// Source plan.
    pub membership_id: MembershipId,
    /// Snapshotted terms.
    pub terms: SubscriptionTerms,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Explicit admin update of a subscription's snapshot.
///
/// `None` preserves the stored value, including `expires_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
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

impl Subscription {
    /// Purchases `membership` for `user_id` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Invariant::MembershipDeleted`] if the plan is soft-deleted,
    /// or [`AppError::Validation`] if its duration overflows the expiry.
    pub fn purchase(
        user_id: UserId,
        membership: &Membership,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if membership.deleted_at.is_some() {
            return Err(Invariant::MembershipDeleted.into());
        }
        Ok(Self {
            id: SubscriptionId::new(),
            user_id,
            membership_id: membership.id,
            terms: SubscriptionTerms::snapshot(membership, now)?,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// Returns `true` while the subscription admits new loans.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.terms.expires_at > now
    }

    /// Applies an explicit admin patch field by field.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for non-positive or oversized periods,
    /// non-positive limits, or negative money amounts.
    pub fn apply(&mut self, patch: SubscriptionPatch, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut terms = self.terms.clone();
        if let Some(expires_at) = patch.expires_at {
            terms.expires_at = expires_at;
        }
        terms.loan_period = patch.loan_period.unwrap_or(terms.loan_period);
        terms.fine_per_day = patch.fine_per_day.unwrap_or(terms.fine_per_day);
        terms.active_loan_limit = patch.active_loan_limit.unwrap_or(terms.active_loan_limit);
        terms.usage_limit = patch.usage_limit.unwrap_or(terms.usage_limit);
        terms.amount = patch.amount.unwrap_or(terms.amount);

        if terms.loan_period <= 0 || terms.active_loan_limit <= 0 {
            return Err(AppError::Validation(
                "loan_period and active_loan_limit must be positive".into(),
            ));
        }
        if terms.loan_period > MAX_TERM_DAYS {
            return Err(AppError::Validation(format!(
                "loan_period must not exceed {MAX_TERM_DAYS} days"
            )));
        }
        if terms.fine_per_day < 0 || terms.amount < 0 || terms.usage_limit < 0 {
            return Err(AppError::Validation(
                "fine_per_day, amount and usage_limit must not be negative".into(),
            ));
        }
        self.terms = terms;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        let Some(t) = Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single() else {
            panic!("valid date");
        };
        t
    }

    fn plan() -> MembershipPlan {
        MembershipPlan {
            name: "Gold".into(),
            duration: 30,
            active_loan_limit: 3,
            loan_period: 14,
            fine_per_day: 100,
            price: 5_000,
            usage_limit: 0,
            description: None,
        }
    }

    #[test]
    fn purchase_snapshots_plan_terms() {
        let Ok(m) = Membership::new(LibraryId::new(), plan(), at(2024, 12, 1)) else {
            panic!("valid plan");
        };
        let Ok(s) = Subscription::purchase(UserId::new(), &m, at(2025, 1, 1)) else {
            panic!("purchase should succeed");
        };
        assert_eq!(s.terms.expires_at, at(2025, 1, 31));
        assert_eq!(s.terms.loan_period, 14);
        assert_eq!(s.terms.fine_per_day, 100);
        assert_eq!(s.terms.active_loan_limit, 3);
        assert_eq!(s.terms.amount, 5_000);
    }

    #[test]
    fn membership_edit_does_not_touch_snapshot() {
        let Ok(mut m) = Membership::new(LibraryId::new(), plan(), at(2024, 12, 1)) else {
            panic!("valid plan");
        };
        let Ok(s) = Subscription::purchase(UserId::new(), &m, at(2025, 1, 1)) else {
            panic!("purchase should succeed");
        };
        let before = s.terms.clone();
        let patch = MembershipPatch {
            fine_per_day: Some(500),
            ..MembershipPatch::default()
        };
        assert!(m.apply(patch, at(2025, 1, 2)).is_ok());
        assert_eq!(m.fine_per_day, 500);
        assert_eq!(s.terms, before);
    }

    #[test]
    fn purchase_of_deleted_membership_fails() {
        let Ok(mut m) = Membership::new(LibraryId::new(), plan(), at(2024, 12, 1)) else {
            panic!("valid plan");
        };
        m.deleted_at = Some(at(2024, 12, 2));
        let Err(err) = Subscription::purchase(UserId::new(), &m, at(2025, 1, 1)) else {
            panic!("deleted membership must not be purchasable");
        };
        assert_eq!(err.invariant(), Some(&Invariant::MembershipDeleted));
    }

    #[test]
    fn patch_without_expiry_preserves_it() {
        let Ok(m) = Membership::new(LibraryId::new(), plan(), at(2024, 12, 1)) else {
            panic!("valid plan");
        };
        let Ok(mut s) = Subscription::purchase(UserId::new(), &m, at(2025, 1, 1)) else {
            panic!("purchase should succeed");
        };
        let expires = s.terms.expires_at;
        let patch = SubscriptionPatch {
            fine_per_day: Some(250),
            ..SubscriptionPatch::default()
        };
        assert!(s.apply(patch, at(2025, 1, 5)).is_ok());
        assert_eq!(s.terms.expires_at, expires);
        assert_eq!(s.terms.fine_per_day, 250);
        assert_eq!(s.terms.loan_period, 14);

        let patch = SubscriptionPatch {
            expires_at: Some(at(2025, 6, 1)),
            ..SubscriptionPatch::default()
        };
        assert!(s.apply(patch, at(2025, 1, 6)).is_ok());
        assert_eq!(s.terms.expires_at, at(2025, 6, 1));
    }

    #[test]
    fn invalid_plan_numbers_are_rejected() {
        let mut bad = plan();
        bad.loan_period = 0;
        assert!(Membership::new(LibraryId::new(), bad, Utc::now()).is_err());
    }

    #[test]
    fn oversized_terms_are_rejected() {
        let mut bad = plan();
        bad.duration = 200_000_000;
        let Err(AppError::Validation(_)) = Membership::new(LibraryId::new(), bad, Utc::now()) else {
            panic!("huge duration must be rejected");
        };

        let Ok(m) = Membership::new(LibraryId::new(), plan(), at(2024, 12, 1)) else {
            panic!("valid plan");
        };
        let Ok(mut s) = Subscription::purchase(UserId::new(), &m, at(2025, 1, 1)) else {
            panic!("purchase should succeed");
        };
        let patch = SubscriptionPatch {
            loan_period: Some(200_000_000),
            ..SubscriptionPatch::default()
        };
        let Err(AppError::Validation(_)) = s.apply(patch, at(2025, 1, 2)) else {
            panic!("huge loan period must be rejected");
        };
        assert_eq!(s.terms.loan_period, 14);
    }

    #[test]
    fn purchase_reports_expiry_overflow() {
        let Ok(mut m) = Membership::new(LibraryId::new(), plan(), at(2024, 12, 1)) else {
            panic!("valid plan");
        };
        // Stored rows can predate the bound.
        m.duration = i32::MAX;
        let Err(AppError::Validation(_)) = Subscription::purchase(UserId::new(), &m, at(2025, 1, 1))
        else {
            panic!("overflowing expiry must be an error");
        };
    }

    #[test]
    fn validity_is_strictly_before_expiry() {
        let Ok(m) = Membership::new(LibraryId::new(), plan(), at(2024, 12, 1)) else {
            panic!("valid plan");
        };
        let Ok(s) = Subscription::purchase(UserId::new(), &m, at(2025, 1, 1)) else {
            panic!("purchase should succeed");
        };
        assert!(s.is_valid_at(at(2025, 1, 30)));
        assert!(!s.is_valid_at(at(2025, 1, 31)));
    }
}
