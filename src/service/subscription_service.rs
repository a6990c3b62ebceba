//! Membership plans and grandfathered subscriptions.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    Actor, LibraryId, Membership, MembershipId, MembershipPatch, MembershipPlan, Subscription,
    SubscriptionId, SubscriptionPatch, UserId,
};
use crate::error::AppError;
use crate::ports::Repository;
use crate::service::authz::{self, Permission};

/// Manages plans and the subscriptions purchased from them.
///
/// Plan edits only ever write the membership row. Subscription terms
/// change solely through [`SubscriptionService::update_subscription`].
#[derive(Debug, Clone)]
pub struct SubscriptionService {
    repo: Arc<dyn Repository>,
}

impl SubscriptionService {
    /// Creates a new `SubscriptionService`.
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Creates a plan in `library_id`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless the actor manages the library, `Validation`
    /// for an invalid plan, `NotFound` for an unknown library.
    pub async fn create_membership(
        &self,
        actor: &Actor,
        library_id: LibraryId,
        plan: MembershipPlan,
    ) -> Result<Membership, AppError> {
        authz::authorize(self.repo.as_ref(), actor, library_id, Permission::ManageLibrary).await?;
        self.repo.get_library(library_id).await?;
        let membership = Membership::new(library_id, plan, Utc::now())?;
        self.repo.insert_membership(&membership).await?;
        tracing::info!(membership_id = %membership.id, %library_id, "membership created");
        Ok(membership)
    }

    /// Edits a plan. Existing subscriptions keep their terms.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or deleted plans, `Unauthorized`,
    /// `Validation`.
    pub async fn update_membership(
        &self,
        actor: &Actor,
        id: MembershipId,
        patch: MembershipPatch,
    ) -> Result<Membership, AppError> {
        let mut membership = self.managed_membership(actor, id).await?;
        membership.apply(patch, Utc::now())?;
        self.repo.update_membership(&membership).await?;
        tracing::info!(membership_id = %id, "membership updated");
        Ok(membership)
    }

    /// Soft-deletes a plan. It can no longer be purchased.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or already deleted plans, `Unauthorized`.
    pub async fn delete_membership(&self, actor: &Actor, id: MembershipId) -> Result<(), AppError> {
        let mut membership = self.managed_membership(actor, id).await?;
        let now = Utc::now();
        membership.deleted_at = Some(now);
        membership.updated_at = now;
        self.repo.update_membership(&membership).await?;
        tracing::info!(membership_id = %id, "membership deleted");
        Ok(())
    }

    /// Loads a live plan.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or deleted plans.
    pub async fn get_membership(&self, id: MembershipId) -> Result<Membership, AppError> {
        let membership = self.repo.get_membership(id).await?;
        if membership.deleted_at.is_some() {
            return Err(AppError::not_found("membership", id));
        }
        Ok(membership)
    }

    /// Lists the live plans of a library.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn list_memberships(&self, library_id: LibraryId) -> Result<Vec<Membership>, AppError> {
        self.repo.list_memberships(library_id).await
    }

    /// Sells `membership_id` to `user_id`, snapshotting the plan's terms.
    ///
    /// # Errors
    ///
    /// `MembershipDeleted` for a soft-deleted plan, `Unauthorized` unless
    /// the actor manages the plan's library, `NotFound`.
    pub async fn purchase(
        &self,
        actor: &Actor,
        user_id: UserId,
        membership_id: MembershipId,
    ) -> Result<Subscription, AppError> {
        let membership = self.repo.get_membership(membership_id).await?;
        authz::authorize(
            self.repo.as_ref(),
            actor,
            membership.library_id,
            Permission::ManageLibrary,
        )
        .await?;
        self.repo.get_user(user_id).await?;
        let subscription = Subscription::purchase(user_id, &membership, Utc::now())?;
        self.repo.insert_subscription(&subscription).await?;
        tracing::info!(
            subscription_id = %subscription.id,
            %membership_id,
            %user_id,
            "subscription purchased"
        );
        Ok(subscription)
    }

    /// Overwrites snapshot fields explicitly. Absent fields are preserved.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, `Validation`.
    pub async fn update_subscription(
        &self,
        actor: &Actor,
        id: SubscriptionId,
        patch: SubscriptionPatch,
    ) -> Result<Subscription, AppError> {
        let mut subscription = self.repo.get_subscription(id).await?;
        let membership = self.repo.get_membership(subscription.membership_id).await?;
        authz::authorize(
            self.repo.as_ref(),
            actor,
            membership.library_id,
            Permission::ManageLibrary,
        )
        .await?;
        subscription.apply(patch, Utc::now())?;
        self.repo.update_subscription(&subscription).await?;
        tracing::info!(subscription_id = %id, "subscription updated");
        Ok(subscription)
    }

    /// Loads a subscription visible to the actor.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Unauthorized` for someone else's subscription
    /// outside the actor's libraries.
    pub async fn get_subscription(
        &self,
        actor: &Actor,
        id: SubscriptionId,
    ) -> Result<Subscription, AppError> {
        let subscription = self.repo.get_subscription(id).await?;
        if subscription.user_id != actor.user_id {
            let membership = self.repo.get_membership(subscription.membership_id).await?;
            authz::authorize(
                self.repo.as_ref(),
                actor,
                membership.library_id,
                Permission::FrontDesk,
            )
            .await?;
        }
        Ok(subscription)
    }

    async fn managed_membership(
        &self,
        actor: &Actor,
        id: MembershipId,
    ) -> Result<Membership, AppError> {
        let membership = self.get_membership(id).await?;
        authz::authorize(
            self.repo.as_ref(),
            actor,
            membership.library_id,
            Permission::ManageLibrary,
        )
        .await?;
        Ok(membership)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{AuthUser, GlobalRole, Library, User};
    use crate::error::Invariant;
    use crate::persistence::InMemoryRepository;

    fn plan() -> MembershipPlan {
        MembershipPlan {
            name: "Gold".into(),
            duration: 30,
            active_loan_limit: 2,
            loan_period: 14,
            fine_per_day: 100,
            price: 5_000,
            usage_limit: 0,
            description: None,
        }
    }

    async fn setup() -> (SubscriptionService, Actor, LibraryId, UserId) {
        let repo = Arc::new(InMemoryRepository::new());
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
        let user = User {
            id: UserId::new(),
            name: "Reader".into(),
            email: "reader@example.test".into(),
            created_at: now,
            deleted_at: None,
        };
        let auth = AuthUser {
            user_id: user.id,
            provider_uid: "uid-reader".into(),
            role: GlobalRole::User,
        };
        assert!(repo.insert_user(&user, &auth).await.is_ok());
        let admin = Actor::new(UserId::new(), GlobalRole::Admin);
        (SubscriptionService::new(repo), admin, library.id, user.id)
    }

    #[tokio::test]
    async fn plan_edit_leaves_purchased_terms_alone() {
        let (service, admin, library_id, user_id) = setup().await;
        let Ok(m) = service.create_membership(&admin, library_id, plan()).await else {
            panic!("create should succeed");
        };
        let Ok(s) = service.purchase(&admin, user_id, m.id).await else {
            panic!("purchase should succeed");
        };
        let patch = MembershipPatch {
            fine_per_day: Some(900),
            loan_period: Some(3),
            ..MembershipPatch::default()
        };
        assert!(service.update_membership(&admin, m.id, patch).await.is_ok());
        let Ok(stored) = service.get_subscription(&admin, s.id).await else {
            panic!("subscription should load");
        };
        assert_eq!(stored.terms, s.terms);
    }

    #[tokio::test]
    async fn deleted_plan_cannot_be_purchased() {
        let (service, admin, library_id, user_id) = setup().await;
        let Ok(m) = service.create_membership(&admin, library_id, plan()).await else {
            panic!("create should succeed");
        };
        assert!(service.delete_membership(&admin, m.id).await.is_ok());
        let Err(err) = service.purchase(&admin, user_id, m.id).await else {
            panic!("purchase of a deleted plan must fail");
        };
        assert_eq!(err.invariant(), Some(&Invariant::MembershipDeleted));
        assert!(matches!(
            service.get_membership(m.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn plain_users_cannot_create_plans() {
        let (service, _, library_id, user_id) = setup().await;
        let user = Actor::new(user_id, GlobalRole::User);
        assert!(matches!(
            service.create_membership(&user, library_id, plan()).await,
            Err(AppError::Unauthorized(_))
        ));
    }
}
