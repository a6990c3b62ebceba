//! Accounts, actor resolution, libraries and staff positions.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    Actor, AuthUser, GlobalRole, Library, LibraryId, Staff, StaffId, StaffRole, User, UserId,
};
use crate::error::AppError;
use crate::ports::{IdentityProvider, Mailer, Repository};
use crate::service::authz::{self, Permission};

/// Input for [`AccountService::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Initial password, handed to the identity provider only.
    pub password: String,
}

/// Input for [`AccountService::create_library`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLibrary {
    /// Display name.
    pub name: String,
    /// Postal address.
    pub address: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
}

/// Identity and tenancy operations.
#[derive(Debug, Clone)]
pub struct AccountService {
    repo: Arc<dyn Repository>,
    identity: Arc<dyn IdentityProvider>,
    mailer: Arc<dyn Mailer>,
}

impl AccountService {
    /// Creates a new `AccountService`.
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        identity: Arc<dyn IdentityProvider>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            repo,
            identity,
            mailer,
        }
    }

    /// Creates a credential with the identity provider and a linked `USER`
    /// account, then sends a welcome mail on a best-effort basis.
    ///
    /// # Errors
    ///
    /// `Validation` for missing fields or a taken email, or the identity
    /// provider's failure.
    pub async fn register(&self, input: Registration) -> Result<User, AppError> {
        let name = input.name.trim();
        let email = input.email.trim().to_lowercase();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        if !email.contains('@') {
            return Err(AppError::Validation("email is invalid".into()));
        }

        let uid = self
            .identity
            .create_user(&email, &input.password, name)
            .await?;
        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            email,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let auth = AuthUser {
            user_id: user.id,
            provider_uid: uid.clone(),
            role: GlobalRole::User,
        };
        self.repo.insert_user(&user, &auth).await?;
        self.identity
            .set_custom_claims(
                &uid,
                serde_json::json!({ "user_id": user.id, "role": auth.role }),
            )
            .await?;
        tracing::info!(user_id = %user.id, "user registered");

        let mailer = Arc::clone(&self.mailer);
        let (to, who) = (user.email.clone(), user.name.clone());
        tokio::spawn(async move {
            let body = format!("Hello {who}, your library account is ready.");
            if let Err(e) = mailer.send(&to, "Welcome", &body).await {
                tracing::warn!(error = %e, "welcome mail failed");
            }
        });
        Ok(user)
    }

    /// Resolves a bearer token to an actor.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for invalid tokens or subjects without an account.
    pub async fn actor_from_token(&self, token: &str) -> Result<Actor, AppError> {
        let verified = self.identity.verify_id_token(token).await?;
        let auth = self
            .repo
            .find_auth_user_by_uid(&verified.uid)
            .await?
            .ok_or_else(|| AppError::Unauthorized("no account for this identity".into()))?;
        Ok(Actor::new(auth.user_id, auth.role))
    }

    /// Resolves a raw user id to an actor. Local development only.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for unknown users.
    pub async fn actor_from_user_id(&self, user_id: UserId) -> Result<Actor, AppError> {
        let auth = self
            .repo
            .find_auth_user(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(format!("unknown user {user_id}")))?;
        Ok(Actor::new(auth.user_id, auth.role))
    }

    /// Loads the actor's own account.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub async fn me(&self, actor: &Actor) -> Result<User, AppError> {
        self.repo.get_user(actor.user_id).await
    }

    /// Creates a tenant. Global admins only.
    ///
    /// # Errors
    ///
    /// `Unauthorized` or `Validation`.
    pub async fn create_library(
        &self,
        actor: &Actor,
        input: NewLibrary,
    ) -> Result<Library, AppError> {
        authz::require_global_admin(actor)?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        let library = Library {
            id: LibraryId::new(),
            name: name.to_string(),
            address: input.address,
            description: input.description,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.repo.insert_library(&library).await?;
        tracing::info!(library_id = %library.id, "library created");
        Ok(library)
    }

    /// Loads a tenant.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub async fn get_library(&self, id: LibraryId) -> Result<Library, AppError> {
        self.repo.get_library(id).await
    }

    /// Appoints `user_id` to `library_id`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless the actor manages the library, `NotFound` for
    /// unknown users or libraries, `Validation` if already appointed.
    pub async fn add_staff(
        &self,
        actor: &Actor,
        library_id: LibraryId,
        user_id: UserId,
        role: StaffRole,
    ) -> Result<Staff, AppError> {
        authz::authorize(self.repo.as_ref(), actor, library_id, Permission::ManageLibrary).await?;
        self.repo.get_library(library_id).await?;
        self.repo.get_user(user_id).await?;
        let staff = Staff {
            id: StaffId::new(),
            user_id,
            library_id,
            role,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.repo.insert_staff(&staff).await?;
        tracing::info!(staff_id = %staff.id, %library_id, %user_id, role = role.as_str(), "staff added");
        Ok(staff)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::adapters::{LocalIdentityProvider, LogMailer};
    use crate::persistence::InMemoryRepository;

    fn service() -> AccountService {
        AccountService::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(LocalIdentityProvider::new()),
            Arc::new(LogMailer),
        )
    }

    fn registration(email: &str) -> Registration {
        Registration {
            name: "Grace".into(),
            email: email.into(),
            password: "hopper1".into(),
        }
    }

    #[tokio::test]
    async fn registered_user_resolves_from_user_id() {
        let service = service();
        let Ok(user) = service.register(registration("Grace@Example.test")).await else {
            panic!("registration should succeed");
        };
        assert_eq!(user.email, "grace@example.test");
        let Ok(actor) = service.actor_from_user_id(user.id).await else {
            panic!("actor should resolve");
        };
        assert_eq!(actor.role, GlobalRole::User);
        assert!(matches!(
            service.actor_from_token("garbage").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn only_global_admins_create_libraries() {
        let service = service();
        let user = Actor::new(UserId::new(), GlobalRole::User);
        let input = NewLibrary {
            name: "North".into(),
            address: None,
            description: None,
        };
        assert!(matches!(
            service.create_library(&user, input.clone()).await,
            Err(AppError::Unauthorized(_))
        ));
        let admin = Actor::new(UserId::new(), GlobalRole::Superadmin);
        assert!(service.create_library(&admin, input).await.is_ok());
    }
}
