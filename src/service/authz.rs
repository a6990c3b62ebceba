//! Library-scoped authorization.
//!
//! Global `SUPERADMIN`/`ADMIN` actors pass every check. A `USER` needs a
//! live staff row in the target library; front-desk actions accept either
//! staff role while management actions need the library `ADMIN` role.

use crate::domain::{Actor, LibraryId, Staff, StaffId, StaffRole};
use crate::error::AppError;
use crate::ports::Repository;

/// What the actor is trying to do inside a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Loans, returns, loss reports, imports, exports and job reads.
    FrontDesk,
    /// Memberships, subscriptions and staff management.
    ManageLibrary,
}

/// Checks `actor` against `library_id`.
///
/// Returns the actor's own staff row when one exists. Global admins may
/// have none.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] when the actor has no standing in
/// the library or its staff role is too weak.
pub async fn authorize(
    repo: &dyn Repository,
    actor: &Actor,
    library_id: LibraryId,
    permission: Permission,
) -> Result<Option<Staff>, AppError> {
    let staff = repo.find_staff(actor.user_id, library_id).await?;
    if actor.is_global_admin() {
        return Ok(staff);
    }
    let Some(staff) = staff else {
        return Err(AppError::Unauthorized(format!(
            "not a staff member of library {library_id}"
        )));
    };
    if permission == Permission::ManageLibrary && staff.role != StaffRole::Admin {
        return Err(AppError::Unauthorized(
            "library administrator role required".into(),
        ));
    }
    Ok(Some(staff))
}

/// Picks the staff id recorded on a loan action.
///
/// Front-desk staff always act as themselves. Library admins and global
/// admins may name another staff member and default to their own row.
///
/// # Errors
///
/// [`AppError::Unauthorized`] as for [`authorize`], or
/// [`AppError::Validation`] when a global admin without a staff row in the
/// library omits `requested`.
pub async fn resolve_staff_id(
    repo: &dyn Repository,
    actor: &Actor,
    library_id: LibraryId,
    requested: Option<StaffId>,
) -> Result<StaffId, AppError> {
    let own = authorize(repo, actor, library_id, Permission::FrontDesk).await?;
    match (own, requested) {
        (Some(staff), _) if !actor.is_global_admin() && staff.role == StaffRole::Staff => {
            Ok(staff.id)
        }
        (_, Some(requested)) => Ok(requested),
        (Some(staff), None) => Ok(staff.id),
        (None, None) => Err(AppError::Validation("staff_id is required".into())),
    }
}

/// Requires a global admin.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] for `USER` actors.
pub fn require_global_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.is_global_admin() {
        Ok(())
    } else {
        Err(AppError::Unauthorized("administrator role required".into()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{GlobalRole, UserId};
    use crate::persistence::InMemoryRepository;

    async fn staffed(role: StaffRole) -> (InMemoryRepository, Actor, LibraryId, Staff) {
        let repo = InMemoryRepository::new();
        let library_id = LibraryId::new();
        let staff = Staff {
            id: StaffId::new(),
            user_id: UserId::new(),
            library_id,
            role,
            created_at: Utc::now(),
            deleted_at: None,
        };
        assert!(repo.insert_staff(&staff).await.is_ok());
        let actor = Actor::new(staff.user_id, GlobalRole::User);
        (repo, actor, library_id, staff)
    }

    #[tokio::test]
    async fn front_desk_staff_cannot_manage() {
        let (repo, actor, library_id, _) = staffed(StaffRole::Staff).await;
        assert!(
            authorize(&repo, &actor, library_id, Permission::FrontDesk)
                .await
                .is_ok()
        );
        assert!(matches!(
            authorize(&repo, &actor, library_id, Permission::ManageLibrary).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn outsiders_are_rejected_and_admins_pass() {
        let (repo, _, library_id, _) = staffed(StaffRole::Admin).await;
        let outsider = Actor::new(UserId::new(), GlobalRole::User);
        assert!(matches!(
            authorize(&repo, &outsider, library_id, Permission::FrontDesk).await,
            Err(AppError::Unauthorized(_))
        ));
        let admin = Actor::new(UserId::new(), GlobalRole::Superadmin);
        let Ok(None) = authorize(&repo, &admin, library_id, Permission::ManageLibrary).await else {
            panic!("global admin passes without a staff row");
        };
    }

    #[tokio::test]
    async fn staff_role_overrides_requested_staff_id() {
        let (repo, actor, library_id, staff) = staffed(StaffRole::Staff).await;
        let Ok(id) = resolve_staff_id(&repo, &actor, library_id, Some(StaffId::new())).await else {
            panic!("staff should resolve");
        };
        assert_eq!(id, staff.id);
    }

    #[tokio::test]
    async fn library_admin_may_name_another_staff() {
        let (repo, actor, library_id, staff) = staffed(StaffRole::Admin).await;
        let other = StaffId::new();
        let Ok(id) = resolve_staff_id(&repo, &actor, library_id, Some(other)).await else {
            panic!("admin should resolve");
        };
        assert_eq!(id, other);
        let Ok(id) = resolve_staff_id(&repo, &actor, library_id, None).await else {
            panic!("admin should default to own row");
        };
        assert_eq!(id, staff.id);
    }
}
