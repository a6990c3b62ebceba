//! Tenants, accounts and staff positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GlobalRole, LibraryId, StaffId, StaffRole, UserId};

/// A tenant library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    /// Library id.
    pub id: LibraryId,
    /// Display name.
    pub name: String,
    /// Postal address.
    pub address: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Credential mapping between a [`User`] and the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Linked user.
    pub user_id: UserId,
    /// Identity provider's subject id.
    pub provider_uid: String,
    /// Platform role.
    pub role: GlobalRole,
}

/// A staff position: `(user, library, role)`, unique on `(user, library)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    /// Staff id.
    pub id: StaffId,
    /// Account holding the position.
    pub user_id: UserId,
    /// Library the position belongs to.
    pub library_id: LibraryId,
    /// Authority within the library.
    pub role: StaffRole,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Staff {
    /// Returns `true` if this position is active in `library_id`.
    #[must_use]
    pub fn serves(&self, library_id: LibraryId) -> bool {
        self.deleted_at.is_none() && self.library_id == library_id
    }
}
