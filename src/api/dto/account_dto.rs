//! Account, library and staff DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Library, Staff, StaffRole, User};
use crate::service::{NewLibrary, Registration};

/// Request body for `POST /auth/register`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Initial password.
    pub password: String,
}

impl From<RegisterRequest> for Registration {
    fn from(req: RegisterRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            password: req.password,
        }
    }
}

/// A user account.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserDto {
    /// User UUID.
    pub id: uuid::Uuid,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        Self {
            id: user.id.into(),
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

/// Request body for `POST /libraries`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateLibraryRequest {
    /// Display name.
    pub name: String,
    /// Postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

impl From<CreateLibraryRequest> for NewLibrary {
    fn from(req: CreateLibraryRequest) -> Self {
        Self {
            name: req.name,
            address: req.address,
            description: req.description,
        }
    }
}

/// A tenant library.
#[derive(Debug, Serialize, ToSchema)]
pub struct LibraryDto {
    /// Library UUID.
    pub id: uuid::Uuid,
    /// Display name.
    pub name: String,
    /// Postal address.
    pub address: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Library> for LibraryDto {
    fn from(library: Library) -> Self {
        Self {
            id: library.id.into(),
            name: library.name,
            address: library.address,
            description: library.description,
            created_at: library.created_at,
        }
    }
}

/// Request body for `POST /staffs`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateStaffRequest {
    /// Library to appoint to.
    pub library_id: uuid::Uuid,
    /// Account to appoint.
    pub user_id: uuid::Uuid,
    /// `ADMIN` or `STAFF`.
    #[schema(value_type = String, example = "STAFF")]
    pub role: StaffRole,
}

/// A staff position.
#[derive(Debug, Serialize, ToSchema)]
pub struct StaffDto {
    /// Staff UUID.
    pub id: uuid::Uuid,
    /// Appointed account.
    pub user_id: uuid::Uuid,
    /// Library.
    pub library_id: uuid::Uuid,
    /// `ADMIN` or `STAFF`.
    #[schema(value_type = String, example = "STAFF")]
    pub role: StaffRole,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Staff> for StaffDto {
    fn from(staff: Staff) -> Self {
        Self {
            id: staff.id.into(),
            user_id: staff.user_id.into(),
            library_id: staff.library_id.into(),
            role: staff.role,
            created_at: staff.created_at,
        }
    }
}
