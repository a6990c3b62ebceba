//! Request actor and role types.
//!
//! Every core operation receives an explicit [`Actor`] instead of reading
//! identity from ambient request context.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::UserId;

/// Platform-wide role attached to an authenticated account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalRole {
    /// Unrestricted platform operator.
    Superadmin,
    /// Unrestricted platform administrator.
    Admin,
    /// Regular account; library authority comes from staff rows.
    User,
}

impl GlobalRole {
    /// Returns `true` for roles that bypass per-library checks.
    #[must_use]
    pub const fn is_global_admin(self) -> bool {
        matches!(self, Self::Superadmin | Self::Admin)
    }

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Superadmin => "SUPERADMIN",
            Self::Admin => "ADMIN",
            Self::User => "USER",
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlobalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUPERADMIN" => Ok(Self::Superadmin),
            "ADMIN" => Ok(Self::Admin),
            "USER" => Ok(Self::User),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Role of a staff member within one library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    /// Library administrator: manages plans and subscriptions.
    Admin,
    /// Front-desk staff: loans, returns, imports, exports.
    Staff,
}

impl StaffRole {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Staff => "STAFF",
        }
    }
}

impl FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "STAFF" => Ok(Self::Staff),
            other => Err(format!("unknown staff role: {other}")),
        }
    }
}

/// The authenticated caller of a core operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    /// Caller's user id.
    pub user_id: UserId,
    /// Caller's platform role.
    pub role: GlobalRole,
}

impl Actor {
    /// Creates an actor.
    #[must_use]
    pub const fn new(user_id: UserId, role: GlobalRole) -> Self {
        Self { user_id, role }
    }

    /// Returns `true` when the actor bypasses library scoping.
    #[must_use]
    pub const fn is_global_admin(&self) -> bool {
        self.role.is_global_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [GlobalRole::Superadmin, GlobalRole::Admin, GlobalRole::User] {
            assert_eq!(role.as_str().parse::<GlobalRole>(), Ok(role));
        }
        assert!("ROOT".parse::<GlobalRole>().is_err());
    }

    #[test]
    fn only_admins_are_global() {
        assert!(GlobalRole::Superadmin.is_global_admin());
        assert!(GlobalRole::Admin.is_global_admin());
        assert!(!GlobalRole::User.is_global_admin());
    }
}
