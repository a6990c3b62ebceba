//! Type-safe entity identifiers.
//!
//! Every entity is keyed by a UUID v4 wrapped in its own newtype so that,
//! for example, a [`BookId`] can never be passed where a [`StaffId`] is
//! expected. All identifiers serialize transparently as UUID strings.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wraps an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<uuid::Uuid>().map(Self)
            }
        }
    };
}

entity_id!(
    /// Identifier of a library (tenant).
    LibraryId
);
entity_id!(
    /// Identifier of a user account.
    UserId
);
entity_id!(
    /// Identifier of a staff position.
    StaffId
);
entity_id!(
    /// Identifier of a book.
    BookId
);
entity_id!(
    /// Identifier of a membership plan.
    MembershipId
);
entity_id!(
    /// Identifier of a subscription.
    SubscriptionId
);
entity_id!(
    /// Identifier of a borrowing.
    BorrowingId
);
entity_id!(
    /// Identifier of a review.
    ReviewId
);
entity_id!(
    /// Identifier of a notification.
    NotificationId
);
entity_id!(
    /// Identifier of a registered push token.
    PushTokenId
);
entity_id!(
    /// Identifier of a background job.
    JobId
);
entity_id!(
    /// Identifier of a stored asset.
    AssetId
);
entity_id!(
    /// Identifier of a curated collection.
    CollectionId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(BookId::new(), BookId::new());
    }

    #[test]
    fn display_is_uuid_format() {
        let s = JobId::new().to_string();
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn parses_from_str() {
        let uuid = uuid::Uuid::new_v4();
        let Ok(id) = uuid.to_string().parse::<BorrowingId>() else {
            panic!("valid uuid should parse");
        };
        assert_eq!(*id.as_uuid(), uuid);
        assert!("not-a-uuid".parse::<BorrowingId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let uuid = uuid::Uuid::new_v4();
        let id = LibraryId::from_uuid(uuid);
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, format!("\"{uuid}\""));
    }
}
