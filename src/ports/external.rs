//! Side-effect boundaries: identity, file storage, mail and push.
//!
//! Implementations must be thread-safe; one instance is shared per process.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{LibraryId, PushToken, UserId};
use crate::error::AppError;

/// A verified identity-provider token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    /// Provider subject id.
    pub uid: String,
    /// Custom claims attached to the subject.
    pub claims: serde_json::Value,
}

/// External identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Creates a credential and returns the provider subject id.
    async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<String, AppError>;

    /// Verifies a bearer token.
    async fn verify_id_token(&self, token: &str) -> Result<VerifiedToken, AppError>;

    /// Replaces the custom claims of a subject.
    async fn set_custom_claims(&self, uid: &str, claims: serde_json::Value)
    -> Result<(), AppError>;
}

/// Object storage.
#[async_trait]
pub trait FileStorage: Send + Sync + fmt::Debug {
    /// Writes `bytes` at `path`, replacing any existing object.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), AppError>;

    /// Writes an upload under the temp root at `key`.
    async fn put_temp(&self, key: &str, bytes: &[u8], content_type: &str)
    -> Result<(), AppError>;

    /// Reads the object at `path`.
    async fn read(&self, path: &str) -> Result<Vec<u8>, AppError>;

    /// Produces a time-limited download URL for `path`.
    async fn presign_get(&self, path: &str, ttl: Duration) -> Result<String, AppError>;

    /// Moves the temp upload at `key` into the public root and returns its
    /// public URL.
    async fn promote(&self, key: &str) -> Result<String, AppError>;
}

/// Outbound email.
#[async_trait]
pub trait Mailer: Send + Sync + fmt::Debug {
    /// Sends a plain-text email.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Outbound push notifications.
#[async_trait]
pub trait PushDispatcher: Send + Sync + fmt::Debug {
    /// Delivers one message to one device token.
    async fn send(&self, token: &PushToken, title: &str, body: &str) -> Result<(), AppError>;
}

/// `{library_id}/imports/{filename}`.
#[must_use]
pub fn import_path(library_id: LibraryId, filename: &str) -> String {
    format!("{library_id}/imports/{}", sanitize_name(filename))
}

/// `{library_id}/exports/borrowings-export-{yyyymmdd-hhmmss}.csv`.
#[must_use]
pub fn export_path(library_id: LibraryId, now: DateTime<Utc>) -> String {
    format!(
        "{library_id}/exports/borrowings-export-{}.csv",
        now.format("%Y%m%d-%H%M%S")
    )
}

/// `{user_prefix8}-{epoch_seconds}/{name}`, relative to the temp root.
#[must_use]
pub fn temp_upload_path(user_id: UserId, now: DateTime<Utc>, name: &str) -> String {
    let user = user_id.to_string();
    let prefix: String = user.chars().take(8).collect();
    format!("{prefix}-{}/{}", now.timestamp(), sanitize_name(name))
}

/// Strips directory components so callers cannot escape their prefix.
fn sanitize_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn export_path_uses_compact_timestamp() {
        let library = LibraryId::new();
        let Some(now) = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).single() else {
            panic!("valid date");
        };
        assert_eq!(
            export_path(library, now),
            format!("{library}/exports/borrowings-export-20250304-050607.csv")
        );
    }

    #[test]
    fn import_path_strips_directories() {
        let library = LibraryId::new();
        assert_eq!(
            import_path(library, "../../etc/books.csv"),
            format!("{library}/imports/books.csv")
        );
    }

    #[test]
    fn temp_path_uses_user_prefix_and_epoch() {
        let user = UserId::new();
        let Some(now) = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single() else {
            panic!("valid date");
        };
        let path = temp_upload_path(user, now, "cover.png");
        let prefix: String = user.to_string().chars().take(8).collect();
        assert_eq!(path, format!("{prefix}-1735689600/cover.png"));
    }
}
