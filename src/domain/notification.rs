//! User-facing notifications and push registration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NotificationId, PushTokenId, UserId};

/// What a notification points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// A borrowing was returned or reported lost.
    Borrowing,
    /// An active borrowing passed its due date.
    BorrowingOverdue,
    /// A borrowings export job finished.
    ExportBorrowing,
    /// A book import job finished.
    ImportBooks,
}

impl ReferenceType {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Borrowing => "BORROWING",
            Self::BorrowingOverdue => "BORROWING_OVERDUE",
            Self::ExportBorrowing => "EXPORT_BORROWING",
            Self::ImportBooks => "IMPORT_BOOKS",
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BORROWING" => Ok(Self::Borrowing),
            "BORROWING_OVERDUE" => Ok(Self::BorrowingOverdue),
            "EXPORT_BORROWING" => Ok(Self::ExportBorrowing),
            "IMPORT_BOOKS" => Ok(Self::ImportBooks),
            other => Err(format!("unknown reference type: {other}")),
        }
    }
}

/// A stored notification. Its JSON form is also the `NOTIFY` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id.
    pub id: NotificationId,
    /// Recipient.
    pub user_id: UserId,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Kind of referenced entity.
    pub reference_type: Option<ReferenceType>,
    /// Referenced entity id.
    pub reference_id: Option<uuid::Uuid>,
    /// When the recipient read it.
    pub read_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Builds an unread notification referencing `reference_id`.
    #[must_use]
    pub fn new(
        user_id: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
        reference: Option<(ReferenceType, uuid::Uuid)>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            title: title.into(),
            message: message.into(),
            reference_type: reference.map(|(kind, _)| kind),
            reference_id: reference.map(|(_, id)| id),
            read_at: None,
            created_at: now,
        }
    }

    /// Marks the notification read. The first read time sticks.
    pub fn mark_read(&mut self, now: DateTime<Utc>) {
        if self.read_at.is_none() {
            self.read_at = Some(now);
        }
    }
}

/// Push delivery provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushProvider {
    /// Firebase Cloud Messaging.
    Fcm,
    /// Apple Push Notification service.
    Apns,
    /// Web Push.
    Webpush,
}

impl PushProvider {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fcm => "fcm",
            Self::Apns => "apns",
            Self::Webpush => "webpush",
        }
    }
}

impl FromStr for PushProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcm" => Ok(Self::Fcm),
            "apns" => Ok(Self::Apns),
            "webpush" => Ok(Self::Webpush),
            other => Err(format!("unknown push provider: {other}")),
        }
    }
}

/// A device token registered for push delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushToken {
    /// Token id.
    pub id: PushTokenId,
    /// Owner.
    pub user_id: UserId,
    /// Provider-issued device token.
    pub token: String,
    /// Provider.
    pub provider: PushProvider,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn mark_read_is_idempotent() {
        let t0 = Utc::now();
        let mut n = Notification::new(UserId::new(), "t", "m", None, t0);
        n.mark_read(t0);
        n.mark_read(t0 + Duration::hours(1));
        assert_eq!(n.read_at, Some(t0));
    }

    #[test]
    fn payload_round_trips_as_json() {
        let n = Notification::new(
            UserId::new(),
            "Export ready",
            "Your export finished",
            Some((ReferenceType::ExportBorrowing, uuid::Uuid::new_v4())),
            Utc::now(),
        );
        let Ok(json) = serde_json::to_string(&n) else {
            panic!("serialize");
        };
        assert!(json.contains("\"EXPORT_BORROWING\""));
        let Ok(back) = serde_json::from_str::<Notification>(&json) else {
            panic!("deserialize");
        };
        assert_eq!(back, n);
    }
}
