//! Notification, push token and job DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Job, Notification, PushProvider, PushToken};

/// A user notification. Also the SSE frame payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationDto {
    /// Notification UUID.
    pub id: uuid::Uuid,
    /// Recipient.
    pub user_id: uuid::Uuid,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// `BORROWING`, `BORROWING_OVERDUE`, `EXPORT_BORROWING` or `IMPORT_BOOKS`.
    pub reference_type: Option<String>,
    /// Referenced entity.
    pub reference_id: Option<uuid::Uuid>,
    /// When it was read.
    pub read_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationDto {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id.into(),
            user_id: n.user_id.into(),
            title: n.title,
            message: n.message,
            reference_type: n.reference_type.map(|r| r.as_str().to_string()),
            reference_id: n.reference_id,
            read_at: n.read_at,
            created_at: n.created_at,
        }
    }
}

/// Request body for `POST /notifications/push-tokens`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterPushTokenRequest {
    /// Provider-issued device token.
    pub token: String,
    /// `fcm`, `apns` or `webpush`.
    #[schema(value_type = String, example = "fcm")]
    pub provider: PushProvider,
}

/// A registered device token.
#[derive(Debug, Serialize, ToSchema)]
pub struct PushTokenDto {
    /// Token UUID.
    pub id: uuid::Uuid,
    /// Device token.
    pub token: String,
    /// Provider.
    #[schema(value_type = String, example = "fcm")]
    pub provider: PushProvider,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<PushToken> for PushTokenDto {
    fn from(t: PushToken) -> Self {
        Self {
            id: t.id.into(),
            token: t.token,
            provider: t.provider,
            created_at: t.created_at,
        }
    }
}

/// A background job.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobDto {
    /// Job UUID.
    pub id: uuid::Uuid,
    /// `export:borrowings` or `import:books`.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Library the job operates on.
    pub library_id: uuid::Uuid,
    /// Submitting staff.
    pub staff_id: uuid::Uuid,
    /// `PENDING`, `PROCESSING`, `COMPLETED` or `FAILED`.
    pub status: String,
    /// Submitted payload.
    pub payload: serde_json::Value,
    /// Result document once completed.
    pub result: Option<serde_json::Value>,
    /// Failure message once failed.
    pub error: Option<String>,
    /// When a worker claimed it.
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Job> for JobDto {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.into(),
            job_type: job.job_type.as_str().to_string(),
            library_id: job.library_id.into(),
            staff_id: job.staff_id.into(),
            status: job.status.as_str().to_string(),
            payload: job.payload,
            result: job.result,
            error: job.error,
            started_at: job.started_at,
            finished_at: job.finished_at,
            created_at: job.created_at,
        }
    }
}

/// Response body for `GET /jobs/{id}/download`.
#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadDto {
    /// Presigned URL.
    pub url: String,
    /// Seconds until the URL expires.
    pub expires_in: u64,
}
