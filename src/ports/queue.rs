//! Task broker port and wire format.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobType};
use crate::error::AppError;

/// Named broker queues with static weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// Weight 6.
    Critical,
    /// Weight 3.
    Default,
    /// Weight 1.
    Low,
}

impl QueueName {
    /// All queues in descending weight.
    pub const ALL: [Self; 3] = [Self::Critical, Self::Default, Self::Low];

    /// Queue name as used in broker keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Default => "default",
            Self::Low => "low",
        }
    }

    /// Relative polling weight.
    #[must_use]
    pub const fn weight(self) -> u32 {
        match self {
            Self::Critical => 6,
            Self::Default => 3,
            Self::Low => 1,
        }
    }
}

/// Broker task: `{"job_id": "<uuid>", "type": "<task-type>", "payload": "<json string>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Job row driving the task; absent for sweeps such as `check:overdue`.
    pub job_id: Option<JobId>,
    /// Task type.
    #[serde(rename = "type")]
    pub task_type: JobType,
    /// Opaque JSON payload, serialized as a string.
    pub payload: String,
}

impl TaskEnvelope {
    /// Builds an envelope, serializing `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] if the payload cannot be serialized.
    pub fn new<P: Serialize>(
        job_id: Option<JobId>,
        task_type: JobType,
        payload: &P,
    ) -> Result<Self, AppError> {
        Ok(Self {
            job_id,
            task_type,
            payload: serde_json::to_string(payload)?,
        })
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the payload does not match `P`.
    pub fn decode<P: for<'de> Deserialize<'de>>(&self) -> Result<P, AppError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| AppError::Validation(format!("malformed {} payload: {e}", self.task_type)))
    }
}

/// Task broker.
#[async_trait]
pub trait TaskQueue: Send + Sync + fmt::Debug {
    /// Pushes a task onto `queue`.
    async fn enqueue(&self, queue: QueueName, task: &TaskEnvelope) -> Result<(), AppError>;

    /// Waits up to `wait` for the next task across all queues.
    async fn dequeue(&self, wait: Duration) -> Result<Option<TaskEnvelope>, AppError>;
}
