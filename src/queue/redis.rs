//! Redis-backed [`TaskQueue`] over a `bb8` connection pool.
//!
//! Tasks are JSON envelopes pushed with `LPUSH` onto
//! `librarium:queue:{name}` and taken with a blocking `BRPOP` across all
//! queue keys in weighted order.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::Pool;
use bb8_redis::redis;

use super::weighted_order;
use crate::error::AppError;
use crate::ports::{QueueName, TaskEnvelope, TaskQueue};

/// Redis key of a queue.
#[must_use]
pub fn queue_key(queue: QueueName) -> String {
    format!("librarium:queue:{}", queue.as_str())
}

/// Task queue backed by Redis lists.
#[derive(Debug, Clone)]
pub struct RedisQueue {
    pool: Pool<RedisConnectionManager>,
}

impl RedisQueue {
    /// Connects a pool of at most `max_size` connections to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Upstream`] if the URL is invalid or Redis is
    /// unreachable.
    pub async fn connect(url: &str, max_size: u32) -> Result<Self, AppError> {
        let manager = RedisConnectionManager::new(url).map_err(|e| AppError::upstream("redis", e))?;
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .build(manager)
            .await
            .map_err(|e| AppError::upstream("redis", e))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn enqueue(&self, queue: QueueName, task: &TaskEnvelope) -> Result<(), AppError> {
        let body = serde_json::to_string(task)?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::upstream("redis", e))?;
        redis::cmd("LPUSH")
            .arg(queue_key(queue))
            .arg(body)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| AppError::upstream("redis", e))?;
        tracing::debug!(queue = queue.as_str(), task_type = %task.task_type, "task enqueued");
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<TaskEnvelope>, AppError> {
        let keys: Vec<String> = weighted_order(&mut rand::thread_rng())
            .into_iter()
            .map(queue_key)
            .collect();
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::upstream("redis", e))?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&keys)
            .arg(wait.as_secs().max(1))
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::upstream("redis", e))?;
        let Some((key, body)) = popped else {
            return Ok(None);
        };
        match serde_json::from_str::<TaskEnvelope>(&body) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                tracing::error!(%key, error = %e, "dropping undecodable task");
                Ok(None)
            }
        }
    }
}
