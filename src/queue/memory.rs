//! In-process [`TaskQueue`] for tests and single-binary local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::weighted_order;
use crate::error::AppError;
use crate::ports::{QueueName, TaskEnvelope, TaskQueue};

/// FIFO queues per [`QueueName`] with a wake-up signal for waiting workers.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<QueueName, VecDeque<TaskEnvelope>>>,
    ready: Notify,
}

impl InMemoryQueue {
    /// Creates empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks on `queue`.
    #[must_use]
    pub fn len(&self, queue: QueueName) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&queue)
            .map_or(0, VecDeque::len)
    }

    /// Returns `true` if every queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        QueueName::ALL.iter().all(|q| self.len(*q) == 0)
    }

    fn try_pop(&self) -> Option<TaskEnvelope> {
        let order = weighted_order(&mut rand::thread_rng());
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        order
            .into_iter()
            .find_map(|q| queues.get_mut(&q).and_then(VecDeque::pop_front))
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, queue: QueueName, task: &TaskEnvelope) -> Result<(), AppError> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(queue)
            .or_default()
            .push_back(task.clone());
        self.ready.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<TaskEnvelope>, AppError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(task) = self.try_pop() {
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return Ok(self.try_pop());
            }
        }
    }
}
