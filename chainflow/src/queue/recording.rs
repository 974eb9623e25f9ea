//! A queue that records messages instead of delivering them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use super::{TaskId, TaskMessage, TaskQueue};
use crate::errors::QueueError;

/// Stores every sent message in FIFO order.
///
/// Clones share the same buffer. Tests drain it by hand to drive the
/// dispatcher one message at a time.
#[derive(Debug, Clone, Default)]
pub struct RecordingQueue {
    pending: Arc<Mutex<VecDeque<TaskMessage>>>,
    sent: Arc<Mutex<Vec<TaskMessage>>>,
}

impl RecordingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the oldest undelivered message.
    #[must_use]
    pub fn pop(&self) -> Option<TaskMessage> {
        self.pending.lock().pop_front()
    }

    /// Returns the number of undelivered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Returns every message ever sent, delivered or not.
    #[must_use]
    pub fn sent(&self) -> Vec<TaskMessage> {
        self.sent.lock().clone()
    }

    /// Returns the step names of every `execute_step` message ever sent.
    #[must_use]
    pub fn sent_step_names(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.step_name().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn send(&self, message: TaskMessage) -> Result<TaskId, QueueError> {
        tracing::debug!(task = message.task_name(), pipeline_id = %message.pipeline_id(), "Recorded task");
        self.sent.lock().push(message.clone());
        self.pending.lock().push_back(message);
        Ok(Uuid::now_v7())
    }
}
