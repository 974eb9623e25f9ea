//! A queue backed by a tokio channel.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{TaskId, TaskMessage, TaskQueue};
use crate::errors::QueueError;

/// Sending half of an in-process task channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: mpsc::Sender<TaskMessage>,
}

impl ChannelQueue {
    /// Creates a queue and the receiver a [`super::Worker`] consumes.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    async fn send(&self, message: TaskMessage) -> Result<TaskId, QueueError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| QueueError::Unavailable("task channel closed".into()))?;
        Ok(Uuid::now_v7())
    }
}
