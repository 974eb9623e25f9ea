//! Task queue boundary.
//!
//! This module provides:
//! - The two-message contract (`TaskMessage`)
//! - The `TaskQueue` client trait
//! - A recording queue for tests and manual draining
//! - A tokio channel queue with a matching `Worker`

mod channel;
mod message;
mod recording;
mod worker;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::QueueError;

pub use channel::ChannelQueue;
pub use message::TaskMessage;
pub use recording::RecordingQueue;
pub use worker::{TaskHandler, Worker};

/// Identity assigned to an accepted message.
pub type TaskId = Uuid;

/// Asynchronous "send task by name with arguments" client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a message.
    async fn send(&self, message: TaskMessage) -> Result<TaskId, QueueError>;
}
