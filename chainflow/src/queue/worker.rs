//! Queue worker loop.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::TaskMessage;
use crate::shutdown::Shutdown;

/// Something that processes one task message.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Result of a handled message.
    type Outcome: Debug + Send;
    /// Error of a failed message.
    type Error: std::fmt::Display + Send;

    /// Processes one message.
    async fn handle(&self, message: TaskMessage) -> Result<Self::Outcome, Self::Error>;
}

/// Pulls messages from a channel and hands them to a handler one at a time.
pub struct Worker<H> {
    receiver: mpsc::Receiver<TaskMessage>,
    handler: Arc<H>,
}

impl<H: TaskHandler> Worker<H> {
    /// Creates a worker.
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<TaskMessage>, handler: Arc<H>) -> Self {
        Self { receiver, handler }
    }

    /// Runs until the channel closes or `shutdown` fires.
    ///
    /// Handler errors are logged and the loop continues. Returns the number
    /// of messages processed.
    pub async fn run(mut self, shutdown: Shutdown) -> usize {
        let mut processed = 0;
        loop {
            let message = tokio::select! {
                () = shutdown.wait() => {
                    info!(reason = ?shutdown.reason(), "Worker shutting down");
                    break;
                }
                message = self.receiver.recv() => message,
            };
            let Some(message) = message else {
                debug!("Task channel closed");
                break;
            };

            let task = message.task_name();
            let pipeline_id = message.pipeline_id();
            match self.handler.handle(message).await {
                Ok(outcome) => debug!(task, %pipeline_id, ?outcome, "Task handled"),
                Err(e) => error!(task, %pipeline_id, error = %e, "Task failed"),
            }
            processed += 1;
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ChannelQueue, TaskQueue};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        type Outcome = ();
        type Error = String;

        async fn handle(&self, message: TaskMessage) -> Result<(), String> {
            self.seen.lock().push(message.task_name().to_string());
            if self.seen.lock().len() == 1 {
                return Err("first message fails".into());
            }
            Ok(())
        }
    }

    fn bootstrap() -> TaskMessage {
        TaskMessage::ExecutePipeline {
            pipeline_id: Uuid::new_v4(),
            run_directory: PathBuf::from("runs"),
        }
    }

    #[tokio::test]
    async fn test_worker_survives_handler_errors() {
        let (queue, receiver) = ChannelQueue::new(8);
        let handler = Arc::new(Recorder::default());
        queue.send(bootstrap()).await.unwrap();
        queue.send(bootstrap()).await.unwrap();
        drop(queue);

        let processed = Worker::new(receiver, handler.clone())
            .run(Shutdown::new())
            .await;
        assert_eq!(processed, 2);
        assert_eq!(handler.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let (_queue, receiver) = ChannelQueue::new(8);
        let shutdown = Shutdown::new();
        shutdown.request("test");
        let processed = Worker::new(receiver, Arc::new(Recorder::default()))
            .run(shutdown)
            .await;
        assert_eq!(processed, 0);
    }
}
