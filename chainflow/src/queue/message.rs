//! Task messages exchanged through the queue.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::Payload;

/// A queue message, tagged by task name on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskMessage {
    /// Bootstrap: validate the step set and dispatch the first pending step.
    ExecutePipeline {
        /// Pipeline to advance.
        pipeline_id: Uuid,
        /// Root directory for this run's artifacts.
        run_directory: PathBuf,
    },
    /// Execute exactly one step, then hand off to the next.
    ExecuteStep {
        /// Owning pipeline.
        pipeline_id: Uuid,
        /// Step to execute.
        step_id: Uuid,
        /// Canonical step name.
        step_name: String,
        /// Step parameters as registered.
        #[serde(default)]
        parameters: Payload,
        /// Declared input files (first step only).
        #[serde(default)]
        input_data: Payload,
        /// Root directory for this run's artifacts.
        run_directory: PathBuf,
    },
}

impl TaskMessage {
    /// Returns the task name used on the wire.
    #[must_use]
    pub fn task_name(&self) -> &'static str {
        match self {
            Self::ExecutePipeline { .. } => "execute_pipeline",
            Self::ExecuteStep { .. } => "execute_step",
        }
    }

    /// Returns the pipeline the message targets.
    #[must_use]
    pub fn pipeline_id(&self) -> Uuid {
        match self {
            Self::ExecutePipeline { pipeline_id, .. } | Self::ExecuteStep { pipeline_id, .. } => {
                *pipeline_id
            }
        }
    }

    /// Returns the step name for `execute_step` messages.
    #[must_use]
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::ExecuteStep { step_name, .. } => Some(step_name),
            Self::ExecutePipeline { .. } => None,
        }
    }
}
