//! Lifecycle events.
//!
//! The dispatcher and the watchdog report every state transition through an
//! [`EventSink`]. Events are informational; the state store stays the source
//! of truth.

mod sink;

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::core::Timestamp;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// The pipeline entered `running`.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// A step was claimed.
    #[serde(rename = "step.started")]
    StepStarted,
    /// A step recorded its results.
    #[serde(rename = "step.completed")]
    StepCompleted,
    /// A step failed.
    #[serde(rename = "step.failed")]
    StepFailed,
    /// Every step completed.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// The pipeline failed.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed,
    /// The pipeline was paused.
    #[serde(rename = "pipeline.paused")]
    PipelinePaused,
    /// The watchdog moved a stuck step back to `pending`.
    #[serde(rename = "step.reclaimed")]
    StepReclaimed,
}

impl EventKind {
    /// Dotted event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::StepStarted => "step.started",
            Self::StepCompleted => "step.completed",
            Self::StepFailed => "step.failed",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
            Self::PipelinePaused => "pipeline.paused",
            Self::StepReclaimed => "step.reclaimed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Event kind.
    pub kind: EventKind,
    /// Pipeline concerned.
    pub pipeline_id: Uuid,
    /// Step concerned, for step events.
    pub step_id: Option<Uuid>,
    /// Step name, for step events.
    pub step_name: Option<String>,
    /// Error text or other detail.
    pub detail: Option<String>,
    /// When the event was created.
    pub at: Timestamp,
}

impl Event {
    /// Creates a pipeline-level event.
    #[must_use]
    pub fn pipeline(kind: EventKind, pipeline_id: Uuid) -> Self {
        Self {
            kind,
            pipeline_id,
            step_id: None,
            step_name: None,
            detail: None,
            at: Utc::now(),
        }
    }

    /// Creates a step-level event.
    #[must_use]
    pub fn step(kind: EventKind, pipeline_id: Uuid, step_id: Uuid, step_name: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id),
            step_name: Some(step_name.into()),
            ..Self::pipeline(kind, pipeline_id)
        }
    }

    /// Attaches a detail string.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
