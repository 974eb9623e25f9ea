//! Pipeline and step records as persisted by the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::status::{PipelineStatus, StepStatus};

/// UTC timestamp used for every persisted time field.
pub type Timestamp = DateTime<Utc>;

/// Opaque key to JSON value map used for parameters, inputs and results.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Resolved inputs handed to a step adapter.
pub type InputMap = Payload;

/// Output keys returned by a step adapter.
pub type OutputMap = Payload;

/// Declares which upstream step supplies each input key.
pub type InputMapping = BTreeMap<String, String>;

/// A registered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline identity.
    pub id: Uuid,
    /// Human readable name.
    pub name: String,
    /// Current status.
    pub status: PipelineStatus,
    /// When the pipeline was registered.
    pub created_at: Timestamp,
    /// When the pipeline last entered `running`.
    pub start_time: Option<Timestamp>,
    /// When the pipeline reached a terminal status.
    pub end_time: Option<Timestamp>,
    /// Free-text notes.
    pub notes: Option<String>,
}

impl Pipeline {
    /// Creates a pending pipeline with a fresh identity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: PipelineStatus::Pending,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            notes: None,
        }
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Returns the minimal projection.
    #[must_use]
    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            id: self.id,
            status: self.status,
        }
    }
}

/// The minimal pipeline record returned by `get_pipeline_minimal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Pipeline identity.
    pub id: Uuid,
    /// Current status.
    pub status: PipelineStatus,
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step identity.
    pub id: Uuid,
    /// Owning pipeline.
    pub pipeline_id: Uuid,
    /// Canonical step name.
    pub name: String,
    /// Index in the canonical order, derived at registration.
    pub position: usize,
    /// Current status.
    pub status: StepStatus,
    /// Tool parameter overrides.
    #[serde(default)]
    pub parameters: Payload,
    /// Whether the step needs user supplied input files.
    #[serde(default)]
    pub requires_input_file: bool,
    /// User supplied inputs, only kept on the first step of a chain.
    #[serde(default)]
    pub input_files: Payload,
    /// Input key to upstream step name.
    #[serde(default)]
    pub input_mapping: InputMapping,
    /// Output map, written once on completion.
    pub results: Option<Payload>,
    /// When the step was claimed.
    pub start_time: Option<Timestamp>,
    /// When the step reached a terminal status.
    pub end_time: Option<Timestamp>,
    /// Lease deadline while running.
    pub lease_expires_at: Option<Timestamp>,
    /// How many times the watchdog moved this step back to pending.
    #[serde(default)]
    pub reclaim_count: u32,
}

impl Step {
    /// Creates a pending step.
    #[must_use]
    pub fn new(pipeline_id: Uuid, name: impl Into<String>, position: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            name: name.into(),
            position,
            status: StepStatus::Pending,
            parameters: Payload::new(),
            requires_input_file: false,
            input_files: Payload::new(),
            input_mapping: InputMapping::new(),
            results: None,
            start_time: None,
            end_time: None,
            lease_expires_at: None,
            reclaim_count: 0,
        }
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Payload) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the declared input files.
    #[must_use]
    pub fn with_input_files(mut self, input_files: Payload) -> Self {
        self.input_files = input_files;
        self
    }

    /// Adds one input-mapping entry.
    #[must_use]
    pub fn with_mapping(mut self, key: impl Into<String>, upstream: impl Into<String>) -> Self {
        self.input_mapping.insert(key.into(), upstream.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }
}
