//! Core domain model types for chainflow.
//!
//! This module contains the records the engine reads and writes:
//! - Pipeline and step status enums with their transition tables
//! - Pipeline and step records
//! - Payload map aliases shared by adapters and the store

mod model;
mod status;

pub use model::{
    InputMap, InputMapping, OutputMap, Payload, Pipeline, PipelineSummary, Step, Timestamp,
};
pub use status::{PipelineStatus, StepStatus};
