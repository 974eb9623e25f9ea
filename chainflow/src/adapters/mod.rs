//! Step adapters.
//!
//! Each adapter translates a step's parameters and resolved inputs into
//! external tool invocations run through [`crate::runner`], and returns a
//! small output map consumed by downstream steps.

pub mod config;
pub mod env;
pub mod samples;

mod bwa;
mod ciri2;
#[cfg(feature = "http-adapters")]
mod quickgo;
mod srr;
#[cfg(feature = "http-adapters")]
mod uniprot;

use async_trait::async_trait;

use crate::core::{InputMap, OutputMap, Payload};
use crate::errors::StepError;
use crate::runner::ToolCommand;

pub use bwa::BwaAligner;
pub use ciri2::Ciri2Processor;
pub use config::{ToolConfig, ToolConfigSource};
pub use env::{StepEnv, RUN_DIRECTORY_KEY, STEP_ID_KEY};
#[cfg(feature = "http-adapters")]
pub use quickgo::{AnnotationClient, GoAnnotationFetcher, QuickGoClient};
pub use srr::SrrDataManager;
#[cfg(feature = "http-adapters")]
pub use uniprot::UniProtDataPreparer;

/// The capability every tool family implements.
#[async_trait]
pub trait StepAdapter: Send + Sync {
    /// Canonical step name this adapter serves.
    fn name(&self) -> &str;

    /// Runs the step.
    ///
    /// Missing optional input keys mean "not provided".
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingInput`] for an absent mandatory key,
    /// [`StepError::Configuration`] for invalid merged configuration and
    /// [`StepError::RetryExhausted`] when a unit of work keeps failing.
    async fn execute(&self, parameters: &Payload, input: &InputMap) -> Result<OutputMap, StepError>;
}

/// Builds a tool command logging stderr under the step's log directory.
pub(crate) fn tool_command(
    config: &ToolConfig,
    env: &StepEnv<'_>,
    program: &str,
    log_name: &str,
) -> Result<ToolCommand, StepError> {
    let mut command = ToolCommand::new(program).log_to(env.log_file(log_name));
    if let Some(limit) = config.tool_timeout()? {
        command = command.timeout(limit);
    }
    Ok(command)
}

/// Reads a mandatory path from the input map, falling back to the merged
/// configuration so that non-first steps can take it as a parameter.
pub(crate) fn mandatory_path(
    env: &StepEnv<'_>,
    config: &ToolConfig,
    key: &str,
) -> Result<std::path::PathBuf, StepError> {
    if let Some(path) = env.optional_path(key)? {
        return Ok(path);
    }
    match config.get(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(std::path::PathBuf::from(s)),
        _ => Err(StepError::missing_input(env.step(), key)),
    }
}

/// Converts a path to a JSON string value.
pub(crate) fn path_value(path: &std::path::Path) -> serde_json::Value {
    serde_json::Value::String(path.to_string_lossy().into_owned())
}
