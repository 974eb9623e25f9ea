//! Error types for the chainflow engine.
//!
//! Errors fall into three families:
//! - definition errors ([`OrderError`], [`RegistrationError`], missing inputs),
//!   which are fatal to a pipeline and never retried
//! - execution errors ([`ToolError`]), retried by the runner until exhausted
//! - infrastructure errors ([`StoreError`], [`QueueError`]), which propagate
//!   untouched so the queue's own redelivery applies

use thiserror::Error;
use uuid::Uuid;

use crate::core::{PipelineStatus, StepStatus};

/// The umbrella error type for chainflow operations.
#[derive(Debug, Error)]
pub enum ChainflowError {
    /// Step order violation.
    #[error("{0}")]
    Order(#[from] OrderError),

    /// Pipeline definition rejected at registration.
    #[error("{0}")]
    Registration(#[from] RegistrationError),

    /// Step execution failure.
    #[error("{0}")]
    Step(#[from] StepError),

    /// State store failure.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Task queue failure.
    #[error("{0}")]
    Queue(#[from] QueueError),

    /// Dispatcher failure.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    /// Engine configuration failure.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the step order policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// A step name is absent from the canonical order.
    #[error("Unknown step: '{name}' is not part of the canonical order")]
    UnknownStep {
        /// The offending name.
        name: String,
    },

    /// The selected steps leave a gap or repeat a position.
    #[error("Steps are not contiguous: expected {expected:?}, got {actual:?}")]
    NonContiguous {
        /// Names covering the expected index range.
        expected: Vec<String>,
        /// Names as supplied, sorted by canonical index.
        actual: Vec<String>,
    },

    /// No steps were supplied.
    #[error("A pipeline needs at least one step")]
    Empty,
}

impl OrderError {
    /// Creates an unknown step error.
    #[must_use]
    pub fn unknown_step(name: impl Into<String>) -> Self {
        Self::UnknownStep { name: name.into() }
    }
}

/// Errors raised while turning a definition into records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Order validation failed.
    #[error("{0}")]
    Order(#[from] OrderError),

    /// The first step needs input files and none were declared.
    #[error("Step '{step}' requires input files but none were provided")]
    MissingInitialInput {
        /// The first step name.
        step: String,
    },

    /// An input mapping names a step that does not run earlier.
    #[error("Step '{step}' maps input '{key}' to '{upstream}', which does not precede it")]
    ForwardDependency {
        /// The consuming step.
        step: String,
        /// The input key.
        key: String,
        /// The referenced step.
        upstream: String,
    },
}

/// A single failed attempt inside the runner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// The process could not be started.
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        /// Program name.
        program: String,
        /// OS error text.
        reason: String,
    },

    /// The process exited unsuccessfully.
    #[error("'{program}' exited with status {code:?}")]
    NonZeroExit {
        /// Program name.
        program: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },

    /// The process exceeded its time limit.
    #[error("'{program}' timed out after {timeout_seconds}s")]
    Timeout {
        /// Program name.
        program: String,
        /// The limit that was exceeded.
        timeout_seconds: u64,
    },

    /// The declared artifact is missing, empty, or unparsable.
    #[error("Invalid output: {reason}")]
    InvalidOutput {
        /// What the validator rejected.
        reason: String,
    },

    /// An HTTP call failed.
    #[error("HTTP request to {url} failed: {reason}")]
    Http {
        /// Request URL.
        url: String,
        /// Transport or status error text.
        reason: String,
    },
}

impl ToolError {
    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Creates a non-zero exit error.
    #[must_use]
    pub fn non_zero_exit(program: impl Into<String>, code: Option<i32>) -> Self {
        Self::NonZeroExit {
            program: program.into(),
            code,
        }
    }

    /// Creates an invalid output error.
    #[must_use]
    pub fn invalid_output(reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            reason: reason.into(),
        }
    }

    /// Creates an HTTP error.
    #[must_use]
    pub fn http(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by a step adapter.
#[derive(Debug, Error)]
pub enum StepError {
    /// A mandatory input key is absent.
    #[error("Step '{step}' is missing mandatory input '{key}'")]
    MissingInput {
        /// Step name.
        step: String,
        /// The absent key.
        key: String,
    },

    /// The merged configuration is invalid.
    #[error("Invalid configuration for '{step}': {message}")]
    Configuration {
        /// Step name.
        step: String,
        /// What is wrong.
        message: String,
    },

    /// The runner gave up on a unit of work.
    #[error("'{label}' failed after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Unit of work label.
        label: String,
        /// Attempts performed.
        attempts: u32,
        /// The last attempt's error.
        last: ToolError,
    },

    /// Filesystem error outside the retried unit.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other adapter failure.
    #[error("Adapter error: {0}")]
    Adapter(String),
}

impl StepError {
    /// Creates a missing input error.
    #[must_use]
    pub fn missing_input(step: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingInput {
            step: step.into(),
            key: key.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors detected before any tool ran.
    #[must_use]
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::MissingInput { .. } | Self::Configuration { .. })
    }
}

/// Errors at the persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No pipeline with this id.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(Uuid),

    /// No step with this id.
    #[error("Step not found: {0}")]
    StepNotFound(Uuid),

    /// The requested status change is not in the transition table.
    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        /// Which record, e.g. `pipeline <id>`.
        entity: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The backing store cannot be reached.
    #[error("State store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates an invalid pipeline transition error.
    #[must_use]
    pub fn pipeline_transition(id: Uuid, from: PipelineStatus, to: PipelineStatus) -> Self {
        Self::InvalidTransition {
            entity: format!("pipeline {id}"),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates an invalid step transition error.
    #[must_use]
    pub fn step_transition(id: Uuid, from: StepStatus, to: StepStatus) -> Self {
        Self::InvalidTransition {
            entity: format!("step {id}"),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Errors at the task queue boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue cannot accept messages.
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No pipeline with this id.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(Uuid),

    /// The pipeline is not in a state that allows the request.
    #[error("Pipeline {pipeline_id} is {status}: {reason}")]
    InvalidState {
        /// Pipeline id.
        pipeline_id: Uuid,
        /// Its current status.
        status: PipelineStatus,
        /// Why the request was refused.
        reason: String,
    },

    /// Step order violation found before dispatch.
    #[error("{0}")]
    Order(#[from] OrderError),

    /// The step adapter failed.
    #[error("Step '{step_name}' failed: {source}")]
    Step {
        /// Step name.
        step_name: String,
        /// Underlying failure.
        #[source]
        source: StepError,
    },

    /// State store failure.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Task queue failure.
    #[error("{0}")]
    Queue(#[from] QueueError),

    /// No adapter is registered for this step name.
    #[error("No adapter registered for step '{0}'")]
    UnknownAdapter(String),

    /// Filesystem error while preparing the run directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(
        pipeline_id: Uuid,
        status: PipelineStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            pipeline_id,
            status,
            reason: reason.into(),
        }
    }

    /// Returns true for store and queue errors, which the caller may redeliver.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)) | Self::Queue(_))
    }
}

/// Errors in engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable holds an unparsable value.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// Values are individually fine but inconsistent.
    #[error("Invalid configuration: {0}")]
    Inconsistent(String),
}

/// Result alias for chainflow operations.
pub type Result<T> = std::result::Result<T, ChainflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_error_display() {
        let err = OrderError::unknown_step("Trimmer");
        assert!(err.to_string().contains("Trimmer"));

        let err = OrderError::NonContiguous {
            expected: vec!["A".into(), "B".into(), "C".into()],
            actual: vec!["A".into(), "C".into()],
        };
        assert!(err.to_string().contains("not contiguous"));
    }

    #[test]
    fn test_retry_exhausted_carries_last_error() {
        let err = StepError::RetryExhausted {
            label: "bwa mem SRR1".into(),
            attempts: 3,
            last: ToolError::non_zero_exit("bwa", Some(1)),
        };
        let text = err.to_string();
        assert!(text.contains("3 attempts"));
        assert!(text.contains("bwa"));
        assert!(!err.is_definition_error());
    }

    #[test]
    fn test_definition_errors() {
        assert!(StepError::missing_input("BWAAligner", "genome_file").is_definition_error());
        assert!(StepError::configuration("BWAAligner", "threads must be a number")
            .is_definition_error());
    }

    #[test]
    fn test_store_transition_error() {
        let id = Uuid::nil();
        let err = StoreError::step_transition(id, StepStatus::Completed, StepStatus::Running);
        assert_eq!(
            err.to_string(),
            format!("Invalid transition for step {id}: completed -> running")
        );
    }

    #[test]
    fn test_infrastructure_classification() {
        let err = DispatchError::from(QueueError::Unavailable("broker down".into()));
        assert!(err.is_infrastructure());

        let err = DispatchError::invalid_state(Uuid::nil(), PipelineStatus::Running, "busy");
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: ChainflowError = OrderError::Empty.into();
        assert!(matches!(err, ChainflowError::Order(OrderError::Empty)));
    }
}
