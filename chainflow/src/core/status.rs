//! Pipeline and step status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Registered, never started.
    #[default]
    Pending,
    /// A step is being executed or is queued.
    Running,
    /// Every step completed.
    Completed,
    /// A step failed or the step set is invalid.
    Failed,
    /// Halted on request; the chain does not advance until resumed.
    Paused,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl PipelineStatus {
    /// Returns true if a pipeline in this status may be (re)started.
    #[must_use]
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Pending | Self::Paused | Self::Failed)
    }

    /// Returns true for `completed` and `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Paused),
            Self::Paused => matches!(next, Self::Running | Self::Failed),
            // A failed pipeline may be restarted; the dispatcher re-fails it
            // immediately while a failed step remains.
            Self::Failed => matches!(next, Self::Running),
            Self::Completed => false,
        }
    }
}

/// The execution status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for its turn.
    #[default]
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished and results recorded.
    Completed,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StepStatus {
    /// Returns true for the absorbing states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is allowed through a
    /// regular status update.
    ///
    /// `running -> pending` is not listed here: only a lease reclaim may do
    /// that.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed),
            Self::Running => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_status_display() {
        assert_eq!(PipelineStatus::Pending.to_string(), "pending");
        assert_eq!(PipelineStatus::Paused.to_string(), "paused");
        assert_eq!(PipelineStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn test_pipeline_status_startable() {
        assert!(PipelineStatus::Pending.is_startable());
        assert!(PipelineStatus::Paused.is_startable());
        assert!(PipelineStatus::Failed.is_startable());
        assert!(!PipelineStatus::Running.is_startable());
        assert!(!PipelineStatus::Completed.is_startable());
    }

    #[test]
    fn test_pipeline_transitions() {
        assert!(PipelineStatus::Pending.can_transition_to(PipelineStatus::Running));
        assert!(PipelineStatus::Running.can_transition_to(PipelineStatus::Paused));
        assert!(PipelineStatus::Paused.can_transition_to(PipelineStatus::Running));
        assert!(!PipelineStatus::Completed.can_transition_to(PipelineStatus::Running));
        assert!(!PipelineStatus::Pending.can_transition_to(PipelineStatus::Completed));
    }

    #[test]
    fn test_step_terminal_states_are_absorbing() {
        for next in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Completed,
            StepStatus::Failed,
        ] {
            assert!(!StepStatus::Completed.can_transition_to(next));
            assert!(!StepStatus::Failed.can_transition_to(next));
        }
        assert!(!StepStatus::Running.can_transition_to(StepStatus::Pending));
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StepStatus::Running).unwrap();
        assert_eq!(json, r#""running""#);

        let status: PipelineStatus = serde_json::from_str(r#""paused""#).unwrap();
        assert_eq!(status, PipelineStatus::Paused);
    }
}
