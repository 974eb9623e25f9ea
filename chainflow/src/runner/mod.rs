//! Tool invocation runner.
//!
//! Every adapter builds its own `invoke`/`validate` closures per unit of work
//! and shares this control structure, so retry behavior is uniform and
//! testable without any external tool.

mod process;
mod validate;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::errors::{StepError, ToolError};

pub use process::{OutputTarget, ToolCommand};
pub use validate::{artifact_is_valid, artifacts_are_valid, files_with_suffix};

/// Bounded fixed-wait retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Wait between attempts.
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    /// Creates a policy with the wait expressed in seconds.
    #[must_use]
    pub fn from_seconds(max_retries: u32, wait_seconds: u64) -> Self {
        Self::new(max_retries, Duration::from_secs(wait_seconds))
    }

    /// Attempts actually allowed; never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Runs `invoke` until `validate` accepts its result or attempts run out.
///
/// Any invoke error or validation failure counts as a failed attempt and is
/// followed by a sleep of `policy.wait`, except after the last attempt.
///
/// # Errors
///
/// Returns [`StepError::RetryExhausted`] carrying the last error once
/// `policy.attempts()` attempts have failed.
pub async fn run_with_retry<T, F, Fut, V>(
    label: &str,
    policy: &RetryPolicy,
    mut invoke: F,
    mut validate: V,
) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ToolError>>,
    V: FnMut(&T) -> Result<(), ToolError>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(label, attempt, max_attempts = attempts, "Invoking tool");

        let failure = match invoke().await {
            Ok(value) => match validate(&value) {
                Ok(()) => return Ok(value),
                Err(e) => e,
            },
            Err(e) => e,
        };

        if attempt >= attempts {
            error!(label, attempts = attempt, error = %failure, "Retries exhausted");
            return Err(StepError::RetryExhausted {
                label: label.to_string(),
                attempts: attempt,
                last: failure,
            });
        }

        warn!(
            label,
            attempt,
            delay_ms = u64::try_from(policy.wait.as_millis()).unwrap_or(u64::MAX),
            error = %failure,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(policy.wait).await;
    }
}

/// Returns true when the unit of work can be skipped.
///
/// The unit is skipped when `force_run` is off and `validate` accepts the
/// output already on disk.
pub fn skip_if_valid<V>(label: &str, force_run: bool, validate: V) -> bool
where
    V: FnOnce() -> Result<(), ToolError>,
{
    if force_run {
        return false;
    }
    match validate() {
        Ok(()) => {
            info!(label, "Valid output already present, skipping");
            true
        }
        Err(_) => false,
    }
}
