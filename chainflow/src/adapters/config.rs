//! Layered tool configuration.
//!
//! Values are merged as `adapter defaults < file section < step parameters`.
//! The file is `<dir>/<APP_ENV>_config.json`, falling back to
//! `<dir>/default_config.json`; each top-level key is a step name.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::Payload;
use crate::errors::StepError;
use crate::runner::RetryPolicy;

/// Converts a `json!` object literal into a payload; anything else is empty.
#[must_use]
pub fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Per-step sections read from the tool configuration file.
#[derive(Debug, Clone, Default)]
pub struct ToolConfigSource {
    sections: Payload,
    origin: Option<PathBuf>,
}

impl ToolConfigSource {
    /// A source with no file sections.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A source from in-memory sections.
    #[must_use]
    pub fn from_sections(sections: Payload) -> Self {
        Self {
            sections,
            origin: None,
        }
    }

    /// Loads the file for `app_env` from `dir`.
    ///
    /// A missing directory, missing files, or a malformed file all yield a
    /// source without sections; the problem is logged.
    #[must_use]
    pub fn load(dir: Option<&Path>, app_env: &str) -> Self {
        let Some(dir) = dir else {
            return Self::empty();
        };

        let env_file = dir.join(format!("{app_env}_config.json"));
        let path = if env_file.is_file() {
            env_file
        } else {
            warn!(path = %env_file.display(), "Environment config not found, trying default_config.json");
            dir.join("default_config.json")
        };
        if !path.is_file() {
            warn!(path = %path.display(), "Tool config not found, using adapter defaults");
            return Self::empty();
        }

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(Value::Object(sections)) => {
                debug!(path = %path.display(), steps = sections.len(), "Loaded tool config");
                Self {
                    sections,
                    origin: Some(path),
                }
            }
            Ok(_) => {
                warn!(path = %path.display(), "Tool config is not a JSON object, ignoring");
                Self::empty()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read tool config, ignoring");
                Self::empty()
            }
        }
    }

    /// Returns the file this source was read from.
    #[must_use]
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Returns the file section of `step`.
    #[must_use]
    pub fn section(&self, step: &str) -> Payload {
        match self.sections.get(step) {
            Some(Value::Object(section)) => section.clone(),
            _ => Payload::new(),
        }
    }

    /// Merges defaults, the file section and parameter overrides.
    #[must_use]
    pub fn resolve(&self, step: &str, defaults: Payload, overrides: &Payload) -> ToolConfig {
        let mut values = defaults;
        values.extend(self.section(step));
        values.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        let merged = Value::Object(values.clone());
        debug!(step, config = %merged, "Resolved tool config");
        ToolConfig {
            step: step.to_string(),
            values,
        }
    }
}

/// The merged configuration of one step execution.
///
/// Accessors type-check on read; a wrong type is a configuration error.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    step: String,
    values: Payload,
}

impl ToolConfig {
    /// Returns the raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the merged map.
    #[must_use]
    pub fn values(&self) -> &Payload {
        &self.values
    }

    fn require(&self, key: &str) -> Result<&Value, StepError> {
        self.values
            .get(key)
            .ok_or_else(|| StepError::configuration(&self.step, format!("'{key}' is not set")))
    }

    fn wrong_type(&self, key: &str, expected: &str) -> StepError {
        StepError::configuration(&self.step, format!("'{key}' must be {expected}"))
    }

    /// Reads a non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if absent or not an unsigned integer.
    pub fn uint(&self, key: &str) -> Result<u64, StepError> {
        self.require(key)?
            .as_u64()
            .ok_or_else(|| self.wrong_type(key, "a non-negative integer"))
    }

    /// Reads a non-negative integer where `null` or absence means "unset".
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other type.
    pub fn optional_uint(&self, key: &str) -> Result<Option<u64>, StepError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "a non-negative integer or null")),
        }
    }

    /// Reads a number.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if absent or not numeric.
    pub fn number(&self, key: &str) -> Result<f64, StepError> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| self.wrong_type(key, "a number"))
    }

    /// Reads a boolean, defaulting to `false` when absent.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if present and not a boolean.
    pub fn flag(&self, key: &str) -> Result<bool, StepError> {
        match self.values.get(key) {
            None => Ok(false),
            Some(v) => v.as_bool().ok_or_else(|| self.wrong_type(key, "a boolean")),
        }
    }

    /// Reads a string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if absent or not a string.
    pub fn string(&self, key: &str) -> Result<&str, StepError> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| self.wrong_type(key, "a string"))
    }

    /// Reads a list of strings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if absent or not a list of strings.
    pub fn strings(&self, key: &str) -> Result<Vec<String>, StepError> {
        let items = self
            .require(key)?
            .as_array()
            .ok_or_else(|| self.wrong_type(key, "a list of strings"))?;
        items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.wrong_type(key, "a list of strings"))
            })
            .collect()
    }

    /// Reads a directory and resolves it against `base` when relative.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if absent or not a string.
    pub fn dir(&self, key: &str, base: &Path) -> Result<PathBuf, StepError> {
        let path = Path::new(self.string(key)?);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        })
    }

    /// Reads `max_retries` and `retry_wait_time`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either is not an unsigned integer.
    pub fn retry_policy(&self) -> Result<RetryPolicy, StepError> {
        let max_retries = u32::try_from(self.uint("max_retries")?)
            .map_err(|_| self.wrong_type("max_retries", "at most 2^32 - 1"))?;
        Ok(RetryPolicy::from_seconds(
            max_retries,
            self.uint("retry_wait_time")?,
        ))
    }

    /// Reads `force_run`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if present and not a boolean.
    pub fn force_run(&self) -> Result<bool, StepError> {
        self.flag("force_run")
    }

    /// Reads the optional `timeout_seconds` applied to each tool process.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if present and not an unsigned integer.
    pub fn tool_timeout(&self) -> Result<Option<Duration>, StepError> {
        Ok(self.optional_uint("timeout_seconds")?.map(Duration::from_secs))
    }

    /// Reads a thread count, falling back to the available parallelism.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if present and not an unsigned integer.
    pub fn threads(&self, key: &str) -> Result<u64, StepError> {
        Ok(self.optional_uint(key)?.unwrap_or_else(available_threads))
    }
}

/// Number of CPUs usable by tools.
#[must_use]
pub fn available_threads() -> u64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1)
}
