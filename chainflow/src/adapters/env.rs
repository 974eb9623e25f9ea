//! Typed access to a step's resolved input map.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::InputMap;
use crate::errors::StepError;

/// Reserved input key carrying the run directory.
pub const RUN_DIRECTORY_KEY: &str = "run_directory";
/// Reserved input key carrying the executing step's id.
pub const STEP_ID_KEY: &str = "step_id";

/// Project id to list of file paths.
pub type ProjectFiles = BTreeMap<String, Vec<PathBuf>>;

/// The input map of one execution together with its derived locations.
#[derive(Debug, Clone)]
pub struct StepEnv<'a> {
    step: &'a str,
    input: &'a InputMap,
    run_directory: PathBuf,
    step_id: String,
}

impl<'a> StepEnv<'a> {
    /// Wraps the input map of `step`.
    #[must_use]
    pub fn new(step: &'a str, input: &'a InputMap) -> Self {
        let run_directory = input
            .get(RUN_DIRECTORY_KEY)
            .and_then(Value::as_str)
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let step_id = input
            .get(STEP_ID_KEY)
            .and_then(Value::as_str)
            .unwrap_or("adhoc")
            .to_string();
        Self {
            step,
            input,
            run_directory,
            step_id,
        }
    }

    /// Returns the step name.
    #[must_use]
    pub fn step(&self) -> &str {
        self.step
    }

    /// Returns the run directory.
    #[must_use]
    pub fn run_directory(&self) -> &Path {
        &self.run_directory
    }

    /// Returns `<run_directory>/logs/<step_id>`.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.run_directory.join("logs").join(&self.step_id)
    }

    /// Returns a file under [`Self::log_dir`].
    #[must_use]
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.log_dir().join(name)
    }

    /// Returns the raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.input.get(key)
    }

    /// Reads an optional path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if present but not a string.
    pub fn optional_path(&self, key: &str) -> Result<Option<PathBuf>, StepError> {
        match self.input.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(PathBuf::from(s))),
            Some(_) => Err(self.malformed(key, "a path string")),
        }
    }

    /// Reads a mandatory path.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingInput`] if absent.
    pub fn require_path(&self, key: &str) -> Result<PathBuf, StepError> {
        self.optional_path(key)?
            .ok_or_else(|| StepError::missing_input(self.step, key))
    }

    /// Reads `{project: [path, ...]}`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if present with the wrong shape.
    pub fn project_files(&self, key: &str) -> Result<Option<ProjectFiles>, StepError> {
        let Some(value) = self.input.get(key) else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }
        let projects = value
            .as_object()
            .ok_or_else(|| self.malformed(key, "an object of path lists"))?;

        let mut files = ProjectFiles::new();
        for (project, paths) in projects {
            let paths = paths
                .as_array()
                .ok_or_else(|| self.malformed(key, "an object of path lists"))?
                .iter()
                .map(|p| {
                    p.as_str()
                        .map(PathBuf::from)
                        .ok_or_else(|| self.malformed(key, "an object of path lists"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            files.insert(project.clone(), paths);
        }
        Ok(Some(files))
    }

    fn malformed(&self, key: &str, expected: &str) -> StepError {
        StepError::configuration(self.step, format!("input '{key}' must be {expected}"))
    }
}
