//! External process invocation.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ToolError;

/// Where a tool's stdout goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputTarget {
    /// Appended to the stderr log file (or discarded without one).
    #[default]
    Log,
    /// Written to this artifact, truncating it first.
    File(PathBuf),
}

/// One external tool invocation.
///
/// Tool output is never returned to the caller; stderr is appended to
/// `log_file` and stdout goes to its [`OutputTarget`].
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    stdout: OutputTarget,
    log_file: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    /// Creates a command for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stdout: OutputTarget::Log,
            log_file: None,
            timeout: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a path argument.
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Redirects stdout to an artifact file.
    #[must_use]
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = OutputTarget::File(path.into());
        self
    }

    /// Sets the log file receiving stderr.
    #[must_use]
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Sets a time limit.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns the command line for logging.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the command to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Spawn`] if the process or its redirections cannot
    /// be set up, [`ToolError::NonZeroExit`] on an unsuccessful exit and
    /// [`ToolError::Timeout`] if the time limit is exceeded.
    pub async fn run(&self) -> Result<(), ToolError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let log = match &self.log_file {
            Some(path) => Some(self.open_log(path)?),
            None => None,
        };
        command.stderr(match &log {
            Some(file) => Stdio::from(self.clone_handle(file)?),
            None => Stdio::null(),
        });
        command.stdout(match (&self.stdout, &log) {
            (OutputTarget::File(path), _) => Stdio::from(self.create_artifact(path)?),
            (OutputTarget::Log, Some(file)) => Stdio::from(self.clone_handle(file)?),
            (OutputTarget::Log, None) => Stdio::null(),
        });

        debug!(command = %self.display(), "Spawning tool");
        let mut child = command
            .spawn()
            .map_err(|e| ToolError::spawn(&self.program, e.to_string()))?;

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(ToolError::Timeout {
                        program: self.program.clone(),
                        timeout_seconds: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await,
        }
        .map_err(|e| ToolError::spawn(&self.program, e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(ToolError::non_zero_exit(&self.program, status.code()))
        }
    }

    fn open_log(&self, path: &Path) -> Result<File, ToolError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.setup_error(path, &e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| self.setup_error(path, &e))
    }

    fn create_artifact(&self, path: &Path) -> Result<File, ToolError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.setup_error(path, &e))?;
        }
        File::create(path).map_err(|e| self.setup_error(path, &e))
    }

    fn clone_handle(&self, file: &File) -> Result<File, ToolError> {
        file.try_clone()
            .map_err(|e| ToolError::spawn(&self.program, e.to_string()))
    }

    fn setup_error(&self, path: &Path, e: &std::io::Error) -> ToolError {
        ToolError::spawn(&self.program, format!("{}: {e}", path.display()))
    }
}
