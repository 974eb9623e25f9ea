//! Scripted step adapters.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::adapters::StepAdapter;
use crate::core::{InputMap, OutputMap, Payload};
use crate::errors::{StepError, ToolError};

#[derive(Debug, Clone)]
enum Script {
    Succeed(OutputMap),
    Fail(String),
    MissingInput(String),
}

/// An adapter whose result is fixed up front.
///
/// Every call is recorded. An optional gate makes `execute` wait until the
/// test releases it.
#[derive(Debug)]
pub struct ScriptedAdapter {
    name: String,
    script: Mutex<Script>,
    calls: Mutex<Vec<(Payload, InputMap)>>,
    gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
}

impl ScriptedAdapter {
    fn with_script(name: impl Into<String>, script: Script) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
            gate: None,
            delay: None,
        }
    }

    /// An adapter returning `output`.
    #[must_use]
    pub fn succeeding(name: impl Into<String>, output: OutputMap) -> Self {
        Self::with_script(name, Script::Succeed(output))
    }

    /// An adapter failing as if its tool exhausted every retry.
    #[must_use]
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_script(name, Script::Fail(message.into()))
    }

    /// An adapter reporting a missing mandatory key.
    #[must_use]
    pub fn missing_input(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_script(name, Script::MissingInput(key.into()))
    }

    /// Blocks each call until `gate` is notified.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sleeps before returning.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the result with `output`.
    pub fn set_output(&self, output: OutputMap) {
        *self.script.lock() = Script::Succeed(output);
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Inputs of every call.
    #[must_use]
    pub fn inputs(&self) -> Vec<InputMap> {
        self.calls.lock().iter().map(|(_, input)| input.clone()).collect()
    }

    /// Input of the most recent call.
    #[must_use]
    pub fn last_input(&self) -> Option<InputMap> {
        self.calls.lock().last().map(|(_, input)| input.clone())
    }

    /// Parameters of the most recent call.
    #[must_use]
    pub fn last_parameters(&self) -> Option<Payload> {
        self.calls.lock().last().map(|(parameters, _)| parameters.clone())
    }
}

#[async_trait]
impl StepAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, parameters: &Payload, input: &InputMap) -> Result<OutputMap, StepError> {
        self.calls.lock().push((parameters.clone(), input.clone()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().clone();
        match script {
            Script::Succeed(output) => Ok(output),
            Script::Fail(message) => Err(StepError::RetryExhausted {
                label: self.name.clone(),
                attempts: 1,
                last: ToolError::invalid_output(message),
            }),
            Script::MissingInput(key) => Err(StepError::missing_input(&self.name, key)),
        }
    }
}
