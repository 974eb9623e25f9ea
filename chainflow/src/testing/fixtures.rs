//! Catalog builders, the engine harness and fake executables.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::ScriptedAdapter;
use crate::adapters::StepAdapter;
use crate::catalog::StepCatalog;
use crate::core::OutputMap;
use crate::dispatcher::{DispatchOutcome, Dispatcher, DispatcherSettings};
use crate::errors::{ChainflowError, DispatchError};
use crate::events::CollectingEventSink;
use crate::order::CanonicalOrder;
use crate::queue::{RecordingQueue, TaskMessage};
use crate::registration::{register, PipelineDefinition};
use crate::store::{InMemoryStateStore, PipelineSnapshot};

/// A catalog over `names` where every step succeeds with an empty output.
#[must_use]
pub fn scripted_catalog(names: &[&str]) -> StepCatalog {
    scripted_catalog_with(
        names
            .iter()
            .map(|name| Arc::new(ScriptedAdapter::succeeding(*name, OutputMap::new())))
            .collect(),
    )
}

/// A catalog whose canonical order is the adapters' names in the given order.
#[must_use]
pub fn scripted_catalog_with(adapters: Vec<Arc<ScriptedAdapter>>) -> StepCatalog {
    let order = CanonicalOrder::new(adapters.iter().map(|a| a.name().to_string()));
    adapters
        .into_iter()
        .fold(StepCatalog::new(order), |catalog, adapter| catalog.with_adapter(adapter))
}

/// Writes an executable `#!/bin/sh` script named `name` into `dir`.
///
/// # Panics
///
/// Panics if the file cannot be written.
#[cfg(unix)]
#[must_use]
pub fn fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bin = dir.join("bin");
    let path = bin.join(name);
    let written = std::fs::create_dir_all(&bin)
        .and_then(|()| std::fs::write(&path, format!("#!/bin/sh\n{script}\n")))
        .and_then(|()| std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)));
    if let Err(e) = written {
        panic!("cannot write fake tool {}: {e}", path.display());
    }
    path
}

/// Store, recording queue, collecting sink and dispatcher wired together.
///
/// Messages stay in the queue until [`TestEngine::drain`] or
/// [`TestEngine::step`] hands them to the dispatcher.
#[derive(Debug)]
pub struct TestEngine {
    /// The shared store.
    pub store: InMemoryStateStore,
    /// The queue the dispatcher sends to.
    pub queue: Arc<RecordingQueue>,
    /// Every emitted event.
    pub events: Arc<CollectingEventSink>,
    /// The dispatcher under test.
    pub dispatcher: Dispatcher,
    catalog: Arc<StepCatalog>,
    run_directory: PathBuf,
}

impl TestEngine {
    /// Wires an engine over `catalog`, placing runs under `run_directory`.
    #[must_use]
    pub fn new(catalog: StepCatalog, run_directory: impl Into<PathBuf>) -> Self {
        Self::with_settings(catalog, run_directory, DispatcherSettings::default())
    }

    /// Same as [`Self::new`] with explicit lease settings.
    #[must_use]
    pub fn with_settings(
        catalog: StepCatalog,
        run_directory: impl Into<PathBuf>,
        settings: DispatcherSettings,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let store = InMemoryStateStore::new();
        let queue = Arc::new(RecordingQueue::new());
        let events = Arc::new(CollectingEventSink::new());
        let dispatcher = Dispatcher::new(Arc::clone(&catalog), Arc::new(store.clone()), queue.clone())
            .with_events(events.clone())
            .with_settings(settings);
        Self {
            store,
            queue,
            events,
            dispatcher,
            catalog,
            run_directory: run_directory.into(),
        }
    }

    /// Registers `definition` and stores the records.
    ///
    /// # Errors
    ///
    /// Returns the registration error.
    pub fn register(&self, definition: PipelineDefinition) -> Result<Uuid, ChainflowError> {
        let (pipeline, steps) = register(definition, &self.catalog)?;
        let id = pipeline.id;
        self.store.insert_pipeline(pipeline, steps);
        Ok(id)
    }

    /// The run directory of `pipeline_id`.
    #[must_use]
    pub fn run_directory(&self, pipeline_id: Uuid) -> PathBuf {
        self.run_directory.join(pipeline_id.to_string())
    }

    /// Starts `pipeline_id` without handling any message.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher error.
    pub async fn start(&self, pipeline_id: Uuid) -> Result<(), DispatchError> {
        self.dispatcher
            .start_pipeline(pipeline_id, &self.run_directory(pipeline_id))
            .await
            .map(|_| ())
    }

    /// Handles the oldest queued message, if any.
    pub async fn step(&self) -> Option<Result<DispatchOutcome, DispatchError>> {
        let message = self.queue.pop()?;
        Some(self.dispatcher.handle(message).await)
    }

    /// Handles queued messages until the queue is empty.
    pub async fn drain(&self) -> Vec<Result<DispatchOutcome, DispatchError>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.step().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Returns the pipeline and its steps.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline is unknown.
    #[must_use]
    pub fn snapshot(&self, pipeline_id: Uuid) -> PipelineSnapshot {
        match self.store.snapshot(pipeline_id) {
            Some(snapshot) => snapshot,
            None => panic!("pipeline {pipeline_id} not in store"),
        }
    }

    /// Step names of every `execute_step` message ever sent.
    #[must_use]
    pub fn enqueued_steps(&self) -> Vec<String> {
        self.queue
            .sent()
            .iter()
            .filter_map(TaskMessage::step_name)
            .map(str::to_string)
            .collect()
    }

    /// Path helper relative to the engine's run root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.run_directory
    }
}
