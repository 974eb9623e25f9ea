//! The pipeline dispatcher.
//!
//! Each queue message advances a pipeline by at most one step. After a step
//! completes, the next one is enqueued as a fresh message rather than run in
//! a loop, so every transition is persisted before the next begins.
//!
//! Pipeline: `pending -> running -> {completed, failed}`, `running <-> paused`.
//! Step: `pending -> running -> {completed, failed}`.

mod heartbeat;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{RUN_DIRECTORY_KEY, STEP_ID_KEY};
use crate::catalog::StepCatalog;
use crate::core::{Payload, PipelineStatus, PipelineSummary, Step, StepStatus};
use crate::errors::{DispatchError, StoreError};
use crate::events::{Event, EventKind, EventSink, LoggingEventSink};
use crate::order::validate_and_order;
use crate::queue::{TaskHandler, TaskId, TaskMessage, TaskQueue};
use crate::resolver::resolve_inputs;
use crate::store::StateStore;

pub use heartbeat::DispatcherSettings;
pub(crate) use heartbeat::lease_deadline;
use heartbeat::Heartbeat;

/// What handling one message led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The next step was enqueued.
    Enqueued {
        /// Step that will run next.
        step_name: String,
        /// Queue identity of the message.
        task_id: TaskId,
    },
    /// No pending step remained; the pipeline is completed.
    Completed,
    /// A failed step was found; the pipeline is failed.
    Failed {
        /// The failed step.
        step_name: String,
    },
    /// The pipeline is paused; nothing was enqueued.
    Paused,
    /// Another delivery already owns the step.
    AlreadyClaimed {
        /// The step owned elsewhere.
        step_id: Uuid,
    },
}

/// Advances pipelines one step per message.
#[derive(Clone)]
pub struct Dispatcher {
    catalog: Arc<StepCatalog>,
    store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
    events: Arc<dyn EventSink>,
    settings: DispatcherSettings,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("catalog", &self.catalog)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher logging events through `tracing`.
    #[must_use]
    pub fn new(catalog: Arc<StepCatalog>, store: Arc<dyn StateStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            catalog,
            store,
            queue,
            events: Arc::new(LoggingEventSink::default()),
            settings: DispatcherSettings::default(),
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the lease settings.
    #[must_use]
    pub fn with_settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &StepCatalog {
        &self.catalog
    }

    /// Starts or resumes a pipeline.
    ///
    /// Validates the step order, creates the run directory, marks the
    /// pipeline `running` and enqueues `execute_pipeline`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidState`] unless the pipeline is
    /// pending, paused or failed, and [`DispatchError::Order`] after marking
    /// the pipeline failed for an invalid step set.
    pub async fn start_pipeline(&self, pipeline_id: Uuid, run_directory: &Path) -> Result<TaskId, DispatchError> {
        let summary = self.summary(pipeline_id).await?;
        if !summary.status.is_startable() {
            return Err(DispatchError::invalid_state(
                pipeline_id,
                summary.status,
                "only pending, paused or failed pipelines can be started",
            ));
        }
        self.ordered_steps(&summary).await?;

        tokio::fs::create_dir_all(run_directory).await?;
        self.store
            .update_pipeline_status(pipeline_id, PipelineStatus::Running)
            .await?;
        info!(%pipeline_id, from = %summary.status, run_directory = %run_directory.display(), "Pipeline started");
        self.emit(Event::pipeline(EventKind::PipelineStarted, pipeline_id)).await;

        let task_id = self
            .queue
            .send(TaskMessage::ExecutePipeline {
                pipeline_id,
                run_directory: run_directory.to_path_buf(),
            })
            .await?;
        Ok(task_id)
    }

    /// Pauses a running pipeline.
    ///
    /// A step already running is not interrupted; once it completes no
    /// further step is enqueued until [`Self::start_pipeline`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidState`] unless the pipeline is running.
    pub async fn pause_pipeline(&self, pipeline_id: Uuid) -> Result<(), DispatchError> {
        let summary = self.summary(pipeline_id).await?;
        if summary.status != PipelineStatus::Running {
            return Err(DispatchError::invalid_state(
                pipeline_id,
                summary.status,
                "only running pipelines can be paused",
            ));
        }
        self.store
            .update_pipeline_status(pipeline_id, PipelineStatus::Paused)
            .await?;
        info!(%pipeline_id, "Pipeline paused");
        self.emit(Event::pipeline(EventKind::PipelinePaused, pipeline_id)).await;
        Ok(())
    }

    /// Enqueues only the next pending step, or marks the pipeline terminal.
    ///
    /// A pending or paused pipeline is moved to `running` first.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidState`] for completed or failed
    /// pipelines.
    pub async fn run_next_pending_step(
        &self,
        pipeline_id: Uuid,
        run_directory: &Path,
    ) -> Result<DispatchOutcome, DispatchError> {
        let summary = self.summary(pipeline_id).await?;
        if summary.status.is_terminal() {
            return Err(DispatchError::invalid_state(
                pipeline_id,
                summary.status,
                "pipeline already finished",
            ));
        }
        if summary.status != PipelineStatus::Running {
            self.ordered_steps(&summary).await?;
            tokio::fs::create_dir_all(run_directory).await?;
            self.store
                .update_pipeline_status(pipeline_id, PipelineStatus::Running)
                .await?;
            info!(%pipeline_id, from = %summary.status, "Pipeline started for a single step");
            self.emit(Event::pipeline(EventKind::PipelineStarted, pipeline_id)).await;
        }
        let summary = PipelineSummary {
            status: PipelineStatus::Running,
            ..summary
        };
        self.advance(&summary, run_directory).await
    }

    /// Handles one queue message.
    ///
    /// # Errors
    ///
    /// Step, order and adapter-binding errors are returned after the
    /// terminal status was written. Store and queue errors are returned as
    /// they occur so that the queue can redeliver.
    pub async fn handle(&self, message: TaskMessage) -> Result<DispatchOutcome, DispatchError> {
        match message {
            TaskMessage::ExecutePipeline {
                pipeline_id,
                run_directory,
            } => {
                let summary = self.summary(pipeline_id).await?;
                if let Some(outcome) = Self::check_running(&summary)? {
                    return Ok(outcome);
                }
                self.advance(&summary, &run_directory).await
            }
            TaskMessage::ExecuteStep {
                pipeline_id,
                step_id,
                step_name,
                input_data,
                run_directory,
                ..
            } => {
                self.execute_step(pipeline_id, step_id, &step_name, input_data, run_directory)
                    .await
            }
        }
    }

    async fn execute_step(
        &self,
        pipeline_id: Uuid,
        step_id: Uuid,
        step_name: &str,
        input_data: Payload,
        run_directory: PathBuf,
    ) -> Result<DispatchOutcome, DispatchError> {
        let summary = self.summary(pipeline_id).await?;
        if let Some(outcome) = Self::check_running(&summary)? {
            return Ok(outcome);
        }

        let steps = self.ordered_steps(&summary).await?;
        if let Some(failed) = steps.iter().find(|s| s.status == StepStatus::Failed) {
            return self.halt_on_failed(&summary, failed).await;
        }
        let next_pending = steps
            .iter()
            .find(|s| s.status == StepStatus::Pending)
            .map(|s| (s.id, s.name.clone()));
        let step = steps
            .into_iter()
            .find(|s| s.id == step_id)
            .ok_or(StoreError::StepNotFound(step_id))?;
        if step.name != step_name {
            return Err(DispatchError::invalid_state(
                pipeline_id,
                summary.status,
                format!("message names step '{step_name}' but {step_id} is '{}'", step.name),
            ));
        }
        if step.status == StepStatus::Pending {
            if let Some((next_id, next_name)) = next_pending.filter(|(id, _)| *id != step.id) {
                warn!(%pipeline_id, %step_id, step_name = %step.name, next = %next_name, "Out-of-turn step message");
                return Err(DispatchError::invalid_state(
                    pipeline_id,
                    summary.status,
                    format!("step '{}' is not next; '{next_name}' ({next_id}) is", step.name),
                ));
            }
        }

        let Some(adapter) = self.catalog.adapter(&step.name) else {
            error!(%pipeline_id, %step_id, step_name = %step.name, "No adapter bound to step");
            self.store
                .update_step_status(step.id, StepStatus::Failed, None, Some(Utc::now()))
                .await?;
            self.emit(
                Event::step(EventKind::StepFailed, pipeline_id, step.id, &step.name)
                    .with_detail("no adapter bound"),
            )
            .await;
            self.fail_pipeline(pipeline_id, "no adapter bound").await?;
            return Err(DispatchError::UnknownAdapter(step.name));
        };

        let started_at = Utc::now();
        let claimed = self
            .store
            .claim_step(step.id, started_at, lease_deadline(started_at, self.settings.lease))
            .await?;
        if !claimed {
            info!(%pipeline_id, %step_id, step_name = %step.name, "Step already claimed, skipping delivery");
            return Ok(DispatchOutcome::AlreadyClaimed { step_id });
        }
        info!(%pipeline_id, %step_id, step_name = %step.name, "Step running");
        self.emit(Event::step(EventKind::StepStarted, pipeline_id, step.id, &step.name)).await;

        let mut input = resolve_inputs(&step, self.store.as_ref()).await?;
        for (key, value) in input_data {
            input.entry(key).or_insert(value);
        }
        input.insert(
            RUN_DIRECTORY_KEY.to_string(),
            Value::String(run_directory.to_string_lossy().into_owned()),
        );
        input.insert(STEP_ID_KEY.to_string(), Value::String(step.id.to_string()));

        let result = {
            let _heartbeat = Heartbeat::spawn(Arc::clone(&self.store), step.id, self.settings);
            adapter.execute(&step.parameters, &input).await
        };

        match result {
            Ok(output) => {
                let keys: Vec<&String> = output.keys().collect();
                debug!(%step_id, output_keys = ?keys, "Recording step results");
                self.store.update_step_results(step.id, output).await?;
                self.store
                    .update_step_status(step.id, StepStatus::Completed, None, Some(Utc::now()))
                    .await?;
                info!(%pipeline_id, %step_id, step_name = %step.name, "Step completed");
                self.emit(Event::step(EventKind::StepCompleted, pipeline_id, step.id, &step.name))
                    .await;

                let summary = self.summary(pipeline_id).await?;
                if let Some(outcome) = Self::check_running(&summary)? {
                    return Ok(outcome);
                }
                self.advance(&summary, &run_directory).await
            }
            Err(source) => {
                error!(%pipeline_id, %step_id, step_name = %step.name, error = %source, "Step failed");
                self.store
                    .update_step_status(step.id, StepStatus::Failed, None, Some(Utc::now()))
                    .await?;
                self.emit(
                    Event::step(EventKind::StepFailed, pipeline_id, step.id, &step.name)
                        .with_detail(source.to_string()),
                )
                .await;
                self.fail_pipeline(pipeline_id, &format!("step '{}' failed", step.name))
                    .await?;
                Err(DispatchError::Step {
                    step_name: step.name,
                    source,
                })
            }
        }
    }

    /// Selects the next step of a running pipeline and enqueues it.
    async fn advance(&self, summary: &PipelineSummary, run_directory: &Path) -> Result<DispatchOutcome, DispatchError> {
        let pipeline_id = summary.id;
        let steps = self.ordered_steps(summary).await?;

        if let Some(failed) = steps.iter().find(|s| s.status == StepStatus::Failed) {
            return self.halt_on_failed(summary, failed).await;
        }
        if let Some(running) = steps.iter().find(|s| s.status == StepStatus::Running) {
            debug!(%pipeline_id, step_id = %running.id, "A step is still running, not advancing");
            return Ok(DispatchOutcome::AlreadyClaimed { step_id: running.id });
        }

        let Some(next) = steps.into_iter().find(|s| s.status == StepStatus::Pending) else {
            self.store
                .update_pipeline_status(pipeline_id, PipelineStatus::Completed)
                .await?;
            info!(%pipeline_id, "Pipeline completed");
            self.emit(Event::pipeline(EventKind::PipelineCompleted, pipeline_id)).await;
            return Ok(DispatchOutcome::Completed);
        };

        let task_id = self
            .queue
            .send(TaskMessage::ExecuteStep {
                pipeline_id,
                step_id: next.id,
                step_name: next.name.clone(),
                parameters: next.parameters,
                input_data: next.input_files,
                run_directory: run_directory.to_path_buf(),
            })
            .await?;
        info!(%pipeline_id, step_id = %next.id, step_name = %next.name, %task_id, "Step enqueued");
        Ok(DispatchOutcome::Enqueued {
            step_name: next.name,
            task_id,
        })
    }

    /// Returns `Paused` for a paused pipeline and rejects any other status
    /// except `running`.
    fn check_running(summary: &PipelineSummary) -> Result<Option<DispatchOutcome>, DispatchError> {
        match summary.status {
            PipelineStatus::Running => Ok(None),
            PipelineStatus::Paused => {
                debug!(pipeline_id = %summary.id, "Pipeline paused, not advancing");
                Ok(Some(DispatchOutcome::Paused))
            }
            status => Err(DispatchError::invalid_state(
                summary.id,
                status,
                "pipeline is not running",
            )),
        }
    }

    /// Loads the steps and re-runs the order policy, failing the pipeline on
    /// a violation.
    async fn ordered_steps(&self, summary: &PipelineSummary) -> Result<Vec<Step>, DispatchError> {
        let steps = self.store.get_steps(summary.id).await?;
        match validate_and_order(self.catalog.order(), &steps) {
            Ok(ordered) => Ok(ordered),
            Err(e) => {
                error!(pipeline_id = %summary.id, error = %e, "Step order violation");
                self.fail_pipeline(summary.id, &e.to_string()).await?;
                Err(DispatchError::Order(e))
            }
        }
    }

    async fn halt_on_failed(&self, summary: &PipelineSummary, failed: &Step) -> Result<DispatchOutcome, DispatchError> {
        warn!(pipeline_id = %summary.id, step_name = %failed.name, "Failed step present, halting chain");
        self.fail_pipeline(summary.id, &format!("step '{}' failed", failed.name))
            .await?;
        Ok(DispatchOutcome::Failed {
            step_name: failed.name.clone(),
        })
    }

    async fn fail_pipeline(&self, pipeline_id: Uuid, reason: &str) -> Result<(), DispatchError> {
        let current = self.store.get_pipeline_minimal(pipeline_id).await?.status;
        if current == PipelineStatus::Failed {
            return Ok(());
        }
        self.store
            .update_pipeline_status(pipeline_id, PipelineStatus::Failed)
            .await?;
        info!(%pipeline_id, from = %current, reason, "Pipeline failed");
        self.emit(Event::pipeline(EventKind::PipelineFailed, pipeline_id).with_detail(reason))
            .await;
        Ok(())
    }

    async fn summary(&self, pipeline_id: Uuid) -> Result<PipelineSummary, DispatchError> {
        self.store
            .get_pipeline_minimal(pipeline_id)
            .await
            .map_err(|e| match e {
                StoreError::PipelineNotFound(id) => DispatchError::PipelineNotFound(id),
                other => DispatchError::Store(other),
            })
    }

    async fn emit(&self, event: Event) {
        self.events.emit(event).await;
    }
}

#[async_trait]
impl TaskHandler for Dispatcher {
    type Outcome = DispatchOutcome;
    type Error = DispatchError;

    async fn handle(&self, message: TaskMessage) -> Result<DispatchOutcome, DispatchError> {
        Dispatcher::handle(self, message).await
    }
}
