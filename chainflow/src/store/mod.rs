//! The pipeline/step state store boundary.
//!
//! The store is the single source of truth shared by every worker. All
//! mutations go through narrow single-purpose operations; the only
//! conditional update is [`StateStore::claim_step`].

mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{Payload, Pipeline, PipelineStatus, PipelineSummary, Step, StepStatus, Timestamp};
use crate::errors::StoreError;

pub use memory::{InMemoryStateStore, PipelineSnapshot};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations consumed by the engine.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns `{id, status}` of a pipeline.
    async fn get_pipeline_minimal(&self, id: Uuid) -> StoreResult<PipelineSummary>;

    /// Returns the full pipeline record.
    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Pipeline>;

    /// Returns the steps of a pipeline ordered by position.
    async fn get_steps(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>>;

    /// Returns one step of a pipeline.
    async fn get_step(&self, pipeline_id: Uuid, step_id: Uuid) -> StoreResult<Step>;

    /// Sets a pipeline status, stamping `start_time` on `running` and
    /// `end_time` on `completed`/`failed`.
    async fn update_pipeline_status(&self, id: Uuid, status: PipelineStatus) -> StoreResult<()>;

    /// Sets a step status and optionally its timestamps.
    async fn update_step_status(
        &self,
        step_id: Uuid,
        status: StepStatus,
        start_time: Option<Timestamp>,
        end_time: Option<Timestamp>,
    ) -> StoreResult<()>;

    /// Records the results map of a running step. Fails if already written.
    async fn update_step_results(&self, step_id: Uuid, results: Payload) -> StoreResult<()>;

    /// Returns the recorded results of the named step, if any.
    async fn get_step_output_by_name(
        &self,
        pipeline_id: Uuid,
        step_name: &str,
    ) -> StoreResult<Option<Payload>>;

    /// Atomically moves a step from `pending` to `running`.
    ///
    /// Returns `false` without changing anything when the step is not
    /// pending or another step of the same pipeline is already running.
    async fn claim_step(
        &self,
        step_id: Uuid,
        started_at: Timestamp,
        lease_until: Timestamp,
    ) -> StoreResult<bool>;

    /// Extends the lease of a running step.
    async fn heartbeat(&self, step_id: Uuid, lease_until: Timestamp) -> StoreResult<()>;

    /// Returns every running step across all pipelines.
    async fn list_running_steps(&self) -> StoreResult<Vec<Step>>;

    /// Moves a running step back to `pending`, clearing its start time and
    /// lease. Returns the incremented reclaim counter.
    async fn reclaim_step(&self, step_id: Uuid) -> StoreResult<u32>;
}
