//! In-memory state store.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::{StateStore, StoreResult};
use crate::core::{Payload, Pipeline, PipelineStatus, PipelineSummary, Step, StepStatus, Timestamp};
use crate::errors::StoreError;

/// A pipeline together with its ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    /// The pipeline record.
    pub pipeline: Pipeline,
    /// Steps ordered by position.
    pub steps: Vec<Step>,
}

impl PipelineSnapshot {
    /// Returns the status of the named step.
    #[must_use]
    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.status)
    }

    /// Returns how many steps are running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .count()
    }
}

#[derive(Debug, Default)]
struct Inner {
    pipelines: HashMap<Uuid, Pipeline>,
    steps: HashMap<Uuid, Step>,
    running_high_water: HashMap<Uuid, usize>,
}

impl Inner {
    fn steps_of(&self, pipeline_id: Uuid) -> Vec<Step> {
        let mut steps: Vec<Step> = self
            .steps
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.position);
        steps
    }

    fn running_in(&self, pipeline_id: Uuid) -> usize {
        self.steps
            .values()
            .filter(|s| s.pipeline_id == pipeline_id && s.status == StepStatus::Running)
            .count()
    }

    fn record_running(&mut self, pipeline_id: Uuid) {
        let running = self.running_in(pipeline_id);
        let mark = self.running_high_water.entry(pipeline_id).or_default();
        *mark = (*mark).max(running);
    }

    fn step_mut(&mut self, step_id: Uuid) -> StoreResult<&mut Step> {
        self.steps
            .get_mut(&step_id)
            .ok_or(StoreError::StepNotFound(step_id))
    }
}

/// A `StateStore` kept in process memory.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a registered pipeline and its steps.
    pub fn insert_pipeline(&self, pipeline: Pipeline, steps: Vec<Step>) {
        let mut inner = self.inner.lock();
        for step in steps {
            inner.steps.insert(step.id, step);
        }
        inner.pipelines.insert(pipeline.id, pipeline);
    }

    /// Returns the pipeline and its ordered steps.
    #[must_use]
    pub fn snapshot(&self, pipeline_id: Uuid) -> Option<PipelineSnapshot> {
        let inner = self.inner.lock();
        let pipeline = inner.pipelines.get(&pipeline_id)?.clone();
        Some(PipelineSnapshot {
            pipeline,
            steps: inner.steps_of(pipeline_id),
        })
    }

    /// Returns the largest number of simultaneously running steps ever
    /// observed for a pipeline.
    #[must_use]
    pub fn max_running_observed(&self, pipeline_id: Uuid) -> usize {
        self.inner
            .lock()
            .running_high_water
            .get(&pipeline_id)
            .copied()
            .unwrap_or(0)
    }

    /// Overwrites one step record as-is, bypassing the transition checks.
    pub fn put_step(&self, step: Step) {
        let mut inner = self.inner.lock();
        let pipeline_id = step.pipeline_id;
        inner.steps.insert(step.id, step);
        inner.record_running(pipeline_id);
    }

    /// Makes every operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_pipeline_minimal(&self, id: Uuid) -> StoreResult<PipelineSummary> {
        self.get_pipeline(id).await.map(|p| p.summary())
    }

    async fn get_pipeline(&self, id: Uuid) -> StoreResult<Pipeline> {
        self.check_available()?;
        self.inner
            .lock()
            .pipelines
            .get(&id)
            .cloned()
            .ok_or(StoreError::PipelineNotFound(id))
    }

    async fn get_steps(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>> {
        self.check_available()?;
        let inner = self.inner.lock();
        if !inner.pipelines.contains_key(&pipeline_id) {
            return Err(StoreError::PipelineNotFound(pipeline_id));
        }
        Ok(inner.steps_of(pipeline_id))
    }

    async fn get_step(&self, pipeline_id: Uuid, step_id: Uuid) -> StoreResult<Step> {
        self.check_available()?;
        self.inner
            .lock()
            .steps
            .get(&step_id)
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .ok_or(StoreError::StepNotFound(step_id))
    }

    async fn update_pipeline_status(&self, id: Uuid, status: PipelineStatus) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let pipeline = inner
            .pipelines
            .get_mut(&id)
            .ok_or(StoreError::PipelineNotFound(id))?;

        if pipeline.status == status {
            return Ok(());
        }
        if !pipeline.status.can_transition_to(status) {
            return Err(StoreError::pipeline_transition(id, pipeline.status, status));
        }

        let now = Utc::now();
        match status {
            PipelineStatus::Running => {
                pipeline.start_time = Some(now);
                pipeline.end_time = None;
            }
            PipelineStatus::Completed | PipelineStatus::Failed => pipeline.end_time = Some(now),
            PipelineStatus::Pending | PipelineStatus::Paused => {}
        }
        pipeline.status = status;
        Ok(())
    }

    async fn update_step_status(
        &self,
        step_id: Uuid,
        status: StepStatus,
        start_time: Option<Timestamp>,
        end_time: Option<Timestamp>,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let step = inner.step_mut(step_id)?;
        if !step.status.can_transition_to(status) {
            return Err(StoreError::step_transition(step_id, step.status, status));
        }

        step.status = status;
        if start_time.is_some() {
            step.start_time = start_time;
        }
        if end_time.is_some() {
            step.end_time = end_time;
        }
        if status.is_terminal() {
            step.lease_expires_at = None;
        }
        let pipeline_id = step.pipeline_id;
        inner.record_running(pipeline_id);
        Ok(())
    }

    async fn update_step_results(&self, step_id: Uuid, results: Payload) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let step = inner.step_mut(step_id)?;
        if step.results.is_some() || step.status != StepStatus::Running {
            return Err(StoreError::InvalidTransition {
                entity: format!("step {step_id}"),
                from: step.status.to_string(),
                to: "results".into(),
            });
        }
        step.results = Some(results);
        Ok(())
    }

    async fn get_step_output_by_name(
        &self,
        pipeline_id: Uuid,
        step_name: &str,
    ) -> StoreResult<Option<Payload>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .steps
            .values()
            .find(|s| s.pipeline_id == pipeline_id && s.name == step_name)
            .and_then(|s| s.results.clone()))
    }

    async fn claim_step(
        &self,
        step_id: Uuid,
        started_at: Timestamp,
        lease_until: Timestamp,
    ) -> StoreResult<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let (pipeline_id, status) = {
            let step = inner
                .steps
                .get(&step_id)
                .ok_or(StoreError::StepNotFound(step_id))?;
            (step.pipeline_id, step.status)
        };
        if status != StepStatus::Pending || inner.running_in(pipeline_id) > 0 {
            return Ok(false);
        }

        let step = inner.step_mut(step_id)?;
        step.status = StepStatus::Running;
        step.start_time = Some(started_at);
        step.end_time = None;
        step.lease_expires_at = Some(lease_until);
        inner.record_running(pipeline_id);
        Ok(true)
    }

    async fn heartbeat(&self, step_id: Uuid, lease_until: Timestamp) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let step = inner.step_mut(step_id)?;
        if step.status != StepStatus::Running {
            return Err(StoreError::InvalidTransition {
                entity: format!("step {step_id}"),
                from: step.status.to_string(),
                to: "heartbeat".into(),
            });
        }
        step.lease_expires_at = Some(lease_until);
        Ok(())
    }

    async fn list_running_steps(&self) -> StoreResult<Vec<Step>> {
        self.check_available()?;
        let inner = self.inner.lock();
        let mut running: Vec<Step> = inner
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Running)
            .cloned()
            .collect();
        running.sort_by_key(|s| (s.pipeline_id, s.position));
        Ok(running)
    }

    async fn reclaim_step(&self, step_id: Uuid) -> StoreResult<u32> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let step = inner.step_mut(step_id)?;
        if step.status != StepStatus::Running {
            return Err(StoreError::step_transition(
                step_id,
                step.status,
                StepStatus::Pending,
            ));
        }
        step.status = StepStatus::Pending;
        step.start_time = None;
        step.lease_expires_at = None;
        step.reclaim_count += 1;
        Ok(step.reclaim_count)
    }
}
