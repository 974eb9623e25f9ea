//! Lease watchdog.
//!
//! A worker that dies mid-step leaves its step `running` forever. The
//! watchdog reclaims steps whose lease expired and pauses their pipeline, so
//! an operator must call `start_pipeline` to resume. A step reclaimed more
//! than `max_reclaims` times is failed instead.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::{PipelineStatus, StepStatus, Timestamp};
use crate::events::{Event, EventKind, EventSink, LoggingEventSink};
use crate::shutdown::Shutdown;
use crate::store::{StateStore, StoreResult};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Steps moved back to `pending`.
    pub reclaimed: Vec<uuid::Uuid>,
    /// Steps failed for exceeding the reclaim limit.
    pub failed: Vec<uuid::Uuid>,
}

impl SweepReport {
    /// Returns true if nothing was touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty() && self.failed.is_empty()
    }
}

/// Reclaims running steps with an expired lease.
#[derive(Clone)]
pub struct Watchdog {
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    max_reclaims: u32,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("max_reclaims", &self.max_reclaims)
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    /// Creates a watchdog.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, max_reclaims: u32) -> Self {
        Self {
            store,
            events: Arc::new(LoggingEventSink::default()),
            max_reclaims,
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Runs one sweep at `now`.
    ///
    /// # Errors
    ///
    /// Propagates store errors; steps handled before the error stay handled.
    pub async fn sweep(&self, now: Timestamp) -> StoreResult<SweepReport> {
        let mut report = SweepReport::default();

        for step in self.store.list_running_steps().await? {
            let Some(lease) = step.lease_expires_at else {
                continue;
            };
            if lease > now {
                continue;
            }

            let pipeline_id = step.pipeline_id;
            let pipeline = self.store.get_pipeline_minimal(pipeline_id).await?;

            if step.reclaim_count >= self.max_reclaims {
                error!(
                    %pipeline_id,
                    step_id = %step.id,
                    step_name = %step.name,
                    reclaims = step.reclaim_count,
                    "Lease expired too many times, failing step"
                );
                self.store
                    .update_step_status(step.id, StepStatus::Failed, None, Some(now))
                    .await?;
                self.events
                    .emit(
                        Event::step(EventKind::StepFailed, pipeline_id, step.id, &step.name)
                            .with_detail("lease expired too many times"),
                    )
                    .await;
                if pipeline.status != PipelineStatus::Failed {
                    self.store
                        .update_pipeline_status(pipeline_id, PipelineStatus::Failed)
                        .await?;
                    self.events
                        .emit(Event::pipeline(EventKind::PipelineFailed, pipeline_id).with_detail("lease expired"))
                        .await;
                }
                report.failed.push(step.id);
                continue;
            }

            let count = self.store.reclaim_step(step.id).await?;
            warn!(
                %pipeline_id,
                step_id = %step.id,
                step_name = %step.name,
                reclaims = count,
                lease_expired_at = %lease,
                "Reclaimed step with expired lease"
            );
            self.events
                .emit(Event::step(EventKind::StepReclaimed, pipeline_id, step.id, &step.name))
                .await;

            if pipeline.status == PipelineStatus::Running {
                self.store
                    .update_pipeline_status(pipeline_id, PipelineStatus::Paused)
                    .await?;
                info!(%pipeline_id, "Pipeline paused until restarted");
                self.events
                    .emit(Event::pipeline(EventKind::PipelinePaused, pipeline_id))
                    .await;
            }
            report.reclaimed.push(step.id);
        }

        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` fires.
    pub async fn run(self, interval: Duration, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    debug!("Watchdog stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) if !report.is_empty() => {
                            info!(reclaimed = report.reclaimed.len(), failed = report.failed.len(), "Watchdog sweep");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Watchdog sweep failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Pipeline, Step};
    use crate::events::CollectingEventSink;
    use crate::store::InMemoryStateStore;

    async fn running_pipeline(store: &InMemoryStateStore, lease: Timestamp) -> (uuid::Uuid, uuid::Uuid) {
        let pipeline = Pipeline::new("p");
        let step = Step::new(pipeline.id, "A", 0);
        let ids = (pipeline.id, step.id);
        store.insert_pipeline(pipeline, vec![step]);
        store
            .update_pipeline_status(ids.0, PipelineStatus::Running)
            .await
            .unwrap();
        assert!(store.claim_step(ids.1, Utc::now(), lease).await.unwrap());
        ids
    }

    #[tokio::test]
    async fn test_live_lease_is_left_alone() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        let (pipeline_id, _) = running_pipeline(&store, now + chrono::Duration::minutes(5)).await;

        let watchdog = Watchdog::new(Arc::new(store.clone()), 3);
        assert!(watchdog.sweep(now).await.unwrap().is_empty());
        assert_eq!(store.snapshot(pipeline_id).unwrap().running_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_reclaims_and_pauses() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        let (pipeline_id, step_id) = running_pipeline(&store, now - chrono::Duration::seconds(1)).await;
        let events = Arc::new(CollectingEventSink::new());

        let watchdog = Watchdog::new(Arc::new(store.clone()), 3).with_events(events.clone());
        let report = watchdog.sweep(now).await.unwrap();

        assert_eq!(report.reclaimed, vec![step_id]);
        let snapshot = store.snapshot(pipeline_id).unwrap();
        assert_eq!(snapshot.pipeline.status, PipelineStatus::Paused);
        assert_eq!(snapshot.steps[0].status, StepStatus::Pending);
        assert_eq!(snapshot.steps[0].reclaim_count, 1);
        assert_eq!(
            events.kinds(pipeline_id),
            vec![EventKind::StepReclaimed, EventKind::PipelinePaused]
        );
    }

    #[tokio::test]
    async fn test_reclaim_limit_fails_step() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        let (pipeline_id, step_id) = running_pipeline(&store, now - chrono::Duration::seconds(1)).await;

        let watchdog = Watchdog::new(Arc::new(store.clone()), 0);
        let report = watchdog.sweep(now).await.unwrap();

        assert_eq!(report.failed, vec![step_id]);
        let snapshot = store.snapshot(pipeline_id).unwrap();
        assert_eq!(snapshot.pipeline.status, PipelineStatus::Failed);
        assert_eq!(snapshot.steps[0].status, StepStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = InMemoryStateStore::new();
        let watchdog = Watchdog::new(Arc::new(store), 3);
        let shutdown = Shutdown::new();
        let task = tokio::spawn(watchdog.run(Duration::from_secs(1), shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.request("test");
        task.await.unwrap();
    }
}
