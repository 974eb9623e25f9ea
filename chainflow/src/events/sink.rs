//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

use super::{Event, EventKind};

/// Receives lifecycle events.
///
/// Emitting never fails; a sink that cannot deliver an event logs and drops
/// it.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits one event.
    async fn emit(&self, event: Event);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: Event) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: Event) {
        let step_id = event.step_id.map(|id| id.to_string());
        let failure = matches!(event.kind, EventKind::StepFailed | EventKind::PipelineFailed);
        if failure {
            warn!(
                event_type = %event.kind,
                pipeline_id = %event.pipeline_id,
                step_id = step_id.as_deref(),
                step_name = event.step_name.as_deref(),
                detail = event.detail.as_deref(),
                "Event: {}", event.kind
            );
        } else if self.level == Level::DEBUG {
            debug!(
                event_type = %event.kind,
                pipeline_id = %event.pipeline_id,
                step_id = step_id.as_deref(),
                step_name = event.step_name.as_deref(),
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = %event.kind,
                pipeline_id = %event.pipeline_id,
                step_id = step_id.as_deref(),
                step_name = event.step_name.as_deref(),
                "Event: {}", event.kind
            );
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<Event>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Returns the kinds of the events of one pipeline, in emission order.
    #[must_use]
    pub fn kinds(&self, pipeline_id: Uuid) -> Vec<EventKind> {
        self.events
            .read()
            .iter()
            .filter(|e| e.pipeline_id == pipeline_id)
            .map(|e| e.kind)
            .collect()
    }

    /// Returns the events of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: EventKind) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: Event) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collecting_sink_groups_by_pipeline() {
        let sink = CollectingEventSink::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        sink.emit(Event::pipeline(EventKind::PipelineStarted, first)).await;
        sink.emit(Event::pipeline(EventKind::PipelineStarted, second)).await;
        sink.emit(Event::step(EventKind::StepStarted, first, Uuid::new_v4(), "A")).await;

        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.kinds(first),
            vec![EventKind::PipelineStarted, EventKind::StepStarted]
        );
        assert_eq!(sink.of_kind(EventKind::PipelineStarted).len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_logging_and_noop_sinks_accept_events() {
        let event = Event::pipeline(EventKind::PipelineFailed, Uuid::new_v4()).with_detail("boom");
        LoggingEventSink::default().emit(event.clone()).await;
        LoggingEventSink::debug().emit(event.clone()).await;
        NoOpEventSink.emit(event).await;
    }
}
