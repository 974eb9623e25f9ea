//! End-to-end behavior of registration, dispatch and the watchdog over
//! scripted adapters and a hand-drained queue.

use chainflow::adapters::config::object;
use chainflow::core::{InputMapping, OutputMap, PipelineStatus, StepStatus};
use chainflow::dispatcher::DispatchOutcome;
use chainflow::errors::{ChainflowError, DispatchError, OrderError, RegistrationError};
use chainflow::events::EventKind;
use chainflow::registration::{PipelineDefinition, StepDefinition};
use chainflow::store::StateStore;
use chainflow::testing::{scripted_catalog, scripted_catalog_with, ScriptedAdapter, TestEngine};
use chainflow::watchdog::Watchdog;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn definition(names: &[&str]) -> PipelineDefinition {
    PipelineDefinition::new("flow", names.iter().map(|n| StepDefinition::new(*n)).collect())
}

fn engine(names: &[&str]) -> (TestEngine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (TestEngine::new(scripted_catalog(names), dir.path()), dir)
}

#[tokio::test]
async fn test_non_contiguous_selection_is_rejected() {
    let (engine, _dir) = engine(&["A", "B", "C", "D"]);

    let err = engine.register(definition(&["A", "C"])).unwrap_err();
    assert!(matches!(
        err,
        ChainflowError::Registration(RegistrationError::Order(OrderError::NonContiguous { .. }))
    ));

    let err = engine.register(definition(&["B", "Z"])).unwrap_err();
    assert!(matches!(
        err,
        ChainflowError::Registration(RegistrationError::Order(OrderError::UnknownStep { .. }))
    ));
}

#[tokio::test]
async fn test_selection_order_does_not_matter() {
    let (engine, _dir) = engine(&["A", "B", "C", "D"]);
    let id = engine.register(definition(&["D", "B", "C"])).unwrap();

    engine.start(id).await.unwrap();
    engine.drain().await;

    assert_eq!(engine.enqueued_steps(), vec!["B", "C", "D"]);
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Completed);
}

#[tokio::test]
async fn test_subchain_completes_and_leaves_rest_untouched() {
    let (engine, _dir) = engine(&["A", "B", "C"]);
    let id = engine.register(definition(&["A", "B"])).unwrap();

    engine.start(id).await.unwrap();
    let outcomes = engine.drain().await;

    assert!(matches!(outcomes.last(), Some(Ok(DispatchOutcome::Completed))));
    let snapshot = engine.snapshot(id);
    assert_eq!(snapshot.steps.len(), 2);
    assert!(snapshot.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(snapshot.pipeline.end_time.is_some());
    assert!(engine.run_directory(id).is_dir());
}

#[tokio::test]
async fn test_only_one_step_runs_at_a_time() {
    let (engine, _dir) = engine(&["A", "B", "C", "D"]);
    let id = engine.register(definition(&["A", "B", "C", "D"])).unwrap();

    engine.start(id).await.unwrap();
    engine.drain().await;

    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Completed);
    assert_eq!(engine.store.max_running_observed(id), 1);
}

#[tokio::test]
async fn test_mapped_keys_reach_downstream_step() {
    let a = Arc::new(ScriptedAdapter::succeeding("A", object(json!({"x": 42, "y": 7}))));
    let b = Arc::new(ScriptedAdapter::succeeding("B", OutputMap::new()));
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::new(scripted_catalog_with(vec![a, b.clone()]), dir.path());

    let mapping: InputMapping = [("x".to_string(), "A".to_string())].into();
    let id = engine
        .register(PipelineDefinition::new(
            "flow",
            vec![
                StepDefinition::new("A"),
                StepDefinition::new("B").with_input_mapping(mapping),
            ],
        ))
        .unwrap();

    engine.start(id).await.unwrap();
    engine.drain().await;

    let input = b.last_input().unwrap();
    assert_eq!(input.get("x"), Some(&json!(42)));
    assert!(input.get("y").is_none());
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Completed);
}

#[tokio::test]
async fn test_first_step_receives_input_files() {
    let a = Arc::new(ScriptedAdapter::succeeding("A", OutputMap::new()));
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::new(scripted_catalog_with(vec![a.clone()]), dir.path());

    let id = engine
        .register(PipelineDefinition::new(
            "flow",
            vec![StepDefinition::new("A").with_input_files(object(json!({"srr_list": "ids.txt"})))],
        ))
        .unwrap();
    engine.start(id).await.unwrap();
    engine.drain().await;

    let input = a.last_input().unwrap();
    assert_eq!(input.get("srr_list"), Some(&json!("ids.txt")));
    assert!(input.contains_key(chainflow::adapters::RUN_DIRECTORY_KEY));
}

#[tokio::test]
async fn test_failure_halts_chain() {
    let a = Arc::new(ScriptedAdapter::succeeding("A", OutputMap::new()));
    let b = Arc::new(ScriptedAdapter::failing("B", "tool exited 1"));
    let c = Arc::new(ScriptedAdapter::succeeding("C", OutputMap::new()));
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::new(scripted_catalog_with(vec![a, b, c.clone()]), dir.path());
    let id = engine.register(definition(&["A", "B", "C"])).unwrap();

    engine.start(id).await.unwrap();
    let outcomes = engine.drain().await;

    assert!(matches!(
        outcomes.last(),
        Some(Err(DispatchError::Step { step_name, .. })) if step_name == "B"
    ));
    let snapshot = engine.snapshot(id);
    assert_eq!(snapshot.pipeline.status, PipelineStatus::Failed);
    assert_eq!(snapshot.step_status("A"), Some(StepStatus::Completed));
    assert_eq!(snapshot.step_status("B"), Some(StepStatus::Failed));
    assert_eq!(snapshot.step_status("C"), Some(StepStatus::Pending));
    assert_eq!(c.call_count(), 0);
    assert_eq!(engine.enqueued_steps(), vec!["A", "B"]);
}

#[tokio::test]
async fn test_restarted_failed_pipeline_fails_again() {
    let a = Arc::new(ScriptedAdapter::failing("A", "bad"));
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::new(scripted_catalog_with(vec![a.clone()]), dir.path());
    let id = engine.register(definition(&["A"])).unwrap();

    engine.start(id).await.unwrap();
    engine.drain().await;
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Failed);

    assert_ok!(engine.start(id).await);
    let outcomes = engine.drain().await;

    assert!(matches!(
        outcomes.as_slice(),
        [Ok(DispatchOutcome::Failed { step_name })] if step_name == "A"
    ));
    assert_eq!(a.call_count(), 1);
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Failed);
}

#[tokio::test]
async fn test_duplicate_delivery_runs_step_once() {
    let a = Arc::new(ScriptedAdapter::succeeding("A", object(json!({"out": "a.txt"}))));
    let b = Arc::new(ScriptedAdapter::succeeding("B", OutputMap::new()));
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::new(scripted_catalog_with(vec![a.clone(), b]), dir.path());
    let id = engine.register(definition(&["A", "B"])).unwrap();

    engine.start(id).await.unwrap();
    engine.step().await.unwrap().unwrap();
    let execute_a = engine.queue.pop().unwrap();

    let first = engine.dispatcher.handle(execute_a.clone()).await.unwrap();
    assert!(matches!(first, DispatchOutcome::Enqueued { ref step_name, .. } if step_name == "B"));
    let second = engine.dispatcher.handle(execute_a).await.unwrap();
    assert!(matches!(second, DispatchOutcome::AlreadyClaimed { .. }));

    assert_eq!(a.call_count(), 1);
    let snapshot = engine.snapshot(id);
    assert_eq!(snapshot.steps[0].results, Some(object(json!({"out": "a.txt"}))));
}

#[tokio::test]
async fn test_completed_pipeline_cannot_start() {
    let (engine, _dir) = engine(&["A"]);
    let id = engine.register(definition(&["A"])).unwrap();

    assert_ok!(engine.start(id).await);
    engine.drain().await;

    let err = assert_err!(engine.start(id).await);
    assert!(matches!(err, DispatchError::InvalidState { .. }));
}

#[tokio::test]
async fn test_pause_then_resume() {
    let a = Arc::new(ScriptedAdapter::succeeding("A", OutputMap::new()));
    let b = Arc::new(ScriptedAdapter::succeeding("B", OutputMap::new()));
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::new(scripted_catalog_with(vec![a.clone(), b.clone()]), dir.path());
    let id = engine.register(definition(&["A", "B"])).unwrap();

    engine.start(id).await.unwrap();
    engine.step().await.unwrap().unwrap();
    engine.dispatcher.pause_pipeline(id).await.unwrap();

    let outcomes = engine.drain().await;
    assert!(matches!(outcomes.as_slice(), [Ok(DispatchOutcome::Paused)]));
    assert_eq!(a.call_count(), 0);
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Paused);

    engine.start(id).await.unwrap();
    engine.drain().await;

    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 1);
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Completed);
    assert_eq!(
        engine.events.kinds(id),
        vec![
            EventKind::PipelineStarted,
            EventKind::PipelinePaused,
            EventKind::PipelineStarted,
            EventKind::StepStarted,
            EventKind::StepCompleted,
            EventKind::StepStarted,
            EventKind::StepCompleted,
            EventKind::PipelineCompleted,
        ]
    );
}

#[tokio::test]
async fn test_run_next_pending_step_enqueues_single_step() {
    let (engine, _dir) = engine(&["A", "B"]);
    let id = engine.register(definition(&["A", "B"])).unwrap();

    let outcome = engine
        .dispatcher
        .run_next_pending_step(id, &engine.run_directory(id))
        .await
        .unwrap();

    assert!(matches!(outcome, DispatchOutcome::Enqueued { ref step_name, .. } if step_name == "A"));
    assert_eq!(engine.queue.len(), 1);
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Running);
}

#[tokio::test]
async fn test_reclaimed_step_runs_after_restart() {
    let a = Arc::new(ScriptedAdapter::succeeding("A", OutputMap::new()));
    let dir = tempfile::tempdir().unwrap();
    let engine = TestEngine::new(scripted_catalog_with(vec![a.clone()]), dir.path());
    let id = engine.register(definition(&["A"])).unwrap();

    engine.start(id).await.unwrap();
    engine.step().await.unwrap().unwrap();
    // The worker holding this message dies after claiming the step.
    engine.queue.pop().unwrap();
    let step_id = engine.snapshot(id).steps[0].id;
    let now = Utc::now();
    assert!(engine
        .store
        .claim_step(step_id, now, now - chrono::Duration::seconds(1))
        .await
        .unwrap());

    let watchdog = Watchdog::new(Arc::new(engine.store.clone()), 3).with_events(engine.events.clone());
    let report = watchdog.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.reclaimed, vec![step_id]);
    assert_eq!(engine.snapshot(id).pipeline.status, PipelineStatus::Paused);

    engine.start(id).await.unwrap();
    engine.drain().await;

    let snapshot = engine.snapshot(id);
    assert_eq!(snapshot.pipeline.status, PipelineStatus::Completed);
    assert_eq!(snapshot.steps[0].reclaim_count, 1);
    assert_eq!(a.call_count(), 1);
}
