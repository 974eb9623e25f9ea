//! Dispatcher driven by a channel queue and a background worker.

use chainflow::adapters::config::object;
use chainflow::catalog::StepCatalog;
use chainflow::core::{InputMapping, OutputMap, PipelineStatus};
use chainflow::dispatcher::Dispatcher;
use chainflow::queue::{ChannelQueue, Worker};
use chainflow::registration::{register, PipelineDefinition, StepDefinition};
use chainflow::shutdown::Shutdown;
use chainflow::store::InMemoryStateStore;
use chainflow::testing::{scripted_catalog_with, ScriptedAdapter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn wait_for(store: &InMemoryStateStore, pipeline_id: Uuid, status: PipelineStatus) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.snapshot(pipeline_id).map(|s| s.pipeline.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "pipeline never reached {status}");
}

fn catalog() -> (StepCatalog, Arc<ScriptedAdapter>) {
    let a = Arc::new(ScriptedAdapter::succeeding("A", object(json!({"bam": "a.bam"}))));
    let b = Arc::new(ScriptedAdapter::succeeding("B", object(json!({"ciri": "a.ciri"}))));
    let c = Arc::new(ScriptedAdapter::succeeding("C", OutputMap::new()));
    (scripted_catalog_with(vec![a, b, c.clone()]), c)
}

#[tokio::test]
async fn test_worker_runs_pipeline_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let (catalog, c) = catalog();
    let catalog = Arc::new(catalog);
    let store = InMemoryStateStore::new();

    let mapping: InputMapping = [("ciri".to_string(), "B".to_string())].into();
    let (pipeline, steps) = register(
        PipelineDefinition::new(
            "worker",
            vec![
                StepDefinition::new("A"),
                StepDefinition::new("B"),
                StepDefinition::new("C").with_input_mapping(mapping),
            ],
        ),
        &catalog,
    )
    .unwrap();
    let id = pipeline.id;
    store.insert_pipeline(pipeline, steps);

    let (queue, receiver) = ChannelQueue::new(8);
    let dispatcher = Arc::new(Dispatcher::new(catalog, Arc::new(store.clone()), Arc::new(queue)));
    let shutdown = Shutdown::new();
    let worker = tokio::spawn(Worker::new(receiver, Arc::clone(&dispatcher)).run(shutdown.clone()));

    dispatcher.start_pipeline(id, &dir.path().join("run")).await.unwrap();
    wait_for(&store, id, PipelineStatus::Completed).await;

    shutdown.request("done");
    // execute_pipeline plus one message per step
    assert_eq!(worker.await.unwrap(), 4);
    assert_eq!(c.last_input().unwrap().get("ciri"), Some(&json!("a.ciri")));
    assert_eq!(store.max_running_observed(id), 1);
}

#[tokio::test]
async fn test_worker_survives_failed_step() {
    let dir = tempfile::tempdir().unwrap();
    let a = Arc::new(ScriptedAdapter::failing("A", "exit 2"));
    let b = Arc::new(ScriptedAdapter::succeeding("B", OutputMap::new()));
    let catalog = Arc::new(scripted_catalog_with(vec![a, b.clone()]));
    let store = InMemoryStateStore::new();

    let (queue, receiver) = ChannelQueue::new(8);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&catalog),
        Arc::new(store.clone()),
        Arc::new(queue),
    ));
    let shutdown = Shutdown::new();
    let worker = tokio::spawn(Worker::new(receiver, Arc::clone(&dispatcher)).run(shutdown.clone()));

    let mut ids = Vec::new();
    for name in ["first", "second"] {
        let (pipeline, steps) = register(
            PipelineDefinition::new(name, vec![StepDefinition::new("A"), StepDefinition::new("B")]),
            &catalog,
        )
        .unwrap();
        ids.push(pipeline.id);
        store.insert_pipeline(pipeline, steps);
    }

    for id in &ids {
        dispatcher.start_pipeline(*id, &dir.path().join(id.to_string())).await.unwrap();
    }
    for id in &ids {
        wait_for(&store, *id, PipelineStatus::Failed).await;
    }

    shutdown.request("done");
    worker.await.unwrap();
    assert_eq!(b.call_count(), 0);
}
