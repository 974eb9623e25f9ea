//! chainflow-run
//!
//! Registers one pipeline definition, runs it to a terminal state on an
//! in-process worker and prints the final step statuses as JSON.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use chainflow::adapters::ToolConfigSource;
use chainflow::catalog::StepCatalog;
use chainflow::config::EngineConfig;
use chainflow::core::PipelineStatus;
use chainflow::dispatcher::Dispatcher;
use chainflow::observability::{init_tracing, LogFormat};
use chainflow::queue::{ChannelQueue, Worker};
use chainflow::registration::{register, PipelineDefinition};
use chainflow::shutdown::Shutdown;
use chainflow::store::InMemoryStateStore;
use chainflow::watchdog::Watchdog;

#[derive(Parser)]
#[command(name = "chainflow-run")]
#[command(about = "Run one chainflow pipeline definition", long_about = None)]
struct Cli {
    /// Pipeline definition (JSON)
    #[arg(long)]
    definition: PathBuf,

    /// Run directory; defaults to <work root>/<pipeline id>
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Log format (pretty or json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Task channel capacity
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    init_tracing(cli.log_format.unwrap_or(config.log_format)).map_err(|e| anyhow!(e))?;

    let raw = std::fs::read_to_string(&cli.definition)
        .with_context(|| format!("reading {}", cli.definition.display()))?;
    let definition: PipelineDefinition =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", cli.definition.display()))?;

    let source = Arc::new(ToolConfigSource::load(config.tool_config_dir.as_deref(), &config.app_env));
    let catalog = Arc::new(StepCatalog::circ_rna(source));
    let unbound = catalog.unbound();
    if !unbound.is_empty() {
        warn!(steps = ?unbound, "Steps without an adapter in this build");
    }

    let store = InMemoryStateStore::new();
    let (pipeline, steps) = register(definition, &catalog)?;
    let pipeline_id = pipeline.id;
    store.insert_pipeline(pipeline, steps);

    let run_dir = cli
        .run_dir
        .unwrap_or_else(|| config.work_root.join(pipeline_id.to_string()));

    let (queue, receiver) = ChannelQueue::new(cli.queue_capacity.max(1));
    let dispatcher = Arc::new(
        Dispatcher::new(catalog, Arc::new(store.clone()), Arc::new(queue))
            .with_settings(config.dispatcher_settings()),
    );
    let shutdown = Shutdown::new();
    let worker = tokio::spawn(Worker::new(receiver, Arc::clone(&dispatcher)).run(shutdown.clone()));
    let watchdog = tokio::spawn(
        Watchdog::new(Arc::new(store.clone()), config.max_reclaims)
            .run(config.watchdog_interval(), shutdown.clone()),
    );

    dispatcher.start_pipeline(pipeline_id, &run_dir).await?;
    info!(%pipeline_id, run_dir = %run_dir.display(), "Waiting for pipeline");

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping after the current step");
                break None;
            }
            _ = poll.tick() => {
                let status = store.snapshot(pipeline_id).map(|s| s.pipeline.status);
                if matches!(
                    status,
                    Some(PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Paused)
                ) {
                    break status;
                }
            }
        }
    };

    shutdown.request("pipeline finished");
    let processed = worker.await.context("worker task panicked")?;
    watchdog.await.context("watchdog task panicked")?;
    info!(processed, "Worker stopped");

    let snapshot = store
        .snapshot(pipeline_id)
        .ok_or_else(|| anyhow!("pipeline {pipeline_id} vanished from the store"))?;
    let steps: Vec<_> = snapshot
        .steps
        .iter()
        .map(|s| json!({"name": s.name, "status": s.status, "results": s.results}))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "pipeline_id": pipeline_id,
            "status": snapshot.pipeline.status,
            "run_directory": run_dir,
            "steps": steps,
        }))?
    );

    match status {
        Some(PipelineStatus::Completed) => Ok(()),
        Some(other) => Err(anyhow!("pipeline ended {other}")),
        None => Err(anyhow!("interrupted")),
    }
}
