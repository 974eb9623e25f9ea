//! # Chainflow
//!
//! A step execution engine for linear bioinformatics pipelines.
//!
//! Chainflow runs one chain of external-tool steps per pipeline:
//!
//! - **Canonical order**: the selected steps must be a contiguous run of a
//!   fixed step sequence, checked at registration and before every dispatch
//! - **Dependency resolution**: each step reads its inputs from the recorded
//!   outputs of earlier steps
//! - **Queue-driven dispatch**: one step per task-queue message, with state
//!   persisted in a shared store and an atomic claim per step
//! - **Uniform tool retries**: every tool invocation is retried and its
//!   output validated the same way
//! - **Leases**: running steps heartbeat; a watchdog reclaims stuck ones
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chainflow::prelude::*;
//!
//! let catalog = Arc::new(StepCatalog::circ_rna(Arc::new(ToolConfigSource::empty())));
//! let store = InMemoryStateStore::new();
//! let (pipeline, steps) = register(definition, &catalog)?;
//! let pipeline_id = pipeline.id;
//! store.insert_pipeline(pipeline, steps);
//!
//! let (queue, receiver) = ChannelQueue::new(64);
//! let dispatcher = Arc::new(Dispatcher::new(catalog, Arc::new(store.clone()), Arc::new(queue)));
//! tokio::spawn(Worker::new(receiver, dispatcher.clone()).run(Shutdown::new()));
//! dispatcher.start_pipeline(pipeline_id, Path::new("runs/1")).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod observability;
pub mod order;
pub mod queue;
pub mod registration;
pub mod resolver;
pub mod runner;
pub mod shutdown;
pub mod store;
pub mod testing;
pub mod watchdog;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapters::{StepAdapter, ToolConfig, ToolConfigSource};
    pub use crate::catalog::StepCatalog;
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        InputMap, InputMapping, OutputMap, Payload, Pipeline, PipelineStatus, Step, StepStatus,
    };
    pub use crate::dispatcher::{DispatchOutcome, Dispatcher, DispatcherSettings};
    pub use crate::errors::{
        ChainflowError, DispatchError, OrderError, RegistrationError, StepError, StoreError,
        ToolError,
    };
    pub use crate::events::{CollectingEventSink, EventKind, EventSink, LoggingEventSink};
    pub use crate::order::{validate_and_order, CanonicalOrder};
    pub use crate::queue::{ChannelQueue, RecordingQueue, TaskMessage, TaskQueue, Worker};
    pub use crate::registration::{register, PipelineDefinition, StepDefinition};
    pub use crate::resolver::resolve_inputs;
    pub use crate::runner::{run_with_retry, RetryPolicy};
    pub use crate::shutdown::Shutdown;
    pub use crate::store::{InMemoryStateStore, StateStore};
    pub use crate::watchdog::Watchdog;
}
