//! cyclerun - event-driven orchestration for cycle/batch processing loops
//!
//! A process runs a number of cycles; each cycle is a stage that runs its
//! data sources in order; each source yields batches. Every milestone is an
//! event on one synchronous bus, and every other concern (running the model,
//! aggregating metrics, checkpointing, early stopping, reporting) is a unit
//! that reacts to those events.
//!
//! # Modules
//!
//! - [`events`] - bus, event vocabulary and the unit base
//! - [`lifecycle`] - process, stage and source iterator
//! - [`metric`] - metric aggregation
//! - [`state`] - checkpoint coordination
//! - [`trigger`] - early stop
//! - [`model`] - model-side traits and the model driver
//! - [`report`] - JSONL and console reporters
//! - [`session`] - assembly of the standard units
//! - [`demo`] - synthetic regression workload used by `cr run`
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod metric;
pub mod model;
pub mod report;
pub mod session;
pub mod state;
pub mod trigger;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use events::{Bus, Event, EventKind, Unit, UnitCore};
pub use lifecycle::{Batch, BatchSource, Process, SourceIterator, SourceSet, Stage, VecSource};
pub use metric::{FlushTrigger, MetricAggregator, MetricTable};
pub use model::{InferManager, Learner, Mode, ModelHandles, ModelManager, Scheduler, Stateful};
pub use report::{ConsoleReporter, JsonlReporter};
pub use session::Session;
pub use state::{BestTracker, CheckpointMode, CheckpointStoreUnit, StateCoordinator};
pub use trigger::EarlyStopper;
