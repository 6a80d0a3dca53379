//! Event types for the orchestration lifecycle
//!
//! These events represent every observable milestone:
//! - Process lifecycle (start, per-cycle pre/process/post, end, force-stop, resume)
//! - Stage lifecycle (start, per-source pre/process/post, end, force-stop)
//! - Source lifecycle (start, batch start/end, end, force-stop)
//! - Metrics (raw samples, aggregated flushes)
//! - Model and checkpoint coordination

use chrono::{DateTime, Utc};
use checkstore::Snapshot;
use serde::Serialize;

use crate::lifecycle::Batch;
use crate::metric::MetricTable;
use crate::model::ModelHandles;

/// Core event enum - the vocabulary every unit speaks
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    // === Process Lifecycle ===
    /// The process has started
    ProcessStarted { cycle_limit: usize },
    /// A cycle is about to run
    ProcessPreCycle { cycle: usize },
    /// A cycle is running with the given active sources
    ProcessCycle { cycle: usize, sources: Vec<String> },
    /// A cycle has finished
    ProcessPostCycle { cycle: usize },
    /// The process has ended
    ProcessEnded {
        /// Last cycle that was started (0 if none)
        cycle: usize,
        /// Whether the end was caused by a force-stop
        stopped: bool,
    },
    /// Request cooperative cancellation of the whole process
    ProcessForceStop { reason: String },
    /// Continue numbering after `cycle_index` (emitted after a checkpoint load)
    ProcessResume { cycle_index: usize },

    // === Stage Lifecycle ===
    /// A stage (one cycle) has started
    StageStarted { cycle: usize },
    /// A source is about to run within the stage
    StagePreSource { cycle: usize, source: String },
    /// A source is running within the stage
    StageSource { cycle: usize, source: String },
    /// A source has finished within the stage
    StagePostSource { cycle: usize, source: String },
    /// The stage has ended
    StageEnded { cycle: usize, stopped: bool },
    /// Request cooperative cancellation of the running stage
    StageForceStop,

    // === Source Lifecycle ===
    /// A source iterator has started
    SourceStarted {
        source: String,
        cycle: usize,
        step_bound: Option<usize>,
        wrap_on_completion: bool,
    },
    /// A batch was pulled and is about to be processed
    BatchStarted {
        source: String,
        cycle: usize,
        step: usize,
        batch_index: usize,
        #[serde(skip)]
        batch: Batch,
    },
    /// A batch has been processed
    BatchEnded {
        source: String,
        cycle: usize,
        step: usize,
        batch_index: usize,
    },
    /// A source iterator has ended
    SourceEnded {
        source: String,
        cycle: usize,
        /// Number of batches emitted during this run
        steps: usize,
        /// Batch index the next pull will carry
        batch_index: usize,
        step_bound: Option<usize>,
        wrap_on_completion: bool,
        stopped: bool,
    },
    /// Request cooperative cancellation of the running source iterator
    SourceForceStop,

    // === Metrics ===
    /// A raw metric sample
    Metric {
        name: String,
        value: f64,
        cycle: usize,
        source: String,
        step: usize,
        batch_index: usize,
    },
    /// Aggregated metrics were flushed; carries the whole aggregated table
    MetricsFlushed { cycle: usize, metrics: MetricTable },

    // === Model ===
    /// Live model/optimizer/scheduler handles are available
    ModelInit {
        #[serde(skip)]
        handles: ModelHandles,
    },
    /// Save the "last" checkpoint for a finished cycle
    SaveLast { cycle: usize },
    /// Save the "best" checkpoint; validation loss strictly improved
    SaveBest { cycle: usize, loss: f64 },

    // === State & Checkpoints ===
    /// Ask the checkpoint store to persist a snapshot
    StateSave {
        tag: String,
        #[serde(skip)]
        snapshot: Snapshot,
    },
    /// Ask the checkpoint store to load a tag
    StateLoad { tag: String },
    /// A checkpoint is being written
    CheckpointSaving { tag: String, cycle_index: usize },
    /// A checkpoint was written
    CheckpointSaved { tag: String },
    /// A checkpoint is being read
    CheckpointLoading { tag: String },
    /// A checkpoint was read
    CheckpointLoaded { tag: String, snapshot: Snapshot },
}

/// Variant tag of an [`Event`], the key handlers subscribe under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventKind {
    ProcessStarted,
    ProcessPreCycle,
    ProcessCycle,
    ProcessPostCycle,
    ProcessEnded,
    ProcessForceStop,
    ProcessResume,
    StageStarted,
    StagePreSource,
    StageSource,
    StagePostSource,
    StageEnded,
    StageForceStop,
    SourceStarted,
    BatchStarted,
    BatchEnded,
    SourceEnded,
    SourceForceStop,
    Metric,
    MetricsFlushed,
    ModelInit,
    SaveLast,
    SaveBest,
    StateSave,
    StateLoad,
    CheckpointSaving,
    CheckpointSaved,
    CheckpointLoading,
    CheckpointLoaded,
}

impl Event {
    /// Get the variant tag for this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ProcessStarted { .. } => EventKind::ProcessStarted,
            Event::ProcessPreCycle { .. } => EventKind::ProcessPreCycle,
            Event::ProcessCycle { .. } => EventKind::ProcessCycle,
            Event::ProcessPostCycle { .. } => EventKind::ProcessPostCycle,
            Event::ProcessEnded { .. } => EventKind::ProcessEnded,
            Event::ProcessForceStop { .. } => EventKind::ProcessForceStop,
            Event::ProcessResume { .. } => EventKind::ProcessResume,
            Event::StageStarted { .. } => EventKind::StageStarted,
            Event::StagePreSource { .. } => EventKind::StagePreSource,
            Event::StageSource { .. } => EventKind::StageSource,
            Event::StagePostSource { .. } => EventKind::StagePostSource,
            Event::StageEnded { .. } => EventKind::StageEnded,
            Event::StageForceStop => EventKind::StageForceStop,
            Event::SourceStarted { .. } => EventKind::SourceStarted,
            Event::BatchStarted { .. } => EventKind::BatchStarted,
            Event::BatchEnded { .. } => EventKind::BatchEnded,
            Event::SourceEnded { .. } => EventKind::SourceEnded,
            Event::SourceForceStop => EventKind::SourceForceStop,
            Event::Metric { .. } => EventKind::Metric,
            Event::MetricsFlushed { .. } => EventKind::MetricsFlushed,
            Event::ModelInit { .. } => EventKind::ModelInit,
            Event::SaveLast { .. } => EventKind::SaveLast,
            Event::SaveBest { .. } => EventKind::SaveBest,
            Event::StateSave { .. } => EventKind::StateSave,
            Event::StateLoad { .. } => EventKind::StateLoad,
            Event::CheckpointSaving { .. } => EventKind::CheckpointSaving,
            Event::CheckpointSaved { .. } => EventKind::CheckpointSaved,
            Event::CheckpointLoading { .. } => EventKind::CheckpointLoading,
            Event::CheckpointLoaded { .. } => EventKind::CheckpointLoaded,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        self.kind().name()
    }

    /// Cycle index the event belongs to, if any
    pub fn cycle(&self) -> Option<usize> {
        match self {
            Event::ProcessPreCycle { cycle }
            | Event::ProcessCycle { cycle, .. }
            | Event::ProcessPostCycle { cycle }
            | Event::ProcessEnded { cycle, .. }
            | Event::StageStarted { cycle }
            | Event::StagePreSource { cycle, .. }
            | Event::StageSource { cycle, .. }
            | Event::StagePostSource { cycle, .. }
            | Event::StageEnded { cycle, .. }
            | Event::SourceStarted { cycle, .. }
            | Event::BatchStarted { cycle, .. }
            | Event::BatchEnded { cycle, .. }
            | Event::SourceEnded { cycle, .. }
            | Event::Metric { cycle, .. }
            | Event::MetricsFlushed { cycle, .. }
            | Event::SaveLast { cycle }
            | Event::SaveBest { cycle, .. } => Some(*cycle),
            Event::ProcessResume { cycle_index } | Event::CheckpointSaving { cycle_index, .. } => Some(*cycle_index),
            _ => None,
        }
    }
}

impl EventKind {
    /// Every event kind, in declaration order
    pub const ALL: [EventKind; 29] = [
        EventKind::ProcessStarted,
        EventKind::ProcessPreCycle,
        EventKind::ProcessCycle,
        EventKind::ProcessPostCycle,
        EventKind::ProcessEnded,
        EventKind::ProcessForceStop,
        EventKind::ProcessResume,
        EventKind::StageStarted,
        EventKind::StagePreSource,
        EventKind::StageSource,
        EventKind::StagePostSource,
        EventKind::StageEnded,
        EventKind::StageForceStop,
        EventKind::SourceStarted,
        EventKind::BatchStarted,
        EventKind::BatchEnded,
        EventKind::SourceEnded,
        EventKind::SourceForceStop,
        EventKind::Metric,
        EventKind::MetricsFlushed,
        EventKind::ModelInit,
        EventKind::SaveLast,
        EventKind::SaveBest,
        EventKind::StateSave,
        EventKind::StateLoad,
        EventKind::CheckpointSaving,
        EventKind::CheckpointSaved,
        EventKind::CheckpointLoading,
        EventKind::CheckpointLoaded,
    ];

    /// Get the variant name
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ProcessStarted => "ProcessStarted",
            EventKind::ProcessPreCycle => "ProcessPreCycle",
            EventKind::ProcessCycle => "ProcessCycle",
            EventKind::ProcessPostCycle => "ProcessPostCycle",
            EventKind::ProcessEnded => "ProcessEnded",
            EventKind::ProcessForceStop => "ProcessForceStop",
            EventKind::ProcessResume => "ProcessResume",
            EventKind::StageStarted => "StageStarted",
            EventKind::StagePreSource => "StagePreSource",
            EventKind::StageSource => "StageSource",
            EventKind::StagePostSource => "StagePostSource",
            EventKind::StageEnded => "StageEnded",
            EventKind::StageForceStop => "StageForceStop",
            EventKind::SourceStarted => "SourceStarted",
            EventKind::BatchStarted => "BatchStarted",
            EventKind::BatchEnded => "BatchEnded",
            EventKind::SourceEnded => "SourceEnded",
            EventKind::SourceForceStop => "SourceForceStop",
            EventKind::Metric => "Metric",
            EventKind::MetricsFlushed => "MetricsFlushed",
            EventKind::ModelInit => "ModelInit",
            EventKind::SaveLast => "SaveLast",
            EventKind::SaveBest => "SaveBest",
            EventKind::StateSave => "StateSave",
            EventKind::StateLoad => "StateLoad",
            EventKind::CheckpointSaving => "CheckpointSaving",
            EventKind::CheckpointSaved => "CheckpointSaved",
            EventKind::CheckpointLoading => "CheckpointLoading",
            EventKind::CheckpointLoaded => "CheckpointLoaded",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize)]
pub struct EventLogEntry {
    /// Timestamp of the event
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// The event
    pub event: Event,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
