//! Snapshot record persisted per tag

use serde::{Deserialize, Serialize};

/// Opaque state of one component (model, optimizer or scheduler)
pub type StateBlob = serde_json::Value;

/// A persisted snapshot of model/optimizer/scheduler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Opaque model state
    pub model_state: StateBlob,
    /// Opaque optimizer state
    pub optimizer_state: StateBlob,
    /// Opaque scheduler state
    pub scheduler_state: StateBlob,
    /// Cycle index the snapshot was taken at
    pub cycle_index: usize,
}

impl Snapshot {
    pub fn new(model_state: StateBlob, optimizer_state: StateBlob, scheduler_state: StateBlob, cycle_index: usize) -> Self {
        Self {
            model_state,
            optimizer_state,
            scheduler_state,
            cycle_index,
        }
    }
}
