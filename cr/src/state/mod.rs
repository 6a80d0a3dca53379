//! Checkpoint coordination
//!
//! The coordinator turns model-side save requests into snapshots and asks
//! for the configured tag when the model comes up. The store unit serves
//! those requests from a `checkstore::CheckpointStore`.

mod coordinator;
mod store;

pub use coordinator::{BestTracker, CheckpointMode, StateCoordinator};
pub use store::CheckpointStoreUnit;
