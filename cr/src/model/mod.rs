//! Model-side collaborators and the unit that drives them
//!
//! The orchestration core never looks inside a model. It only needs to run
//! a step on a batch, switch between training and evaluation, and move
//! state blobs in and out for checkpoints.

mod infer;
mod manager;

use std::sync::{Arc, Weak};

use checkstore::StateBlob;

use crate::error::Result;
use crate::lifecycle::Batch;

pub use infer::InferManager;
pub use manager::{ModelManager, ScheduleMode};

/// Anything whose state can be captured into and restored from a checkpoint
pub trait Stateful: Send + Sync {
    fn state(&self) -> Result<StateBlob>;

    fn load_state(&self, state: &StateBlob) -> Result<()>;
}

/// Training or evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A model that can take a step on a batch and report its loss
pub trait Learner: Stateful {
    fn set_mode(&self, _mode: Mode) {}

    /// Forward, backward and parameter update; returns the batch loss
    fn train_step(&self, batch: &Batch) -> Result<f64>;

    /// Forward only; returns the batch loss
    fn eval_step(&self, batch: &Batch) -> Result<f64>;
}

/// Learning-rate schedule
pub trait Scheduler: Stateful {
    fn step(&self) -> Result<()>;
}

/// Live handles to the checkpointed collaborators
#[derive(Clone)]
pub struct ModelHandles {
    pub model: Arc<dyn Stateful>,
    pub optimizer: Arc<dyn Stateful>,
    pub scheduler: Arc<dyn Stateful>,
}

impl ModelHandles {
    pub fn new(model: Arc<dyn Stateful>, optimizer: Arc<dyn Stateful>, scheduler: Arc<dyn Stateful>) -> Self {
        Self {
            model,
            optimizer,
            scheduler,
        }
    }

    /// Non-owning copy for units that must not extend the model's lifetime
    pub fn downgrade(&self) -> WeakModelHandles {
        WeakModelHandles {
            model: Arc::downgrade(&self.model),
            optimizer: Arc::downgrade(&self.optimizer),
            scheduler: Arc::downgrade(&self.scheduler),
        }
    }
}

impl std::fmt::Debug for ModelHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandles").finish_non_exhaustive()
    }
}

/// Weak counterpart of [`ModelHandles`]
#[derive(Clone)]
pub struct WeakModelHandles {
    model: Weak<dyn Stateful>,
    optimizer: Weak<dyn Stateful>,
    scheduler: Weak<dyn Stateful>,
}

impl WeakModelHandles {
    /// Upgrade all three, `None` if any was dropped
    pub fn upgrade(&self) -> Option<ModelHandles> {
        Some(ModelHandles {
            model: self.model.upgrade()?,
            optimizer: self.optimizer.upgrade()?,
            scheduler: self.scheduler.upgrade()?,
        })
    }
}
