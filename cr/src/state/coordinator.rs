//! StateCoordinator - decides which checkpoint to load and turns save requests into snapshots

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use checkstore::{Snapshot, TAG_BEST, TAG_LAST};
use tracing::{debug, info, warn};

use crate::config::CheckpointConfig;
use crate::error::{Error, Result};
use crate::events::{Bus, Event, EventKind, Unit, UnitCore, weak_handler};
use crate::model::WeakModelHandles;

/// Which checkpoint is loaded when the model comes up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointMode {
    Last,
    Best,
    Custom(String),
}

impl CheckpointMode {
    pub fn tag(&self) -> &str {
        match self {
            CheckpointMode::Last => TAG_LAST,
            CheckpointMode::Best => TAG_BEST,
            CheckpointMode::Custom(tag) => tag,
        }
    }
}

impl FromStr for CheckpointMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            TAG_LAST => Ok(CheckpointMode::Last),
            TAG_BEST => Ok(CheckpointMode::Best),
            other => {
                checkstore::validate_tag(other)
                    .map_err(|e| Error::config(format!("invalid checkpoint mode: {}", e)))?;
                Ok(CheckpointMode::Custom(other.to_string()))
            }
        }
    }
}

/// Tracks the lowest value seen; reports strict improvements
#[derive(Debug, Clone, Default)]
pub struct BestTracker {
    best: Option<f64>,
}

impl BestTracker {
    /// Record `value`; `true` only when it is strictly below the previous minimum
    ///
    /// The first value sets the baseline and never counts as an improvement.
    /// NaN is ignored.
    pub fn observe(&mut self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self.best {
            None => {
                self.best = Some(value);
                false
            }
            Some(best) if value < best => {
                self.best = Some(value);
                true
            }
            Some(_) => false,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Replace the recorded minimum, e.g. with the one carried by a checkpoint
    pub fn restore(&mut self, best: Option<f64>) {
        self.best = best.filter(|v| !v.is_nan());
    }
}

/// Bridges the model driver and the checkpoint store
///
/// Holds only weak handles to the live model, optimizer and scheduler; they
/// are refreshed on every `ModelInit`.
pub struct StateCoordinator {
    core: UnitCore,

    /// Tag requested on model init
    mode: CheckpointMode,

    handles: Mutex<Option<WeakModelHandles>>,
}

impl StateCoordinator {
    pub fn new(mode: CheckpointMode) -> Self {
        debug!(?mode, "StateCoordinator::new: called");
        Self {
            core: UnitCore::new("state-coordinator"),
            mode,
            handles: Mutex::new(None),
        }
    }

    /// Build from configuration; an invalid mode is a configuration error
    pub fn from_config(config: &CheckpointConfig) -> Result<Self> {
        Ok(Self::new(config.mode.parse()?))
    }

    pub fn mode(&self) -> &CheckpointMode {
        &self.mode
    }

    fn handles(&self) -> MutexGuard<'_, Option<WeakModelHandles>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Capture the live state for `cycle`, `None` when no model is available
    pub fn snapshot(&self, cycle: usize) -> Result<Option<Snapshot>> {
        let Some(handles) = self.handles().as_ref().and_then(WeakModelHandles::upgrade) else {
            return Ok(None);
        };
        Ok(Some(Snapshot::new(
            handles.model.state()?,
            handles.optimizer.state()?,
            handles.scheduler.state()?,
            cycle,
        )))
    }

    fn on_model_init(&self, event: &Event) -> Result<()> {
        if let Event::ModelInit { handles } = event {
            *self.handles() = Some(handles.downgrade());
            debug!(tag = self.mode.tag(), "StateCoordinator::on_model_init: requesting load");
            self.core.publish(Event::StateLoad {
                tag: self.mode.tag().to_string(),
            })?;
        }
        Ok(())
    }

    fn save(&self, tag: &str, cycle: usize) -> Result<()> {
        match self.snapshot(cycle)? {
            Some(snapshot) => self.core.publish(Event::StateSave {
                tag: tag.to_string(),
                snapshot,
            }),
            None => {
                warn!(%tag, cycle, "No live model to checkpoint");
                Ok(())
            }
        }
    }

    fn on_save_last(&self, event: &Event) -> Result<()> {
        match event {
            Event::SaveLast { cycle } => self.save(TAG_LAST, *cycle),
            _ => Ok(()),
        }
    }

    fn on_save_best(&self, event: &Event) -> Result<()> {
        match event {
            Event::SaveBest { cycle, .. } => self.save(TAG_BEST, *cycle),
            _ => Ok(()),
        }
    }

    fn on_loaded(&self, event: &Event) -> Result<()> {
        let Event::CheckpointLoaded { tag, snapshot } = event else {
            return Ok(());
        };
        let Some(handles) = self.handles().as_ref().and_then(WeakModelHandles::upgrade) else {
            warn!(%tag, "Checkpoint loaded but no live model to restore into");
            return Ok(());
        };

        handles.model.load_state(&snapshot.model_state)?;
        handles.optimizer.load_state(&snapshot.optimizer_state)?;
        handles.scheduler.load_state(&snapshot.scheduler_state)?;
        info!(%tag, cycle_index = snapshot.cycle_index, "Restored state from checkpoint");

        self.core.publish(Event::ProcessResume {
            cycle_index: snapshot.cycle_index,
        })
    }
}

impl Unit for StateCoordinator {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        self.core
            .subscribe(EventKind::ModelInit, weak_handler(&self, Self::on_model_init))?
            .subscribe(EventKind::SaveLast, weak_handler(&self, Self::on_save_last))?
            .subscribe(EventKind::SaveBest, weak_handler(&self, Self::on_save_best))?
            .subscribe(EventKind::CheckpointLoaded, weak_handler(&self, Self::on_loaded))?;
        Ok(())
    }
}
