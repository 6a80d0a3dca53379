//! ModelManager - runs the learner on every batch and decides what to save

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use checkstore::StateBlob;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Learner, Mode, ModelHandles, Scheduler, Stateful};
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::events::{Bus, Event, EventKind, Unit, UnitCore, weak_handler};
use crate::state::BestTracker;

/// When the scheduler steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// After every training batch
    PerBatch,
    /// Once per cycle, when the stage ends
    PerCycle,
}

impl FromStr for ScheduleMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per-batch" => Ok(ScheduleMode::PerBatch),
            "per-cycle" => Ok(ScheduleMode::PerCycle),
            other => Err(Error::config(format!(
                "unknown scheduler mode '{}' (expected per-batch or per-cycle)",
                other
            ))),
        }
    }
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Model blob as checkpointed: the learner's own state plus the best loss so far
#[derive(Debug, Serialize, Deserialize)]
struct TrackedState {
    learner: StateBlob,
    #[serde(default)]
    best_loss: Option<f64>,
}

/// Checkpoint view of the learner that also carries the best-loss minimum
///
/// A resumed run keeps comparing against the minimum recorded before the
/// checkpoint instead of starting a new baseline.
pub(super) struct TrackedModel {
    learner: Arc<dyn Learner>,
    best: Arc<Mutex<BestTracker>>,
}

impl TrackedModel {
    pub(super) fn new(learner: Arc<dyn Learner>, best: Arc<Mutex<BestTracker>>) -> Self {
        Self { learner, best }
    }
}

impl Stateful for TrackedModel {
    fn state(&self) -> Result<StateBlob> {
        let state = TrackedState {
            learner: self.learner.state()?,
            best_loss: lock(&self.best).best(),
        };
        Ok(serde_json::to_value(state)?)
    }

    fn load_state(&self, state: &StateBlob) -> Result<()> {
        let state: TrackedState = serde_json::from_value(state.clone())?;
        self.learner.load_state(&state.learner)?;
        lock(&self.best).restore(state.best_loss);
        debug!(best_loss = ?state.best_loss, "TrackedModel::load_state: restored");
        Ok(())
    }
}

/// Drives the learner from batch events and publishes losses and save requests
pub struct ModelManager {
    core: UnitCore,

    learner: Arc<dyn Learner>,

    scheduler: Arc<dyn Scheduler>,

    /// Handed to the checkpoint coordinator on process start
    handles: ModelHandles,

    schedule: ScheduleMode,

    /// Batches from this source are trained on; every other source is evaluated
    train_source: String,

    /// Mean loss of this source decides the best checkpoint
    valid_source: String,

    /// Losses of the validation source in the running cycle
    valid_losses: Mutex<Vec<f64>>,

    /// Best mean validation loss so far, shared with the checkpointed model blob
    best: Arc<Mutex<BestTracker>>,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("core", &self.core)
            .field("schedule", &self.schedule)
            .field("train_source", &self.train_source)
            .field("valid_source", &self.valid_source)
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    pub fn new<L, O, S>(learner: Arc<L>, optimizer: Arc<O>, scheduler: Arc<S>, config: &ModelConfig) -> Result<Self>
    where
        L: Learner + 'static,
        O: Stateful + 'static,
        S: Scheduler + 'static,
    {
        debug!(schedule = %config.schedule, train = %config.train_source, valid = %config.valid_source, "ModelManager::new: called");
        let schedule = config.schedule.parse()?;
        let best = Arc::new(Mutex::new(BestTracker::default()));
        let tracked = TrackedModel::new(Arc::clone(&learner) as Arc<dyn Learner>, Arc::clone(&best));
        let handles = ModelHandles::new(
            Arc::new(tracked) as Arc<dyn Stateful>,
            optimizer as Arc<dyn Stateful>,
            Arc::clone(&scheduler) as Arc<dyn Stateful>,
        );

        Ok(Self {
            core: UnitCore::new("model-manager"),
            learner,
            scheduler,
            handles,
            schedule,
            train_source: config.train_source.clone(),
            valid_source: config.valid_source.clone(),
            valid_losses: Mutex::new(Vec::new()),
            best,
        })
    }

    pub fn handles(&self) -> &ModelHandles {
        &self.handles
    }

    /// Best mean validation loss seen so far
    pub fn best_loss(&self) -> Option<f64> {
        lock(&self.best).best()
    }

    fn mode_for(&self, source: &str) -> Mode {
        if source == self.train_source {
            Mode::Train
        } else {
            Mode::Eval
        }
    }

    fn on_process_started(&self, _event: &Event) -> Result<()> {
        self.core.publish(Event::ModelInit {
            handles: self.handles.clone(),
        })
    }

    fn on_stage_started(&self, _event: &Event) -> Result<()> {
        lock(&self.valid_losses).clear();
        Ok(())
    }

    fn on_source_started(&self, event: &Event) -> Result<()> {
        if let Event::SourceStarted { source, .. } = event {
            let mode = self.mode_for(source);
            debug!(%source, ?mode, "ModelManager::on_source_started: switching mode");
            self.learner.set_mode(mode);
        }
        Ok(())
    }

    fn on_batch(&self, event: &Event) -> Result<()> {
        let Event::BatchStarted {
            source,
            cycle,
            step,
            batch_index,
            batch,
        } = event
        else {
            return Ok(());
        };

        let loss = match self.mode_for(source) {
            Mode::Train => {
                let loss = self.learner.train_step(batch)?;
                if self.schedule == ScheduleMode::PerBatch {
                    self.scheduler.step()?;
                }
                loss
            }
            Mode::Eval => self.learner.eval_step(batch)?,
        };

        if *source == self.valid_source {
            lock(&self.valid_losses).push(loss);
        }

        self.core.publish(Event::Metric {
            name: "loss".to_string(),
            value: loss,
            cycle: *cycle,
            source: source.clone(),
            step: *step,
            batch_index: *batch_index,
        })
    }

    fn on_stage_ended(&self, event: &Event) -> Result<()> {
        let Event::StageEnded { cycle, .. } = event else {
            return Ok(());
        };

        if self.schedule == ScheduleMode::PerCycle {
            self.scheduler.step()?;
        }

        let losses = std::mem::take(&mut *lock(&self.valid_losses));
        let improved = if losses.is_empty() {
            None
        } else {
            let mean = losses.iter().sum::<f64>() / losses.len() as f64;
            lock(&self.best).observe(mean).then_some(mean)
        };

        if let Some(loss) = improved {
            info!(cycle, loss, "Validation loss improved");
            self.core.publish(Event::SaveBest { cycle: *cycle, loss })?;
        }
        self.core.publish(Event::SaveLast { cycle: *cycle })
    }
}

impl Unit for ModelManager {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        self.core
            .subscribe(EventKind::ProcessStarted, weak_handler(&self, Self::on_process_started))?
            .subscribe(EventKind::StageStarted, weak_handler(&self, Self::on_stage_started))?
            .subscribe(EventKind::SourceStarted, weak_handler(&self, Self::on_source_started))?
            .subscribe(EventKind::BatchStarted, weak_handler(&self, Self::on_batch))?
            .subscribe(EventKind::StageEnded, weak_handler(&self, Self::on_stage_ended))?;
        Ok(())
    }
}
