//! Session - assembles a process and its standard units from configuration

use std::sync::Arc;

use checkstore::CheckpointStore;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::events::Unit;
use crate::lifecycle::{Process, SourceSet};
use crate::metric::MetricAggregator;
use crate::model::{Learner, ModelManager, Scheduler, Stateful};
use crate::state::{CheckpointStoreUnit, StateCoordinator};
use crate::trigger::EarlyStopper;

/// A process wired with the model driver, metrics, checkpoints and early stop
pub struct Session {
    pub process: Process,
    pub model: Arc<ModelManager>,
    pub metrics: Arc<MetricAggregator>,
    pub coordinator: Option<Arc<StateCoordinator>>,
    pub early_stop: Option<Arc<EarlyStopper>>,
}

impl Session {
    /// Build every configured unit and attach it to a new process
    ///
    /// All modes are parsed here, so a bad configuration fails before
    /// anything runs. Checkpointing is attached only when enabled and a
    /// store is given.
    pub fn build<L, O, S>(
        config: &Config,
        sources: SourceSet,
        learner: Arc<L>,
        optimizer: Arc<O>,
        scheduler: Arc<S>,
        store: Option<Arc<dyn CheckpointStore>>,
    ) -> Result<Self>
    where
        L: Learner + 'static,
        O: Stateful + 'static,
        S: Scheduler + 'static,
    {
        debug!(cycles = config.process.cycles, "Session::build: called");
        let model = Arc::new(ModelManager::new(learner, optimizer, scheduler, &config.model)?);
        let metrics = Arc::new(MetricAggregator::from_config(&config.metrics)?);
        let coordinator = match (config.checkpoint.enabled, store.as_ref()) {
            (true, Some(_)) => Some(Arc::new(StateCoordinator::from_config(&config.checkpoint)?)),
            _ => None,
        };
        let early_stop = if config.early_stop.enabled {
            Some(Arc::new(EarlyStopper::from_config(&config.early_stop)?))
        } else {
            None
        };

        let process = Process::new(sources, &config.process)?;
        if let (Some(coordinator), Some(store)) = (&coordinator, store) {
            process
                .add(Arc::clone(coordinator))?
                .add(Arc::new(CheckpointStoreUnit::new(store)))?;
        }
        process.add(Arc::clone(&model))?.add(Arc::clone(&metrics))?;
        if let Some(early_stop) = &early_stop {
            process.add(Arc::clone(early_stop))?;
        }

        Ok(Self {
            process,
            model,
            metrics,
            coordinator,
            early_stop,
        })
    }

    /// Attach an extra unit, typically a reporter
    pub fn add<U: Unit + 'static>(&self, unit: Arc<U>) -> Result<&Self> {
        self.process.add(unit)?;
        Ok(self)
    }

    pub fn run(&self) -> Result<()> {
        info!(cycle_limit = self.process.cycle_limit(), "Session::run: starting");
        self.process.start()
    }
}
