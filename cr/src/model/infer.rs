//! InferManager - evaluation-only model driver

use std::sync::{Arc, Mutex};

use checkstore::{Snapshot, StateBlob};
use tracing::debug;

use super::manager::{TrackedModel, lock};
use super::{Learner, Mode, ModelHandles, Stateful};
use crate::error::Result;
use crate::events::{Bus, Event, EventKind, Unit, UnitCore, weak_handler};
use crate::state::BestTracker;

/// Stand-in for the optimizer and scheduler an inference run does not have
struct Frozen;

impl Stateful for Frozen {
    fn state(&self) -> Result<StateBlob> {
        Ok(StateBlob::Null)
    }

    fn load_state(&self, _state: &StateBlob) -> Result<()> {
        Ok(())
    }
}

/// Runs the learner in evaluation mode on every batch of every source
///
/// Publishes `ModelInit` like [`super::ModelManager`] so a checkpoint
/// coordinator can restore weights, and a `loss` metric per batch. It never
/// trains, steps a scheduler or asks for a save.
pub struct InferManager {
    core: UnitCore,

    learner: Arc<dyn Learner>,

    handles: ModelHandles,

    /// Batches evaluated so far
    batches: Mutex<usize>,
}

impl InferManager {
    pub fn new<L: Learner + 'static>(learner: Arc<L>) -> Self {
        debug!("InferManager::new: called");
        let tracked = TrackedModel::new(
            Arc::clone(&learner) as Arc<dyn Learner>,
            Arc::new(Mutex::new(BestTracker::default())),
        );
        let frozen: Arc<dyn Stateful> = Arc::new(Frozen);
        let handles = ModelHandles::new(Arc::new(tracked), Arc::clone(&frozen), frozen);
        Self {
            core: UnitCore::new("infer-manager"),
            learner,
            handles,
            batches: Mutex::new(0),
        }
    }

    pub fn handles(&self) -> &ModelHandles {
        &self.handles
    }

    /// Load the model weights of a checkpoint without resuming its cycle numbering
    pub fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        debug!(cycle_index = snapshot.cycle_index, "InferManager::restore: called");
        self.handles.model.load_state(&snapshot.model_state)
    }

    pub fn batches(&self) -> usize {
        *lock(&self.batches)
    }

    fn on_process_started(&self, _event: &Event) -> Result<()> {
        self.core.publish(Event::ModelInit {
            handles: self.handles.clone(),
        })
    }

    fn on_source_started(&self, _event: &Event) -> Result<()> {
        self.learner.set_mode(Mode::Eval);
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

        let loss = self.learner.eval_step(batch)?;
        *lock(&self.batches) += 1;

        self.core.publish(Event::Metric {
            name: "loss".to_string(),
            value: loss,
            cycle: *cycle,
            source: source.clone(),
            step: *step,
            batch_index: *batch_index,
        })
    }
}

impl Unit for InferManager {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        self.core
            .subscribe(EventKind::ProcessStarted, weak_handler(&self, Self::on_process_started))?
            .subscribe(EventKind::SourceStarted, weak_handler(&self, Self::on_source_started))?
            .subscribe(EventKind::BatchStarted, weak_handler(&self, Self::on_batch))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use crate::lifecycle::{Process, SourceIterator, SourceSet, VecSource};
    use serde_json::json;

    /// Loss is the batch value times a weight that only `load_state` changes
    #[derive(Default)]
    struct ScaledLearner {
        weight: Mutex<f64>,
        modes: Mutex<Vec<Mode>>,
        trained: Mutex<u32>,
    }

    impl Stateful for ScaledLearner {
        fn state(&self) -> Result<StateBlob> {
            Ok(json!({"weight": *self.weight.lock().unwrap()}))
        }

        fn load_state(&self, state: &StateBlob) -> Result<()> {
            *self.weight.lock().unwrap() = state["weight"].as_f64().unwrap_or(0.0);
            Ok(())
        }
    }

    impl Learner for ScaledLearner {
        fn set_mode(&self, mode: Mode) {
            self.modes.lock().unwrap().push(mode);
        }

        fn train_step(&self, _batch: &StateBlob) -> Result<f64> {
            *self.trained.lock().unwrap() += 1;
            Ok(0.0)
        }

        fn eval_step(&self, batch: &StateBlob) -> Result<f64> {
            Ok(batch.as_f64().unwrap_or(0.0) * *self.weight.lock().unwrap())
        }
    }

    fn process(sources: &[&str]) -> Process {
        let iterators = sources
            .iter()
            .map(|name| Arc::new(SourceIterator::new(*name, VecSource::new(vec![json!(1.0), json!(2.0)]))))
            .collect();
        let config = ProcessConfig {
            cycles: 1,
            ..ProcessConfig::default()
        };
        Process::new(SourceSet::Fixed(iterators), &config).unwrap()
    }

    #[test]
    fn test_every_source_is_evaluated() {
        let learner = Arc::new(ScaledLearner::default());
        *learner.weight.lock().unwrap() = 1.0;
        let infer = Arc::new(InferManager::new(Arc::clone(&learner)));
        let process = process(&["train", "test"]);
        process.add(Arc::clone(&infer)).unwrap();

        let losses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&losses);
        UnitCore::with_bus("recorder", process.bus())
            .subscribe(EventKind::Metric, move |event| {
                if let Event::Metric { value, .. } = event {
                    sink.lock().unwrap().push(*value);
                }
                Ok(())
            })
            .unwrap();

        process.start().unwrap();

        assert_eq!(*losses.lock().unwrap(), vec![1.0, 2.0, 1.0, 2.0]);
        assert_eq!(*learner.modes.lock().unwrap(), vec![Mode::Eval, Mode::Eval]);
        assert_eq!(*learner.trained.lock().unwrap(), 0);
        assert_eq!(infer.batches(), 4);
    }

    #[test]
    fn test_publishes_model_init_but_never_saves() {
        let infer = Arc::new(InferManager::new(Arc::new(ScaledLearner::default())));
        let process = process(&["test"]);
        process.add(Arc::clone(&infer)).unwrap();

        let kinds = Arc::new(Mutex::new(Vec::new()));
        let recorder = UnitCore::with_bus("recorder", process.bus());
        for kind in [EventKind::ModelInit, EventKind::SaveLast, EventKind::SaveBest] {
            let sink = Arc::clone(&kinds);
            recorder
                .subscribe(kind, move |event| {
                    sink.lock().unwrap().push(event.kind());
                    Ok(())
                })
                .unwrap();
        }

        process.start().unwrap();

        assert_eq!(*kinds.lock().unwrap(), vec![EventKind::ModelInit]);
    }

    #[test]
    fn test_restore_reads_training_checkpoint() {
        let learner = Arc::new(ScaledLearner::default());
        let infer = InferManager::new(Arc::clone(&learner));
        let snapshot = Snapshot::new(
            json!({"learner": {"weight": 3.0}, "best_loss": 0.25}),
            json!({"lr": 0.1}),
            json!({"steps": 4}),
            7,
        );

        infer.restore(&snapshot).unwrap();

        assert_eq!(*learner.weight.lock().unwrap(), 3.0);
        assert_eq!(infer.handles().optimizer.state().unwrap(), StateBlob::Null);
    }
}
