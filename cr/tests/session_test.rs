//! Integration tests for fully assembled sessions
//!
//! A scripted learner makes validation losses deterministic so metric
//! aggregation, best/last checkpoints, resume and early stopping can be
//! checked end to end.

use std::sync::{Arc, Mutex};

use checkstore::{CheckpointStore, FileStore, MemoryStore, StateBlob};
use cyclerun::config::Config;
use cyclerun::events::{Event, EventKind, UnitCore};
use cyclerun::lifecycle::{SourceIterator, SourceSet, VecSource};
use cyclerun::model::{Learner, Mode, Scheduler, Stateful};
use cyclerun::session::Session;
use serde_json::json;
use tempfile::TempDir;

/// Training returns the batch value; evaluation replays a script of losses
#[derive(Default)]
struct ScriptedLearner {
    script: Vec<f64>,
    evals: Mutex<usize>,
    restored: Mutex<Option<StateBlob>>,
    modes: Mutex<Vec<Mode>>,
}

impl ScriptedLearner {
    fn new(script: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_vec(),
            ..Self::default()
        })
    }
}

impl Stateful for ScriptedLearner {
    fn state(&self) -> cyclerun::Result<StateBlob> {
        Ok(json!({"evals": *self.evals.lock().unwrap()}))
    }

    fn load_state(&self, state: &StateBlob) -> cyclerun::Result<()> {
        if let Some(evals) = state["evals"].as_u64() {
            *self.evals.lock().unwrap() = evals as usize;
        }
        *self.restored.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

impl Learner for ScriptedLearner {
    fn set_mode(&self, mode: Mode) {
        self.modes.lock().unwrap().push(mode);
    }

    fn train_step(&self, batch: &serde_json::Value) -> cyclerun::Result<f64> {
        Ok(batch.as_f64().unwrap_or(0.0))
    }

    fn eval_step(&self, batch: &serde_json::Value) -> cyclerun::Result<f64> {
        let mut evals = self.evals.lock().unwrap();
        let loss = self.script.get(*evals).copied().unwrap_or(batch.as_f64().unwrap_or(0.0));
        *evals += 1;
        Ok(loss)
    }
}

#[derive(Default)]
struct CountingScheduler {
    steps: Mutex<u64>,
}

impl Stateful for CountingScheduler {
    fn state(&self) -> cyclerun::Result<StateBlob> {
        Ok(json!({"steps": *self.steps.lock().unwrap()}))
    }

    fn load_state(&self, state: &StateBlob) -> cyclerun::Result<()> {
        *self.steps.lock().unwrap() = state["steps"].as_u64().unwrap_or(0);
        Ok(())
    }
}

impl Scheduler for CountingScheduler {
    fn step(&self) -> cyclerun::Result<()> {
        *self.steps.lock().unwrap() += 1;
        Ok(())
    }
}

fn sources(train: &[f64]) -> SourceSet {
    let train = Arc::new(SourceIterator::new(
        "train",
        VecSource::new(train.iter().map(|v| json!(v)).collect()),
    ));
    let valid = Arc::new(SourceIterator::new("valid", VecSource::new(vec![json!(0.0)])));
    SourceSet::Fixed(vec![train, valid])
}

fn config(cycles: usize) -> Config {
    let mut config = Config::default();
    config.process.cycles = cycles;
    config.early_stop.enabled = false;
    config
}

fn build(
    config: &Config,
    learner: Arc<ScriptedLearner>,
    scheduler: Arc<CountingScheduler>,
    store: Option<Arc<dyn CheckpointStore>>,
) -> Session {
    Session::build(
        config,
        sources(&[0.0, 1.0]),
        learner,
        Arc::new(CountingScheduler::default()),
        scheduler,
        store,
    )
    .expect("Failed to build session")
}

fn record(session: &Session, kinds: &[EventKind]) -> Arc<Mutex<Vec<Event>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = UnitCore::with_bus("recorder", session.process.bus());
    for kind in kinds {
        let sink = Arc::clone(&log);
        recorder
            .subscribe(*kind, move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            })
            .unwrap();
    }
    log
}

fn stage_cycles(log: &Arc<Mutex<Vec<Event>>>) -> Vec<usize> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::StageStarted { cycle } => Some(*cycle),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Metrics
// =============================================================================

#[test]
fn test_train_loss_mean_computed_once_per_cycle() {
    let session = build(
        &config(2),
        ScriptedLearner::new(&[]),
        Arc::new(CountingScheduler::default()),
        None,
    );
    let log = record(&session, &[EventKind::MetricsFlushed]);

    session.run().unwrap();

    let table = session.metrics.aggregated();
    assert_eq!(table["loss"][&1]["train"], 0.5);
    assert_eq!(table["loss"][&2]["train"], 0.5);
    assert_eq!(table["loss"][&1]["valid"], 0.0);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn test_modes_follow_sources() {
    let learner = ScriptedLearner::new(&[]);
    let session = build(
        &config(2),
        Arc::clone(&learner),
        Arc::new(CountingScheduler::default()),
        None,
    );

    session.run().unwrap();

    assert_eq!(
        *learner.modes.lock().unwrap(),
        vec![Mode::Train, Mode::Eval, Mode::Train, Mode::Eval]
    );
}

#[test]
fn test_per_cycle_scheduler_steps_once_per_cycle() {
    let scheduler = Arc::new(CountingScheduler::default());
    let session = build(&config(3), ScriptedLearner::new(&[]), Arc::clone(&scheduler), None);

    session.run().unwrap();

    assert_eq!(*scheduler.steps.lock().unwrap(), 3);
}

#[test]
fn test_per_batch_scheduler_steps_on_training_batches() {
    let mut config = config(3);
    config.model.schedule = "per-batch".to_string();
    let scheduler = Arc::new(CountingScheduler::default());
    let session = build(&config, ScriptedLearner::new(&[]), Arc::clone(&scheduler), None);

    session.run().unwrap();

    // Two training batches per cycle, none for validation
    assert_eq!(*scheduler.steps.lock().unwrap(), 6);
}

// =============================================================================
// Checkpoints
// =============================================================================

#[test]
fn test_best_checkpoint_saved_only_on_improvement() {
    let mut config = config(4);
    config.checkpoint.mode = "best".to_string();
    let store = Arc::new(MemoryStore::new());
    let session = build(
        &config,
        ScriptedLearner::new(&[0.5, 0.4, 0.45, 0.3]),
        Arc::new(CountingScheduler::default()),
        Some(store.clone()),
    );
    let log = record(&session, &[EventKind::SaveBest, EventKind::CheckpointSaved]);

    session.run().unwrap();

    let events = log.lock().unwrap();
    let best_cycles: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::SaveBest { cycle, .. } => Some(*cycle),
            _ => None,
        })
        .collect();
    assert_eq!(best_cycles, vec![2, 4]);

    let saved_last = events
        .iter()
        .filter(|e| matches!(e, Event::CheckpointSaved { tag } if tag == "last"))
        .count();
    assert_eq!(saved_last, 4);

    assert_eq!(store.load("best").unwrap().unwrap().cycle_index, 4);
    assert_eq!(session.model.best_loss(), Some(0.3));
}

#[test]
fn test_resume_from_last_checkpoint() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let mut config = config(2);
    config.checkpoint.dir = temp.path().to_path_buf();

    let store: Arc<dyn CheckpointStore> = Arc::new(FileStore::open(temp.path(), "_checkpoint.json").unwrap());
    let first = build(
        &config,
        ScriptedLearner::new(&[]),
        Arc::new(CountingScheduler::default()),
        Some(Arc::clone(&store)),
    );
    first.run().unwrap();
    assert_eq!(store.load("last").unwrap().unwrap().cycle_index, 2);
    assert!(temp.path().join("last_checkpoint.json").exists());

    config.process.cycles = 4;
    let learner = ScriptedLearner::new(&[]);
    let scheduler = Arc::new(CountingScheduler::default());
    let second = build(&config, Arc::clone(&learner), Arc::clone(&scheduler), Some(store));
    let log = record(&second, &[EventKind::StageStarted, EventKind::ProcessResume]);

    second.run().unwrap();

    assert_eq!(stage_cycles(&log), vec![3, 4]);
    assert!(
        log.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, Event::ProcessResume { cycle_index: 2 }))
    );
    assert_eq!(*learner.restored.lock().unwrap(), Some(json!({"evals": 2})));
    // Two steps restored plus one per resumed cycle
    assert_eq!(*scheduler.steps.lock().unwrap(), 4);
}

#[test]
fn test_best_checkpoint_survives_resume() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let script = [0.5, 0.4, 0.45, 0.42];

    let first = build(
        &config(2),
        ScriptedLearner::new(&script),
        Arc::new(CountingScheduler::default()),
        Some(Arc::clone(&store)),
    );
    first.run().unwrap();
    assert_eq!(store.load("best").unwrap().unwrap().cycle_index, 2);

    let second = build(
        &config(4),
        ScriptedLearner::new(&script),
        Arc::new(CountingScheduler::default()),
        Some(Arc::clone(&store)),
    );
    let log = record(&second, &[EventKind::StageStarted, EventKind::SaveBest]);

    second.run().unwrap();

    assert_eq!(stage_cycles(&log), vec![3, 4]);
    assert!(!log.lock().unwrap().iter().any(|e| e.kind() == EventKind::SaveBest));
    assert_eq!(store.load("best").unwrap().unwrap().cycle_index, 2);
    assert_eq!(second.model.best_loss(), Some(0.4));
}

#[test]
fn test_resume_past_cycle_limit_runs_nothing() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let first = build(
        &config(3),
        ScriptedLearner::new(&[]),
        Arc::new(CountingScheduler::default()),
        Some(Arc::clone(&store)),
    );
    first.run().unwrap();

    let second = build(
        &config(2),
        ScriptedLearner::new(&[]),
        Arc::new(CountingScheduler::default()),
        Some(store),
    );
    let log = record(&second, &[EventKind::StageStarted, EventKind::ProcessEnded]);

    second.run().unwrap();

    let events = log.lock().unwrap();
    assert!(!events.iter().any(|e| e.kind() == EventKind::StageStarted));
    assert!(matches!(
        events.last(),
        Some(Event::ProcessEnded { cycle: 3, stopped: false })
    ));
}

#[test]
fn test_checkpointing_disabled_attaches_no_coordinator() {
    let mut config = config(2);
    config.checkpoint.enabled = false;
    let store = Arc::new(MemoryStore::new());
    let session = build(
        &config,
        ScriptedLearner::new(&[]),
        Arc::new(CountingScheduler::default()),
        Some(store.clone()),
    );

    session.run().unwrap();

    assert!(session.coordinator.is_none());
    assert!(store.tags().unwrap().is_empty());
}

// =============================================================================
// Early stop
// =============================================================================

fn early_stop_config(cycles: usize) -> Config {
    let mut config = config(cycles);
    config.early_stop.enabled = true;
    config.early_stop.window = 3;
    config.early_stop.delta = 0.1;
    config
}

#[test]
fn test_early_stop_on_plateau() {
    let session = build(
        &early_stop_config(10),
        ScriptedLearner::new(&[1.00, 1.05, 1.02, 1.08, 1.0, 1.0]),
        Arc::new(CountingScheduler::default()),
        None,
    );
    let log = record(
        &session,
        &[EventKind::StageStarted, EventKind::ProcessForceStop, EventKind::ProcessEnded],
    );

    session.run().unwrap();

    assert_eq!(stage_cycles(&log), vec![1, 2, 3, 4]);
    let events = log.lock().unwrap();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::ProcessForceStop { reason } if reason == "early_stopping"))
    );
    assert!(matches!(
        events.last(),
        Some(Event::ProcessEnded { cycle: 4, stopped: true })
    ));
}

#[test]
fn test_no_early_stop_outside_delta() {
    let session = build(
        &early_stop_config(4),
        ScriptedLearner::new(&[1.00, 1.05, 1.02, 1.20]),
        Arc::new(CountingScheduler::default()),
        None,
    );
    let log = record(&session, &[EventKind::ProcessForceStop, EventKind::ProcessEnded]);

    session.run().unwrap();

    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        Event::ProcessEnded { cycle: 4, stopped: false }
    ));
}

#[test]
fn test_invalid_config_fails_before_running() {
    let mut config = config(2);
    config.metrics.flush = "per-week".to_string();

    let result = Session::build(
        &config,
        sources(&[0.0]),
        ScriptedLearner::new(&[]),
        Arc::new(CountingScheduler::default()),
        Arc::new(CountingScheduler::default()),
        None,
    );

    assert!(result.is_err_and(|e| e.is_config()));
}
