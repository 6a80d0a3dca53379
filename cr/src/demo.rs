//! Synthetic linear-regression workload driven by `cr run`
//!
//! Fits `y = w*x + b` with plain SGD on seeded random data. Small enough to
//! run in milliseconds, real enough to show losses fall, plateau and trip
//! the early-stop trigger.

use std::sync::{Arc, Mutex, MutexGuard};

use checkstore::StateBlob;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::DemoConfig;
use crate::error::{Error, Result};
use crate::lifecycle::{Batch, VecSource};
use crate::model::{Learner, Mode, Scheduler, Stateful};

/// Slope the synthetic data is drawn around
pub const TRUE_WEIGHT: f64 = 2.0;

/// Intercept the synthetic data is drawn around
pub const TRUE_BIAS: f64 = -0.5;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One batch of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoBatch {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl DemoBatch {
    fn parse(batch: &Batch) -> Result<Self> {
        let batch: Self = serde_json::from_value(batch.clone())?;
        if batch.x.is_empty() || batch.x.len() != batch.y.len() {
            return Err(Error::config(format!(
                "malformed batch: {} inputs, {} targets",
                batch.x.len(),
                batch.y.len()
            )));
        }
        Ok(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct SgdState {
    lr: f64,
    updates: u64,
}

/// Plain SGD: a learning rate and an update counter
#[derive(Debug)]
pub struct Sgd {
    state: Mutex<SgdState>,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self {
            state: Mutex::new(SgdState { lr, updates: 0 }),
        }
    }

    pub fn lr(&self) -> f64 {
        lock(&self.state).lr
    }

    pub fn updates(&self) -> u64 {
        lock(&self.state).updates
    }

    fn scale_lr(&self, factor: f64) {
        lock(&self.state).lr *= factor;
    }

    /// Learning rate for the next update, counting it
    fn take_step(&self) -> f64 {
        let mut state = lock(&self.state);
        state.updates += 1;
        state.lr
    }
}

impl Stateful for Sgd {
    fn state(&self) -> Result<StateBlob> {
        Ok(serde_json::to_value(*lock(&self.state))?)
    }

    fn load_state(&self, state: &StateBlob) -> Result<()> {
        *lock(&self.state) = serde_json::from_value(state.clone())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct DecayState {
    steps: usize,
}

/// Multiplies the optimizer's learning rate by `gamma` every `every` steps
#[derive(Debug)]
pub struct StepDecay {
    optimizer: Arc<Sgd>,
    gamma: f64,
    every: usize,
    state: Mutex<DecayState>,
}

impl StepDecay {
    pub fn new(optimizer: Arc<Sgd>, gamma: f64, every: usize) -> Result<Self> {
        if every == 0 {
            return Err(Error::config("decay-every must be at least 1"));
        }
        Ok(Self {
            optimizer,
            gamma,
            every,
            state: Mutex::new(DecayState { steps: 0 }),
        })
    }

    pub fn steps(&self) -> usize {
        lock(&self.state).steps
    }
}

impl Stateful for StepDecay {
    fn state(&self) -> Result<StateBlob> {
        Ok(serde_json::to_value(*lock(&self.state))?)
    }

    fn load_state(&self, state: &StateBlob) -> Result<()> {
        *lock(&self.state) = serde_json::from_value(state.clone())?;
        Ok(())
    }
}

impl Scheduler for StepDecay {
    fn step(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.steps += 1;
        if state.steps % self.every == 0 {
            self.optimizer.scale_lr(self.gamma);
            debug!(steps = state.steps, lr = self.optimizer.lr(), "StepDecay::step: decayed");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Params {
    w: f64,
    b: f64,
}

/// `y = w*x + b` trained with mean squared error
#[derive(Debug)]
pub struct LinearModel {
    params: Mutex<Params>,
    mode: Mutex<Mode>,
    optimizer: Arc<Sgd>,
}

impl LinearModel {
    pub fn new(optimizer: Arc<Sgd>) -> Self {
        Self {
            params: Mutex::new(Params { w: 0.0, b: 0.0 }),
            mode: Mutex::new(Mode::Eval),
            optimizer,
        }
    }

    /// Current (weight, bias)
    pub fn params(&self) -> (f64, f64) {
        let p = *lock(&self.params);
        (p.w, p.b)
    }

    pub fn mode(&self) -> Mode {
        *lock(&self.mode)
    }

    fn loss(params: Params, batch: &DemoBatch) -> f64 {
        let n = batch.x.len() as f64;
        batch
            .x
            .iter()
            .zip(&batch.y)
            .map(|(x, y)| {
                let err = params.w * x + params.b - y;
                err * err
            })
            .sum::<f64>()
            / n
    }
}

impl Stateful for LinearModel {
    fn state(&self) -> Result<StateBlob> {
        Ok(serde_json::to_value(*lock(&self.params))?)
    }

    fn load_state(&self, state: &StateBlob) -> Result<()> {
        *lock(&self.params) = serde_json::from_value(state.clone())?;
        Ok(())
    }
}

impl Learner for LinearModel {
    fn set_mode(&self, mode: Mode) {
        *lock(&self.mode) = mode;
    }

    fn train_step(&self, batch: &Batch) -> Result<f64> {
        let batch = DemoBatch::parse(batch)?;
        let lr = self.optimizer.take_step();
        let mut params = lock(&self.params);
        let loss = Self::loss(*params, &batch);

        let n = batch.x.len() as f64;
        let (mut dw, mut db) = (0.0, 0.0);
        for (x, y) in batch.x.iter().zip(&batch.y) {
            let err = params.w * x + params.b - y;
            dw += 2.0 * err * x / n;
            db += 2.0 * err / n;
        }
        params.w -= lr * dw;
        params.b -= lr * db;
        Ok(loss)
    }

    fn eval_step(&self, batch: &Batch) -> Result<f64> {
        let batch = DemoBatch::parse(batch)?;
        Ok(Self::loss(*lock(&self.params), &batch))
    }
}

/// Everything `cr run` needs: two sources and the model trio
pub struct Workload {
    pub train: VecSource,
    pub valid: VecSource,
    pub model: Arc<LinearModel>,
    pub optimizer: Arc<Sgd>,
    pub scheduler: Arc<StepDecay>,
}

impl Workload {
    pub fn from_config(config: &DemoConfig) -> Result<Self> {
        debug!(?config, "Workload::from_config: called");
        if config.batch_size == 0 {
            return Err(Error::config("batch-size must be at least 1"));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let train = VecSource::new(synthetic_batches(&mut rng, config.train_samples, config.batch_size, config.noise));
        let valid = VecSource::new(synthetic_batches(&mut rng, config.valid_samples, config.batch_size, config.noise));

        let optimizer = Arc::new(Sgd::new(config.learning_rate));
        let scheduler = Arc::new(StepDecay::new(Arc::clone(&optimizer), config.gamma, config.decay_every)?);
        let model = Arc::new(LinearModel::new(Arc::clone(&optimizer)));

        Ok(Self {
            train,
            valid,
            model,
            optimizer,
            scheduler,
        })
    }
}

/// Draw `samples` points around the true line, chunked into batches
pub fn synthetic_batches(rng: &mut StdRng, samples: usize, batch_size: usize, noise: f64) -> Vec<Batch> {
    let points: Vec<(f64, f64)> = (0..samples)
        .map(|_| {
            let x: f64 = rng.random_range(-1.0..1.0);
            let jitter: f64 = if noise > 0.0 { rng.random_range(-noise..noise) } else { 0.0 };
            (x, TRUE_WEIGHT * x + TRUE_BIAS + jitter)
        })
        .collect();

    points
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let (x, y): (Vec<f64>, Vec<f64>) = chunk.iter().copied().unzip();
            json!({ "x": x, "y": y })
        })
        .collect()
}
