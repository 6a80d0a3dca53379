//! EarlyStopper - requests a process stop when a metric plateaus

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::config::EarlyStopConfig;
use crate::error::{Error, Result};
use crate::events::{Bus, Event, EventKind, Unit, UnitCore, weak_handler};
use crate::metric::MetricTable;

/// Reason carried by the force-stop this trigger publishes
pub const EARLY_STOP_REASON: &str = "early_stopping";

#[derive(Debug, Default)]
struct Window {
    /// Most recent values, oldest first
    values: VecDeque<f64>,
    /// Last cycle taken from a flush
    last_cycle: usize,
    /// A stop was already requested
    fired: bool,
}

/// Watches one (metric, source) pair across flushes
///
/// A new value is compared with every value in a full window; when all of them
/// lie within `delta` of it the process is asked to stop.
pub struct EarlyStopper {
    core: UnitCore,

    /// Number of values kept
    window: usize,

    /// Plateau tolerance
    delta: f64,

    /// Watched metric
    metric: String,

    /// Watched source
    source: String,

    state: Mutex<Window>,
}

impl std::fmt::Debug for EarlyStopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EarlyStopper")
            .field("core", &self.core)
            .field("window", &self.window)
            .field("delta", &self.delta)
            .field("metric", &self.metric)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl EarlyStopper {
    pub fn new(window: usize, delta: f64, metric: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        if window == 0 {
            return Err(Error::config("early-stop window must be at least 1"));
        }
        if delta.is_nan() || delta < 0.0 {
            return Err(Error::config(format!("early-stop delta must be non-negative, got {}", delta)));
        }
        let metric = metric.into();
        let source = source.into();
        debug!(window, delta, %metric, %source, "EarlyStopper::new: called");
        Ok(Self {
            core: UnitCore::new("early-stopper"),
            window,
            delta,
            metric,
            source,
            state: Mutex::new(Window::default()),
        })
    }

    pub fn from_config(config: &EarlyStopConfig) -> Result<Self> {
        Self::new(config.window, config.delta, &config.metric, &config.source)
    }

    fn state(&self) -> MutexGuard<'_, Window> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Buffered values, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.state().values.iter().copied().collect()
    }

    /// Feed an aggregated table; returns `true` when a plateau is detected
    ///
    /// Only cycles newer than the last one seen are consumed. After the first
    /// detection the buffer is frozen and later flushes are ignored.
    pub fn observe(&self, metrics: &MetricTable) -> bool {
        let Some(cycles) = metrics.get(&self.metric) else {
            return false;
        };

        let mut state = self.state();
        if state.fired {
            return false;
        }

        let last_cycle = state.last_cycle;
        for (&cycle, sources) in cycles.range(last_cycle + 1..) {
            let Some(&value) = sources.get(&self.source) else {
                continue;
            };
            state.last_cycle = cycle;

            let plateau =
                state.values.len() == self.window && state.values.iter().all(|v| (v - value).abs() < self.delta);
            if plateau {
                info!(cycle, value, metric = %self.metric, "Metric plateaued, requesting early stop");
                state.fired = true;
                return true;
            }

            state.values.push_back(value);
            if state.values.len() > self.window {
                state.values.pop_front();
            }
            debug!(cycle, value, buffered = state.values.len(), "EarlyStopper::observe: pushed");
        }
        false
    }

    fn on_flush(&self, event: &Event) -> Result<()> {
        if let Event::MetricsFlushed { metrics, .. } = event
            && self.observe(metrics)
        {
            self.core.publish(Event::ProcessForceStop {
                reason: EARLY_STOP_REASON.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Unit for EarlyStopper {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        self.core
            .subscribe(EventKind::MetricsFlushed, weak_handler(&self, Self::on_flush))?;
        Ok(())
    }
}
