//! MetricAggregator - collects raw samples and flushes per-cycle means

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::events::{Bus, Event, EventKind, Unit, UnitCore, weak_handler};

/// metric -> cycle -> source -> aggregated value
pub type MetricTable = BTreeMap<String, BTreeMap<usize, BTreeMap<String, f64>>>;

/// metric -> cycle -> source -> raw samples
pub type RawTable = BTreeMap<String, BTreeMap<usize, BTreeMap<String, Vec<f64>>>>;

/// Which end event triggers a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Flush on every `SourceEnded`
    PerSource,
    /// Flush on every `StageEnded`
    PerCycle,
}

impl FlushTrigger {
    fn event_kind(self) -> EventKind {
        match self {
            FlushTrigger::PerSource => EventKind::SourceEnded,
            FlushTrigger::PerCycle => EventKind::StageEnded,
        }
    }
}

impl FromStr for FlushTrigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per-source" => Ok(FlushTrigger::PerSource),
            "per-cycle" => Ok(FlushTrigger::PerCycle),
            other => Err(Error::config(format!(
                "unknown flush mode '{}' (expected per-source or per-cycle)",
                other
            ))),
        }
    }
}

#[derive(Default)]
struct Tables {
    raw: RawTable,
    aggregated: MetricTable,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Aggregates raw metric samples into per-(metric, cycle, source) means
///
/// Aggregated values are written once and never revised, so a late sample
/// for an already-flushed cycle stays raw.
pub struct MetricAggregator {
    core: UnitCore,

    /// Flush trigger
    trigger: FlushTrigger,

    tables: Mutex<Tables>,
}

impl MetricAggregator {
    pub fn new(trigger: FlushTrigger) -> Self {
        debug!(?trigger, "MetricAggregator::new: called");
        Self {
            core: UnitCore::new("metric-aggregator"),
            trigger,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Build from configuration; an unknown flush mode is a configuration error
    pub fn from_config(config: &MetricsConfig) -> Result<Self> {
        Ok(Self::new(config.flush.parse()?))
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.trigger
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a raw sample
    pub fn record(&self, metric: &str, value: f64, cycle: usize, source: &str) {
        self.tables()
            .raw
            .entry(metric.to_string())
            .or_default()
            .entry(cycle)
            .or_default()
            .entry(source.to_string())
            .or_default()
            .push(value);
    }

    /// Aggregate every metric recorded for `cycle`; returns the whole aggregated table
    pub fn flush(&self, cycle: usize) -> MetricTable {
        let mut tables = self.tables();
        let Tables { raw, aggregated } = &mut *tables;

        let mut written = 0;
        for (metric, cycles) in raw.iter() {
            let Some(sources) = cycles.get(&cycle) else {
                continue;
            };
            let slot = aggregated.entry(metric.clone()).or_default().entry(cycle).or_default();
            for (source, values) in sources {
                if values.is_empty() || slot.contains_key(source) {
                    continue;
                }
                slot.insert(source.clone(), mean(values));
                written += 1;
            }
        }

        debug!(cycle, written, "MetricAggregator::flush: called");
        aggregated.clone()
    }

    /// Aggregate one metric for `cycle`, returning its per-source values
    pub fn aggregate(&self, metric: &str, cycle: usize) -> Result<BTreeMap<String, f64>> {
        let mut tables = self.tables();
        let Tables { raw, aggregated } = &mut *tables;

        let cycles = raw.get(metric).ok_or_else(|| Error::UnknownMetric {
            metric: metric.to_string(),
        })?;
        let Some(sources) = cycles.get(&cycle) else {
            return Ok(BTreeMap::new());
        };
        let slot = aggregated.entry(metric.to_string()).or_default().entry(cycle).or_default();
        for (source, values) in sources {
            if !values.is_empty() && !slot.contains_key(source) {
                slot.insert(source.clone(), mean(values));
            }
        }
        Ok(slot.clone())
    }

    /// Snapshot of the aggregated table
    pub fn aggregated(&self) -> MetricTable {
        self.tables().aggregated.clone()
    }

    /// Raw samples recorded for one (metric, cycle, source)
    pub fn samples(&self, metric: &str, cycle: usize, source: &str) -> Vec<f64> {
        self.tables()
            .raw
            .get(metric)
            .and_then(|cycles| cycles.get(&cycle))
            .and_then(|sources| sources.get(source))
            .cloned()
            .unwrap_or_default()
    }

    fn on_metric(&self, event: &Event) -> Result<()> {
        if let Event::Metric {
            name,
            value,
            cycle,
            source,
            ..
        } = event
        {
            self.record(name, *value, *cycle, source);
        }
        Ok(())
    }

    fn on_end(&self, event: &Event) -> Result<()> {
        let Some(cycle) = event.cycle() else {
            return Ok(());
        };
        let metrics = self.flush(cycle);
        self.core.publish(Event::MetricsFlushed { cycle, metrics })
    }
}

impl Unit for MetricAggregator {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        self.core
            .subscribe(EventKind::Metric, weak_handler(&self, Self::on_metric))?
            .subscribe(self.trigger.event_kind(), weak_handler(&self, Self::on_end))?;
        Ok(())
    }
}
