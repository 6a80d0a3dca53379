//! ConsoleReporter - one colored line per cycle plus checkpoint and stop notices

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use colored::Colorize;
use tracing::warn;

use crate::error::Result;
use crate::events::{Bus, Event, EventKind, Unit, UnitCore, weak_handler};
use crate::metric::MetricTable;

/// Prints run progress to a terminal (or any writer)
pub struct ConsoleReporter {
    core: UnitCore,

    out: Mutex<Box<dyn Write + Send>>,

    /// Cycle limit announced at process start
    cycle_limit: AtomicUsize,

    /// Latest summary of the running cycle, printed when its stage ends
    pending: Mutex<Option<(usize, String)>>,
}

impl ConsoleReporter {
    /// Report to stdout
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            core: UnitCore::new("console-reporter"),
            out: Mutex::new(out),
            cycle_limit: AtomicUsize::new(0),
            pending: Mutex::new(None),
        }
    }

    fn line(&self, text: String) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{}", text) {
            warn!(error = %e, "ConsoleReporter: failed to write");
        }
    }

    /// Summary of one cycle: `metric source=value ...` per metric
    fn cycle_summary(cycle: usize, metrics: &MetricTable) -> Option<String> {
        let parts: Vec<String> = metrics
            .iter()
            .filter_map(|(metric, cycles)| {
                let sources = cycles.get(&cycle)?;
                let values: Vec<String> = sources.iter().map(|(s, v)| format!("{}={:.4}", s, v)).collect();
                Some(format!("{} {}", metric.bold(), values.join(" ")))
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("  "))
    }

    fn on_event(&self, event: &Event) -> Result<()> {
        match event {
            Event::ProcessStarted { cycle_limit } => {
                self.cycle_limit.store(*cycle_limit, Ordering::SeqCst);
                self.line(format!("{} running {} cycles", "▶".cyan(), cycle_limit));
            }
            Event::MetricsFlushed { cycle, metrics } => {
                // Per-source flushes arrive several times a cycle; keep the fullest
                if let Some(summary) = Self::cycle_summary(*cycle, metrics) {
                    *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some((*cycle, summary));
                }
            }
            Event::StageEnded { cycle, .. } => {
                let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some((flushed, summary)) = pending
                    && flushed == *cycle
                {
                    let limit = self.cycle_limit.load(Ordering::SeqCst);
                    self.line(format!("cycle {:>3}/{:<3} {}", cycle, limit, summary));
                }
            }
            Event::CheckpointSaved { tag } => {
                self.line(format!("{} saved checkpoint '{}'", "✓".green(), tag));
            }
            Event::CheckpointLoaded { tag, snapshot } => {
                self.line(format!(
                    "{} resumed from '{}' after cycle {}",
                    "↻".cyan(),
                    tag,
                    snapshot.cycle_index
                ));
            }
            Event::ProcessForceStop { reason } => {
                self.line(format!("{} stopping: {}", "■".yellow(), reason));
            }
            Event::ProcessEnded { cycle, stopped } => {
                let verb = if *stopped { "stopped" } else { "finished" };
                self.line(format!("{} {} at cycle {}", "✓".green(), verb, cycle));
            }
            _ => {}
        }
        Ok(())
    }
}

impl Unit for ConsoleReporter {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        for kind in [
            EventKind::ProcessStarted,
            EventKind::MetricsFlushed,
            EventKind::StageEnded,
            EventKind::CheckpointSaved,
            EventKind::CheckpointLoaded,
            EventKind::ProcessForceStop,
            EventKind::ProcessEnded,
        ] {
            self.core.subscribe(kind, weak_handler(&self, Self::on_event))?;
        }
        Ok(())
    }
}
