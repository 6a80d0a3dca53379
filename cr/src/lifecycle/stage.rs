//! Stage - one cycle's pass over its active sources

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::source::SourceIterator;
use crate::error::Result;
use crate::events::{Bus, Event, EventKind, UnitCore};

/// Runs each source iterator of one cycle in order
///
/// Built fresh for every cycle; it borrows the shared iterators but does not
/// own their lifetime. Its subscriptions are dropped from the bus when it ends.
pub struct Stage {
    core: UnitCore,

    /// 1-based cycle this stage runs
    cycle: usize,

    /// Iterators to start, in order
    sources: Vec<Arc<SourceIterator>>,

    /// Step bound passed to every iterator
    step_bound: Option<usize>,

    /// Wrap-around flag passed to every iterator
    wrap_on_completion: bool,

    /// Cleared by a stage-scoped force-stop
    running: Arc<AtomicBool>,
}

impl Stage {
    /// Create a stage for `cycle` bound to `bus`
    pub fn new(
        cycle: usize,
        sources: Vec<Arc<SourceIterator>>,
        step_bound: Option<usize>,
        wrap_on_completion: bool,
        bus: &Bus,
    ) -> Result<Self> {
        debug!(cycle, sources = sources.len(), ?step_bound, "Stage::new: called");
        let core = UnitCore::with_bus(format!("stage-{}", cycle), bus);
        let running = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&running);
        let weak = bus.downgrade();
        core.subscribe(EventKind::StageForceStop, move |_| {
            if flag.swap(false, Ordering::SeqCst) {
                info!(cycle, "Stage force-stopped");
                weak.publish(Event::SourceForceStop)?;
            }
            Ok(())
        })?;

        Ok(Self {
            core,
            cycle,
            sources,
            step_bound,
            wrap_on_completion,
            running,
        })
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Names of the sources this stage runs, in order
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every source in order, then end
    pub fn start(&self) -> Result<()> {
        debug!(cycle = self.cycle, "Stage::start: called");
        self.running.store(true, Ordering::SeqCst);
        let result = self.run();
        self.running.store(false, Ordering::SeqCst);
        self.core.detach();
        result
    }

    fn run(&self) -> Result<()> {
        let bus = self.core.bus()?;
        self.core.publish(Event::StageStarted { cycle: self.cycle })?;

        for source in &self.sources {
            if !self.is_running() {
                break;
            }
            let name = source.name().to_string();
            self.core.publish(Event::StagePreSource {
                cycle: self.cycle,
                source: name.clone(),
            })?;
            self.core.publish(Event::StageSource {
                cycle: self.cycle,
                source: name.clone(),
            })?;
            source.start(self.cycle, self.step_bound, self.wrap_on_completion, bus)?;
            self.core.publish(Event::StagePostSource {
                cycle: self.cycle,
                source: name,
            })?;
        }

        let stopped = !self.is_running();
        self.end(stopped)
    }

    fn end(&self, stopped: bool) -> Result<()> {
        debug!(cycle = self.cycle, stopped, "Stage::end: called");
        self.running.store(false, Ordering::SeqCst);
        self.core.publish(Event::StageEnded {
            cycle: self.cycle,
            stopped,
        })
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("cycle", &self.cycle)
            .field("sources", &self.source_names())
            .field("running", &self.is_running())
            .finish()
    }
}
