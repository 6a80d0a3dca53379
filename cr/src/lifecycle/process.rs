//! Process - the outermost lifecycle, one stage per cycle

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::source::SourceIterator;
use super::stage::Stage;
use crate::config::ProcessConfig;
use crate::error::{Error, Result};
use crate::events::{Bus, Event, EventKind, Unit, UnitCore};

/// Which iterators each cycle runs
#[derive(Debug, Clone)]
pub enum SourceSet {
    /// Every cycle runs the same iterators
    Fixed(Vec<Arc<SourceIterator>>),
    /// Threshold cycle -> iterators; a cycle uses the largest threshold not above it
    Scheduled(BTreeMap<usize, Vec<Arc<SourceIterator>>>),
}

impl SourceSet {
    fn validate(&self) -> Result<()> {
        if let SourceSet::Scheduled(schedule) = self {
            match schedule.keys().next() {
                None => return Err(Error::Schedule("schedule has no thresholds".to_string())),
                Some(&first) if first > 1 => {
                    return Err(Error::Schedule(format!(
                        "cycles 1..{} are not covered by any threshold",
                        first
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Largest schedule threshold, 0 for a fixed set
    fn last_threshold(&self) -> usize {
        match self {
            SourceSet::Fixed(_) => 0,
            SourceSet::Scheduled(schedule) => schedule.keys().next_back().copied().unwrap_or(0),
        }
    }

    fn resolve(&self, cycle: usize) -> Result<Vec<Arc<SourceIterator>>> {
        match self {
            SourceSet::Fixed(sources) => Ok(sources.clone()),
            SourceSet::Scheduled(schedule) => schedule
                .range(..=cycle)
                .next_back()
                .map(|(_, sources)| sources.clone())
                .ok_or_else(|| Error::Schedule(format!("no threshold covers cycle {}", cycle))),
        }
    }
}

/// Top-level lifecycle: Idle -> Running -> Ended
///
/// Owns the bus, the attached units and a fresh [`Stage`] per cycle.
pub struct Process {
    core: UnitCore,

    /// Bus shared by every unit of this process
    bus: Bus,

    /// Iterators per cycle
    sources: SourceSet,

    /// max(configured cycles, last schedule threshold)
    cycle_limit: usize,

    /// Step bound passed to every stage
    step_bound: Option<usize>,

    /// Wrap-around flag passed to every stage
    wrap_on_completion: bool,

    /// Cleared by a process-scoped force-stop
    running: Arc<AtomicBool>,

    /// Guards against overlapping starts
    active: AtomicBool,

    /// Last cycle started (or restored by a resume)
    cursor: Arc<AtomicUsize>,

    /// Units kept alive for the lifetime of the process
    units: Mutex<Vec<Arc<dyn Unit>>>,
}

impl Process {
    /// Create a process on a fresh bus
    pub fn new(sources: SourceSet, config: &ProcessConfig) -> Result<Self> {
        Self::with_bus(sources, config, Bus::new())
    }

    /// Create a process on an existing bus
    pub fn with_bus(sources: SourceSet, config: &ProcessConfig, bus: Bus) -> Result<Self> {
        debug!(cycles = config.cycles, steps = ?config.steps_per_cycle, "Process::with_bus: called");
        sources.validate()?;
        let cycle_limit = config.cycles.max(sources.last_threshold());

        let core = UnitCore::with_bus("process", &bus);
        let running = Arc::new(AtomicBool::new(false));
        let cursor = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&running);
        let weak = bus.downgrade();
        core.subscribe(EventKind::ProcessForceStop, move |event| {
            if flag.swap(false, Ordering::SeqCst) {
                if let Event::ProcessForceStop { reason } = event {
                    info!(%reason, "Process force-stopped");
                }
                weak.publish(Event::StageForceStop)?;
            }
            Ok(())
        })?;

        let resume = Arc::clone(&cursor);
        core.subscribe(EventKind::ProcessResume, move |event| {
            if let Event::ProcessResume { cycle_index } = event {
                info!(cycle_index, "Resuming after cycle");
                resume.store(*cycle_index, Ordering::SeqCst);
            }
            Ok(())
        })?;

        Ok(Self {
            core,
            bus,
            sources,
            cycle_limit,
            step_bound: config.steps_per_cycle,
            wrap_on_completion: config.wrap_on_completion,
            running,
            active: AtomicBool::new(false),
            cursor,
            units: Mutex::new(Vec::new()),
        })
    }

    /// Attach a unit to this process's bus and keep it alive
    pub fn add<U: Unit + 'static>(&self, unit: Arc<U>) -> Result<&Self> {
        debug!(unit = %unit.name(), "Process::add: called");
        Arc::clone(&unit).attach(&self.bus)?;
        self.units.lock().unwrap_or_else(|e| e.into_inner()).push(unit);
        Ok(self)
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn cycle_limit(&self) -> usize {
        self.cycle_limit
    }

    /// Last cycle started, 0 before the first
    pub fn current_cycle(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Iterators that run in `cycle`
    pub fn active_sources(&self, cycle: usize) -> Result<Vec<Arc<SourceIterator>>> {
        self.sources.resolve(cycle)
    }

    /// Run cycles until the limit is reached or a force-stop arrives
    pub fn start(&self) -> Result<()> {
        debug!(cycle_limit = self.cycle_limit, "Process::start: called");
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning {
                name: self.core.name().to_string(),
            });
        }

        self.cursor.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        let result = self.run();
        if let Err(e) = &result {
            warn!(error = %e, cycle = self.current_cycle(), "Process aborted");
        }
        self.running.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        result
    }

    fn run(&self) -> Result<()> {
        info!(cycle_limit = self.cycle_limit, "Process started");
        self.core.publish(Event::ProcessStarted {
            cycle_limit: self.cycle_limit,
        })?;

        while self.is_running() {
            let cycle = self.current_cycle() + 1;
            if cycle > self.cycle_limit {
                break;
            }
            self.cursor.store(cycle, Ordering::SeqCst);

            let sources = self.active_sources(cycle)?;
            let names: Vec<String> = sources.iter().map(|s| s.name().to_string()).collect();
            debug!(cycle, sources = ?names, "Process::run: starting cycle");

            self.core.publish(Event::ProcessPreCycle { cycle })?;
            self.core.publish(Event::ProcessCycle { cycle, sources: names })?;

            // Built last: only `start` detaches its force-stop handler
            let stage = Stage::new(cycle, sources, self.step_bound, self.wrap_on_completion, &self.bus)?;
            stage.start()?;
            self.core.publish(Event::ProcessPostCycle { cycle })?;
        }

        let stopped = !self.is_running();
        self.end(stopped)
    }

    fn end(&self, stopped: bool) -> Result<()> {
        let cycle = self.current_cycle();
        info!(cycle, stopped, "Process ended");
        self.running.store(false, Ordering::SeqCst);
        self.core.publish(Event::ProcessEnded { cycle, stopped })
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("cycle_limit", &self.cycle_limit)
            .field("current_cycle", &self.current_cycle())
            .field("running", &self.is_running())
            .finish()
    }
}
