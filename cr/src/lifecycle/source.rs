//! SourceIterator - drives one restartable batch source through a run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{Bus, Event, EventKind, Unit, UnitCore};

/// Opaque batch payload handed to subscribers
pub type Batch = serde_json::Value;

/// A restartable sequence of batches
pub trait BatchSource: Send {
    /// Pull the next batch, `None` when the source is exhausted
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Restart from the first batch
    fn rewind(&mut self) -> Result<()>;
}

/// In-memory batch source over a fixed list
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    batches: Vec<Batch>,
    position: usize,
}

impl VecSource {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl BatchSource for VecSource {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let batch = self.batches.get(self.position).cloned();
        if batch.is_some() {
            self.position += 1;
        }
        Ok(batch)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// Mutable iteration state, locked only while pulling
struct Cursor {
    /// The wrapped source
    source: Box<dyn BatchSource>,

    /// Batches emitted during the current run
    step: usize,

    /// 1-based position of the next batch within the current pass
    batch_index: usize,

    /// Step bound of the current run
    step_bound: Option<usize>,

    /// Whether the current run rewinds the source when it ends
    wrap_on_completion: bool,
}

/// One pulled batch plus the counters it is published with
struct Pulled {
    batch: Batch,
    step: usize,
    batch_index: usize,
}

/// Drives a [`BatchSource`]: Idle -> Running -> Ended, restartable
///
/// Shared across stages; the batch index survives between runs so a bounded
/// run without wrap-around continues where the previous one stopped.
pub struct SourceIterator {
    core: UnitCore,

    /// Cleared by a source-scoped force-stop
    running: Arc<AtomicBool>,

    /// Guards against overlapping starts
    active: AtomicBool,

    cursor: Mutex<Cursor>,
}

impl SourceIterator {
    /// Create an iterator named `name` over `source`
    pub fn new(name: impl Into<String>, source: impl BatchSource + 'static) -> Self {
        let name = name.into();
        debug!(%name, "SourceIterator::new: called");
        Self {
            core: UnitCore::new(name),
            running: Arc::new(AtomicBool::new(false)),
            active: AtomicBool::new(false),
            cursor: Mutex::new(Cursor {
                source: Box::new(source),
                step: 0,
                batch_index: 1,
                step_bound: None,
                wrap_on_completion: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Batches emitted during the current (or last) run
    pub fn step(&self) -> usize {
        self.cursor().step
    }

    /// Batch index the next pull will carry
    pub fn batch_index(&self) -> usize {
        self.cursor().batch_index
    }

    pub fn step_bound(&self) -> Option<usize> {
        self.cursor().step_bound
    }

    pub fn wrap_on_completion(&self) -> bool {
        self.cursor().wrap_on_completion
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind to `bus`, subscribing to source-scoped force-stops on first bind
    pub fn bind(&self, bus: &Bus) -> Result<()> {
        if self.core.bind(bus)? {
            let running = Arc::clone(&self.running);
            let name = self.core.name().to_string();
            self.core.subscribe(EventKind::SourceForceStop, move |_| {
                if running.swap(false, Ordering::SeqCst) {
                    info!(source = %name, "Source force-stopped");
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Run one pass over the source for `cycle`
    ///
    /// With a step bound exactly `bound` batches are emitted, rewinding the
    /// source whenever it runs dry. Without one the source is drained once.
    pub fn start(&self, cycle: usize, step_bound: Option<usize>, wrap_on_completion: bool, bus: &Bus) -> Result<()> {
        debug!(source = %self.name(), cycle, ?step_bound, wrap_on_completion, "SourceIterator::start: called");
        self.bind(bus)?;

        if self.active.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning {
                name: self.name().to_string(),
            });
        }

        {
            let mut cursor = self.cursor();
            cursor.step = 0;
            cursor.step_bound = step_bound;
            cursor.wrap_on_completion = wrap_on_completion;
        }

        self.running.store(true, Ordering::SeqCst);
        let result = self.run(cycle, step_bound, wrap_on_completion);
        self.running.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        result
    }

    fn run(&self, cycle: usize, step_bound: Option<usize>, wrap_on_completion: bool) -> Result<()> {
        self.core.publish(Event::SourceStarted {
            source: self.name().to_string(),
            cycle,
            step_bound,
            wrap_on_completion,
        })?;

        while self.is_running() {
            let Some(pulled) = self.pull()? else {
                break;
            };

            self.core.publish(Event::BatchStarted {
                source: self.name().to_string(),
                cycle,
                step: pulled.step,
                batch_index: pulled.batch_index,
                batch: pulled.batch,
            })?;
            self.core.publish(Event::BatchEnded {
                source: self.name().to_string(),
                cycle,
                step: pulled.step,
                batch_index: pulled.batch_index,
            })?;

            self.cursor().batch_index += 1;
        }

        let stopped = !self.is_running();
        if wrap_on_completion {
            let mut cursor = self.cursor();
            cursor.source.rewind()?;
            cursor.batch_index = 1;
        }

        self.end(cycle, stopped)
    }

    /// Pull the next batch, `None` when the run is over
    fn pull(&self) -> Result<Option<Pulled>> {
        let mut cursor = self.cursor();
        let step = cursor.step + 1;
        if let Some(bound) = cursor.step_bound
            && step > bound
        {
            return Ok(None);
        }

        let batch = match cursor.source.next_batch()? {
            Some(batch) => batch,
            None => {
                cursor.source.rewind()?;
                cursor.batch_index = 1;
                if cursor.step_bound.is_none() {
                    debug!(source = %self.name(), steps = cursor.step, "SourceIterator::pull: source exhausted");
                    return Ok(None);
                }
                match cursor.source.next_batch()? {
                    Some(batch) => batch,
                    None => {
                        return Err(Error::EmptySource {
                            source_name: self.name().to_string(),
                        });
                    }
                }
            }
        };

        cursor.step = step;
        Ok(Some(Pulled {
            batch,
            step,
            batch_index: cursor.batch_index,
        }))
    }

    fn end(&self, cycle: usize, stopped: bool) -> Result<()> {
        let (steps, batch_index, step_bound, wrap_on_completion) = {
            let cursor = self.cursor();
            (cursor.step, cursor.batch_index, cursor.step_bound, cursor.wrap_on_completion)
        };
        debug!(source = %self.name(), cycle, steps, stopped, "SourceIterator::end: called");
        self.core.publish(Event::SourceEnded {
            source: self.name().to_string(),
            cycle,
            steps,
            batch_index,
            step_bound,
            wrap_on_completion,
            stopped,
        })
    }
}

impl Unit for SourceIterator {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.bind(bus)
    }
}

impl std::fmt::Debug for SourceIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceIterator")
            .field("name", &self.name())
            .field("running", &self.is_running())
            .finish()
    }
}
