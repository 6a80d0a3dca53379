//! JsonlReporter - persists every event of a run to a JSONL file
//!
//! Events are written to `{runs_dir}/{run-id}/events.jsonl`, one
//! timestamped entry per line, for history, debugging and replay.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{Bus, Event, EventKind, EventLogEntry, Unit, UnitCore, weak_handler};

/// File name of the event log inside a run directory
pub const EVENTS_FILE: &str = "events.jsonl";

/// Event logger unit that writes every event to the run's JSONL file
pub struct JsonlReporter {
    core: UnitCore,

    /// Base directory for run data
    runs_dir: PathBuf,

    /// Identifier of this run (UUID v7, time-ordered)
    run_id: String,

    /// Open writer, created on the first event
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlReporter {
    /// Create a reporter for a fresh run under `runs_dir`
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        Self::with_run_id(runs_dir, Uuid::now_v7().to_string())
    }

    pub fn with_run_id(runs_dir: impl AsRef<Path>, run_id: impl Into<String>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        let run_id = run_id.into();
        debug!(?runs_dir, %run_id, "JsonlReporter::new: creating reporter");
        Self {
            core: UnitCore::new("jsonl-reporter"),
            runs_dir,
            run_id,
            writer: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Path of this run's event log
    pub fn log_path(&self) -> PathBuf {
        self.runs_dir.join(&self.run_id).join(EVENTS_FILE)
    }

    fn writer(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one event to the log
    pub fn write_event(&self, event: &Event) -> Result<()> {
        let mut guard = self.writer();
        if guard.is_none() {
            let log_path = self.log_path();
            if let Some(dir) = log_path.parent() {
                fs::create_dir_all(dir)?;
            }
            debug!(?log_path, "JsonlReporter: creating new log file");
            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            *guard = Some(BufWriter::new(file));
        }

        if let Some(writer) = guard.as_mut() {
            let entry = EventLogEntry::new(event.clone());
            let json = serde_json::to_string(&entry)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and close the log
    pub fn close(&self) {
        debug!(run_id = %self.run_id, "JsonlReporter::close");
        if let Some(mut writer) = self.writer().take() {
            let _ = writer.flush();
        }
    }

    fn on_event(&self, event: &Event) -> Result<()> {
        if let Err(e) = self.write_event(event) {
            error!(run_id = %self.run_id, error = %e, "JsonlReporter: failed to write event");
        }
        if event.kind() == EventKind::ProcessEnded {
            self.close();
        }
        Ok(())
    }
}

impl Unit for JsonlReporter {
    fn core(&self) -> &UnitCore {
        &self.core
    }

    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()> {
        self.core.bind(bus)?;
        for kind in EventKind::ALL {
            self.core.subscribe(kind, weak_handler(&self, Self::on_event))?;
        }
        Ok(())
    }
}

/// Read the entries of a run's event log as JSON values
pub fn read_run_events(runs_dir: impl AsRef<Path>, run_id: &str) -> Result<Vec<serde_json::Value>> {
    let log_path = runs_dir.as_ref().join(run_id).join(EVENTS_FILE);
    debug!(?log_path, "read_run_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_run_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_run_events: loaded entries");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_event() {
        let temp = tempdir().unwrap();
        let reporter = JsonlReporter::with_run_id(temp.path(), "run-1");

        reporter.write_event(&Event::StageStarted { cycle: 1 }).unwrap();

        let log_path = temp.path().join("run-1").join(EVENTS_FILE);
        assert!(log_path.exists());
        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("StageStarted"));
    }

    #[test]
    fn test_attached_reporter_logs_everything() {
        let temp = tempdir().unwrap();
        let bus = Bus::new();
        let reporter = Arc::new(JsonlReporter::with_run_id(temp.path(), "run-2"));
        Arc::clone(&reporter).attach(&bus).unwrap();

        bus.publish(Event::ProcessStarted { cycle_limit: 2 }).unwrap();
        bus.publish(Event::StageStarted { cycle: 1 }).unwrap();
        bus.publish(Event::ProcessEnded {
            cycle: 1,
            stopped: false,
        })
        .unwrap();

        let entries = read_run_events(temp.path(), "run-2").unwrap();
        let types: Vec<&str> = entries.iter().filter_map(|e| e["event"]["type"].as_str()).collect();
        assert_eq!(types, vec!["ProcessStarted", "StageStarted", "ProcessEnded"]);
        assert!(entries.iter().all(|e| e.get("ts").is_some()));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let temp = tempdir().unwrap();
        let a = JsonlReporter::new(temp.path());
        let b = JsonlReporter::new(temp.path());
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn test_read_missing_run_is_empty() {
        let temp = tempdir().unwrap();
        assert!(read_run_events(temp.path(), "nope").unwrap().is_empty());
    }
}
