//! Reporters - units that only observe
//!
//! - [`JsonlReporter`] persists every event of a run to a JSONL file
//! - [`ConsoleReporter`] prints per-cycle progress

mod console;
mod jsonl;

pub use console::ConsoleReporter;
pub use jsonl::{EVENTS_FILE, JsonlReporter, read_run_events};
