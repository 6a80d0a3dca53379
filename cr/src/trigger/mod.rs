//! Triggers that react to aggregated metrics

mod early_stop;

pub use early_stop::{EARLY_STOP_REASON, EarlyStopper};
