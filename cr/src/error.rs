//! Error types for the orchestration core

use thiserror::Error;

use crate::events::EventKind;

/// Errors raised by the bus, the lifecycles and the built-in units
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid schedule: {0}")]
    Schedule(String),

    #[error("Unit '{unit}' is not bound to a bus")]
    NotBound { unit: String },

    #[error("Unit '{unit}' is already bound to another bus")]
    AlreadyBound { unit: String },

    #[error("'{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("Source '{source_name}' produced no batches")]
    EmptySource { source_name: String },

    #[error("Metric '{metric}' was never recorded")]
    UnknownMetric { metric: String },

    #[error("Handler for {event:?} failed: {message}")]
    Handler { event: EventKind, message: String },

    #[error("Checkpoint store error: {0}")]
    Store(#[from] checkstore::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a collaborator failure raised while handling `event`
    pub fn handler(event: EventKind, msg: impl std::fmt::Display) -> Self {
        Self::Handler {
            event,
            message: msg.to_string(),
        }
    }

    /// Configuration errors are fatal and raised before anything runs
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Schedule(_))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
