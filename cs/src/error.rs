//! Store error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while saving or loading checkpoints
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid checkpoint tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("Failed to access checkpoint {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed checkpoint {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
