//! CheckStore - tagged checkpoint blob store
//!
//! Persists one snapshot per tag. A tag is a short name such as `last`,
//! `best` or any caller-chosen label; each tag maps to exactly one blob.
//!
//! # Architecture
//!
//! ```text
//! checkpoints/
//! ├── last_checkpoint.json     # <tag><suffix>
//! ├── best_checkpoint.json
//! └── warmup_checkpoint.json
//! ```
//!
//! Blob fields: `model_state`, `optimizer_state`, `scheduler_state`, `cycle_index`.
//! Loading a tag that was never saved yields `None`; that is not an error.
//!
//! # Example
//!
//! ```ignore
//! use checkstore::{CheckpointStore, FileStore, Snapshot};
//!
//! let store = FileStore::open("checkpoints", "_checkpoint.json")?;
//! store.save("last", &snapshot)?;
//! let restored = store.load("last")?;
//! ```

mod error;
mod snapshot;
mod store;

pub use error::{StoreError, StoreResult};
pub use snapshot::{Snapshot, StateBlob};
pub use store::{CheckpointStore, FileStore, MemoryStore, validate_tag};

/// Default file suffix appended to a tag
pub const DEFAULT_SUFFIX: &str = "_checkpoint.json";

/// Tag of the checkpoint written after every cycle
pub const TAG_LAST: &str = "last";

/// Tag of the checkpoint written on validation improvement
pub const TAG_BEST: &str = "best";
