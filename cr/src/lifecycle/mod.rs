//! Nested lifecycles: process -> stage (one per cycle) -> source -> batch
//!
//! Each level publishes start/end events around its children and
//! pre/process/post events around every child it starts. Cancellation is
//! cooperative: a force-stop clears the level's running flag and cascades
//! to the level below; loops check the flag before each iteration.

mod process;
mod source;
mod stage;

pub use process::{Process, SourceSet};
pub use source::{Batch, BatchSource, SourceIterator, VecSource};
pub use stage::Stage;
