//! Event Bus Architecture for the cycle lifecycle
//!
//! Every lifecycle milestone is published on one bus owned by the process.
//! Units subscribe to the kinds they care about and react by publishing
//! further events; nothing calls another unit directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         EVENT BUS                           │
//! │        (synchronous, depth-first, in subscription order)    │
//! └─────────────────────────────────────────────────────────────┘
//!         ↑                    ↑                    ↑
//!      Process               Stage            SourceIterator
//!      emits:                emits:           emits:
//!      - ProcessStarted      - StageStarted   - SourceStarted
//!      - ProcessPreCycle     - StageSource    - BatchStarted
//!      - ProcessEnded        - StageEnded     - SourceEnded
//!
//!         ↓                    ↓                    ↓
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ ModelManager │   │ Aggregator   │   │ Coordinator  │   │ Reporters    │
//! │ (loss)       │   │ (flush)      │   │ (save/load)  │   │ (jsonl/tty)  │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use cyclerun::events::{Bus, Event, EventKind, UnitCore};
//!
//! let bus = Bus::new();
//! let unit = UnitCore::with_bus("printer", &bus);
//! unit.subscribe(EventKind::StageStarted, |event| {
//!     println!("{:?}", event);
//!     Ok(())
//! })?;
//! bus.publish(Event::StageStarted { cycle: 1 })?;
//! ```

mod bus;
mod types;
mod unit;

pub use bus::{Bus, Handler, WeakBus};
pub use types::{Event, EventKind, EventLogEntry};
pub use unit::{Unit, UnitCore, UnitId, weak_handler};
