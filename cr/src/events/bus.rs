//! Event Bus - synchronous, in-order publish/subscribe dispatcher
//!
//! `publish` runs every handler registered for the event's exact kind, in
//! subscription order, and returns only after all of them (and everything
//! they publish in turn) have returned. The handler list is snapshotted
//! before dispatch and the registry lock is released, so handlers may
//! publish, subscribe or detach re-entrantly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;

use super::types::{Event, EventKind};
use super::unit::UnitId;
use crate::error::Result;

/// Handler invoked for every published event of the subscribed kind
pub type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

struct Subscription {
    unit: UnitId,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<EventKind, Vec<Subscription>>,
}

/// Central event bus shared by every unit of a process
///
/// Cheap to clone: clones share one subscription registry.
#[derive(Clone, Default)]
pub struct Bus {
    registry: Arc<Mutex<Registry>>,
}

impl Bus {
    /// Create a new, empty bus
    pub fn new() -> Self {
        debug!("Bus::new: creating event bus");
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Handlers never run under the lock, so a poisoned registry is still consistent
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a handler for `kind` on behalf of `unit`
    pub fn register(&self, unit: UnitId, kind: EventKind, handler: Handler) {
        debug!(?unit, %kind, "Bus::register");
        self.registry()
            .handlers
            .entry(kind)
            .or_default()
            .push(Subscription { unit, handler });
    }

    /// Remove every handler registered by `unit`, returning how many were removed
    pub fn detach(&self, unit: UnitId) -> usize {
        let mut registry = self.registry();
        let mut removed = 0;
        for subs in registry.handlers.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.unit != unit);
            removed += before - subs.len();
        }
        registry.handlers.retain(|_, subs| !subs.is_empty());
        debug!(?unit, removed, "Bus::detach");
        removed
    }

    /// Publish an event to every handler subscribed to its kind
    ///
    /// The first failing handler aborts the dispatch and its error is returned.
    pub fn publish(&self, event: Event) -> Result<()> {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .registry()
            .handlers
            .get(&kind)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();

        debug!(event_type = kind.name(), handlers = handlers.len(), "Bus::publish");
        for handler in handlers {
            handler(&event)?;
        }
        Ok(())
    }

    /// Number of handlers currently registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry().handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Whether two handles point at the same registry
    pub fn same_bus(&self, other: &Bus) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }

    /// Non-owning handle for handlers that need to publish
    ///
    /// Handlers live inside the registry, so holding a strong `Bus` there would
    /// keep the registry alive forever.
    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            registry: Arc::downgrade(&self.registry),
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        let handlers: usize = registry.handlers.values().map(Vec::len).sum();
        f.debug_struct("Bus").field("handlers", &handlers).finish()
    }
}

/// Weak handle to a [`Bus`]
#[derive(Clone)]
pub struct WeakBus {
    registry: Weak<Mutex<Registry>>,
}

impl WeakBus {
    /// Upgrade to a strong handle if the bus still exists
    pub fn upgrade(&self) -> Option<Bus> {
        self.registry.upgrade().map(|registry| Bus { registry })
    }

    /// Publish through the bus; a dropped bus has no subscribers, so this is a no-op
    pub fn publish(&self, event: Event) -> Result<()> {
        match self.upgrade() {
            Some(bus) => bus.publish(event),
            None => Ok(()),
        }
    }
}
