//! Unit - the base every bus participant is built on
//!
//! A unit owns one bus reference (bound once, at construction or through
//! [`UnitCore::bind`]) and the list of event kinds it subscribed to. Concrete
//! units embed a [`UnitCore`] and implement [`Unit::attach`] to register
//! their handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use super::bus::{Bus, Handler};
use super::types::{Event, EventKind};
use crate::error::{Error, Result};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identity of a unit, used to detach its handlers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitId(u64);

impl UnitId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shared state of every unit: name, identity, bus binding, subscriptions
pub struct UnitCore {
    id: UnitId,
    name: String,
    bus: OnceLock<Bus>,
    subscriptions: Mutex<Vec<EventKind>>,
}

impl UnitCore {
    /// Create an unbound unit
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UnitId::next(),
            name: name.into(),
            bus: OnceLock::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Create a unit bound to `bus` at construction
    pub fn with_bus(name: impl Into<String>, bus: &Bus) -> Self {
        let core = Self::new(name);
        let _ = core.bus.set(bus.clone());
        core
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bound(&self) -> bool {
        self.bus.get().is_some()
    }

    /// Bind to `bus`
    ///
    /// Returns `true` when this call performed the binding, `false` when the
    /// unit was already bound to the same bus.
    pub fn bind(&self, bus: &Bus) -> Result<bool> {
        if let Some(current) = self.bus.get() {
            return self.check_same(current, bus).map(|_| false);
        }
        match self.bus.set(bus.clone()) {
            Ok(()) => {
                debug!(unit = %self.name, "UnitCore::bind: bound to bus");
                Ok(true)
            }
            // Lost a race with another bind; the winner decides
            Err(_) => match self.bus.get() {
                Some(current) => self.check_same(current, bus).map(|_| false),
                None => Ok(false),
            },
        }
    }

    fn check_same(&self, current: &Bus, bus: &Bus) -> Result<()> {
        if current.same_bus(bus) {
            Ok(())
        } else {
            Err(Error::AlreadyBound {
                unit: self.name.clone(),
            })
        }
    }

    /// The bound bus
    pub fn bus(&self) -> Result<&Bus> {
        self.bus.get().ok_or_else(|| Error::NotBound {
            unit: self.name.clone(),
        })
    }

    /// Register `handler` for events of `kind`; returns `self` for chaining
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<&Self>
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let bus = self.bus()?;
        let handler: Handler = Arc::new(handler);
        bus.register(self.id, kind, handler);
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()).push(kind);
        Ok(self)
    }

    /// Publish through the bound bus
    pub fn publish(&self, event: Event) -> Result<()> {
        self.bus()?.publish(event)
    }

    /// Remove every handler this unit registered
    pub fn detach(&self) -> usize {
        let removed = match self.bus.get() {
            Some(bus) => bus.detach(self.id),
            None => 0,
        };
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()).clear();
        removed
    }

    /// Kinds this unit is currently subscribed to, in subscription order
    pub fn subscriptions(&self) -> Vec<EventKind> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl std::fmt::Debug for UnitCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// A participant that can be attached to a process bus
pub trait Unit: Send + Sync {
    fn core(&self) -> &UnitCore;

    /// Bind to `bus` and register this unit's handlers
    fn attach(self: Arc<Self>, bus: &Bus) -> Result<()>;

    fn name(&self) -> &str {
        self.core().name()
    }
}

/// Wrap a method-style handler so the bus only holds a weak reference to the unit
///
/// Once the unit is dropped the handler turns into a no-op.
pub fn weak_handler<U, F>(unit: &Arc<U>, f: F) -> impl Fn(&Event) -> Result<()> + Send + Sync + 'static
where
    U: Send + Sync + 'static,
    F: Fn(&U, &Event) -> Result<()> + Send + Sync + 'static,
{
    let weak = Arc::downgrade(unit);
    move |event| match weak.upgrade() {
        Some(unit) => f(&unit, event),
        None => Ok(()),
    }
}
