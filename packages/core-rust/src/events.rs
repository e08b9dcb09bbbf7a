//! Minimal publish/subscribe fabric for storage notifications.
//!
//! Defines [`StorageEvent`], the [`Listener`] callback type, and
//! [`EventEmitter`], which fans an event out to every registered listener.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The key now holds a (possibly unchanged) record and should be re-read.
    Updated,
    /// The key no longer holds a record.
    Removed,
}

/// Notification delivered to listeners.
///
/// For engine-wide listeners `key` is the physical key. For item listeners it
/// is the item's key: the physical key of a plain item, or the logical name
/// of an option item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key the event refers to.
    pub key: String,
    /// Kind of change.
    pub kind: EventKind,
}

impl StorageEvent {
    /// Creates an `Updated` event.
    #[must_use]
    pub fn updated(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: EventKind::Updated,
        }
    }

    /// Creates a `Removed` event.
    #[must_use]
    pub fn removed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: EventKind::Removed,
        }
    }
}

/// Subscriber callback. Identity is the `Arc` allocation, so keep the `Arc`
/// around to unsubscribe later.
pub type Listener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

/// Wraps a closure into a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&StorageEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Set of listeners with snapshot emission.
///
/// Emission works on a copy of the listener list, so listeners may subscribe
/// or unsubscribe (themselves or others) while an event is being delivered.
/// A panicking listener is contained and the remaining listeners still run.
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Vec<Listener>>,
}

impl EventEmitter {
    /// Creates an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. A listener already present is not added twice.
    pub fn on(&self, listener: Listener) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregisters `listener`. Unknown listeners are ignored.
    pub fn off(&self, listener: &Listener) {
        let mut listeners = self.listeners.lock();
        if let Some(pos) = listeners.iter().position(|l| same_listener(l, listener)) {
            listeners.remove(pos);
        }
    }

    /// Delivers `event` to every listener registered at the time of the call.
    pub fn emit(&self, event: &StorageEvent) {
        let snapshot: Vec<Listener> = self.listeners.lock().clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(key = %event.key, kind = ?event.kind, "storage listener panicked");
            }
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.len())
            .finish()
    }
}
