//! Handler registration and event fan-out for one scope.
//!
//! Each open scope owns a [`ScopeHandlers`] set shared between the
//! multiplexer (which registers and removes handlers) and the scope's
//! connection task (which dispatches inbound events and reports
//! connection-state transitions).
//!
//! Dispatch invariants:
//! - handlers run synchronously, in registration order;
//! - a panicking handler is isolated and never blocks the rest;
//! - connection-state observers are independent of message handlers
//!   and only fire on actual connected/disconnected transitions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::messages::ChannelEvent;

/// Identifier returned on registration, used to unregister later.
pub type HandlerId = u64;

/// An event consumer. Invoked for every decoded event on the scope's
/// connection; expected to do its own kind/scope filtering.
pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// A connection-state observer. Receives `true` on connect and `false`
/// on disconnect.
pub type ConnectionObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// The handler set for one scope.
pub struct ScopeHandlers {
    inner: Mutex<Inner>,
}

struct Inner {
    next_id: HandlerId,
    handlers: Vec<(HandlerId, EventHandler)>,
    observers: Vec<ConnectionObserver>,
    connected: bool,
}

impl ScopeHandlers {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                handlers: Vec::new(),
                observers: Vec::new(),
                connected: false,
            }),
        }
    }

    /// Register a handler; returns the id needed to remove it.
    pub fn register(&self, handler: EventHandler) -> HandlerId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.push((id, handler));
        id
    }

    /// Unregister the given handlers. Returns how many remain, so the
    /// multiplexer can close the connection when the set empties.
    pub fn remove(&self, ids: &[HandlerId]) -> usize {
        let mut inner = self.lock();
        inner.handlers.retain(|(id, _)| !ids.contains(id));
        inner.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().handlers.is_empty()
    }

    /// Register a connection-state observer. Observers are only ever
    /// cleared when the scope itself is dropped.
    pub fn observe(&self, observer: ConnectionObserver) {
        self.lock().observers.push(observer);
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Record a connection-state transition and notify observers.
    /// Redundant calls (same state twice) notify nobody.
    pub fn set_connected(&self, connected: bool) {
        let observers = {
            let mut inner = self.lock();
            if inner.connected == connected {
                return;
            }
            inner.connected = connected;
            inner.observers.clone()
        };
        for observer in observers {
            observer(connected);
        }
    }

    /// Invoke every currently-registered handler with `event`, in
    /// registration order.
    ///
    /// The handler list is snapshotted before iterating, so a handler
    /// that registers or removes handlers does not deadlock; additions
    /// take effect from the next event.
    pub fn dispatch(&self, event: &ChannelEvent) {
        let handlers: Vec<(HandlerId, EventHandler)> = self.lock().handlers.clone();
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    handler_id = id,
                    kind = %event.kind,
                    "Event handler panicked; continuing with remaining handlers",
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic while holding it; the data is
        // plain registration state, still safe to use.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ScopeHandlers {
    fn default() -> Self {
        Self::new()
    }
}
