//! Per-client publish/subscribe registry for lifecycle and data events.
//!
//! Listeners are grouped by [`EventKind`] and invoked in registration order.
//! A panicking listener is isolated: the panic is caught and logged, the
//! remaining listeners still run and the caller never observes it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

use crate::stream::client::ConnectionError;
use crate::stream::proto::Entry;
use crate::stream::transport::CloseInfo;

/// Event kinds a listener can subscribe to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Close => "close",
            Self::Error => "error",
        }
    }
}

/// Payload handed to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Transport opened and the client is now connected.
    Open,
    /// A frame was received and appended to the history.
    Message(Entry),
    /// Transport closed; the connection state has already been updated.
    Close(CloseInfo),
    /// A transport failure or reconnect exhaustion.
    Error(ConnectionError),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
        }
    }
}

type Callback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

struct Registration {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<Registration>>,
}

/// Cloneable handle to a listener registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `kind` and returns its unsubscribe handle.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.entry(kind).or_default().push(Registration {
            id,
            active: Arc::clone(&active),
            callback: Arc::new(callback),
        });

        Subscription {
            kind,
            id,
            active,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invokes every active listener for the event's kind in registration
    /// order. Returns how many listeners completed without panicking.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let kind = event.kind();
        let listeners: Vec<(Arc<AtomicBool>, Callback)> = {
            let registry = self.lock();
            registry
                .listeners
                .get(&kind)
                .map(|registrations| {
                    registrations
                        .iter()
                        .map(|r| (Arc::clone(&r.active), Arc::clone(&r.callback)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut delivered = 0;
        for (active, callback) in listeners {
            // Honors unsubscribes made by earlier listeners in this dispatch.
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event = "listener_panicked", kind = kind.as_str()),
            }
        }
        delivered
    }

    /// Number of live registrations for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let mut map = f.debug_map();
        for (kind, registrations) in &registry.listeners {
            map.entry(&kind.as_str(), &registrations.len());
        }
        map.finish()
    }
}

/// Handle removing exactly one registration. Calling
/// [`Subscription::unsubscribe`] more than once is a no-op.
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    kind: EventKind,
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(registrations) = registry.listeners.get_mut(&self.kind) {
            registrations.retain(|registration| registration.id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
