//! Notifications raised by connections and servers.
//!
//! Each connection or server owns an [`EventHandlers`] registry. Handlers are
//! plain synchronous callbacks invoked on the task that raised the event, in
//! subscription order. Subscribing returns a [`Subscription`]; dropping it (or
//! calling [`Subscription::unsubscribe`]) removes the handler.
//!
//! # Thread Safety
//!
//! `emit` snapshots the handler list under a lock and invokes the handlers
//! outside it, so handlers may subscribe or unsubscribe while a broadcast is
//! in progress. Each handler slot carries an `active` flag that is cleared on
//! revocation and checked right before every call: once `unsubscribe` returns,
//! no later broadcast reaches the handler.

use crate::codec::Message;
use crate::error::WireError;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::error;

/// Address and port of a peer.
///
/// Local channel peers use the channel name as address and port `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Endpoint of a local channel.
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Opaque identifier of a client accepted by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A fault observed by a background loop.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Human-readable description.
    pub message: String,
    /// The error that caused it, if any.
    pub cause: Option<Arc<WireError>>,
}

impl ErrorEvent {
    /// Wrap `cause` with a context message.
    pub fn new(message: impl Into<String>, cause: WireError) -> Self {
        Self {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Notifications raised by a client connection.
///
/// For a single connection they arrive in the order
/// `Connected → (MessageReceived | Error)* → Disconnected`, and
/// `Disconnected` fires exactly once.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected(Endpoint),
    Disconnected(Endpoint),
    MessageReceived(Message),
    Error(ErrorEvent),
}

/// Notifications raised by a server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listener is bound and accepting.
    Listening(Endpoint),
    ClientConnected {
        client: ClientId,
        peer: Endpoint,
    },
    ClientDisconnected {
        client: ClientId,
        peer: Endpoint,
    },
    MessageReceived {
        client: ClientId,
        peer: Endpoint,
        message: Message,
    },
    Error {
        client: Option<ClientId>,
        error: ErrorEvent,
    },
}

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

struct Slot<E> {
    id: u64,
    active: AtomicBool,
    handler: Handler<E>,
}

struct Registry<E> {
    next_id: AtomicU64,
    slots: Mutex<Vec<Arc<Slot<E>>>>,
}

impl<E> Registry<E> {
    fn remove(&self, id: u64) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|slot| slot.id != id);
    }
}

/// Ordered registry of event handlers.
///
/// Cloning yields another handle to the same registry.
pub struct EventHandlers<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for EventHandlers<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E> Default for EventHandlers<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                slots: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<E: 'static> std::fmt::Debug for EventHandlers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("handlers", &self.len())
            .finish()
    }
}

impl<E: 'static> EventHandlers<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`; it stays registered until the returned
    /// subscription is dropped or revoked.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot {
            id,
            active: AtomicBool::new(true),
            handler: Box::new(handler),
        });

        self.registry
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&slot));

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            slot.active.store(false, Ordering::SeqCst);
            if let Some(registry) = registry.upgrade() {
                registry.remove(slot.id);
            }
        })
    }

    /// Invoke every active handler with `event`.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers
    /// still run.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Arc<Slot<E>>> = self
            .registry
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for slot in snapshot {
            if !slot.active.load(Ordering::SeqCst) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (slot.handler)(event))).is_err() {
                error!("Event handler {} panicked; continuing", slot.id);
            }
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.registry
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Revoke = Box<dyn FnOnce() + Send>;

/// Handle to a registered handler.
///
/// Dropping the subscription revokes the handler. Revocation is idempotent.
#[must_use = "dropping a Subscription immediately unsubscribes its handler"]
pub struct Subscription {
    revoke: Mutex<Option<Revoke>>,
}

impl Subscription {
    pub(crate) fn new(revoke: impl FnOnce() + Send + 'static) -> Self {
        Self {
            revoke: Mutex::new(Some(Box::new(revoke))),
        }
    }

    /// Remove the handler. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        let revoke = self
            .revoke
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(revoke) = revoke {
            revoke();
        }
    }

    /// Whether the handler is still registered through this handle.
    pub fn is_active(&self) -> bool {
        self.revoke
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Keep the handler registered for the lifetime of its source.
    pub fn detach(mut self) {
        self.revoke
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
