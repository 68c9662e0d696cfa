//! Transport-selecting facades.
//!
//! [`Connection`] and [`Server`] hold at most one live transport variant,
//! chosen by [`TransportKind`]. Every operation is delegated to the held
//! variant, and its notifications are re-raised verbatim on the facade's own
//! handler registry, so subscribers never need to know which transport is in
//! use. Switching the transport tears the old variant down first; two
//! variants are never live for one facade.

use crate::cancel::CancellationToken;
use crate::codec::Message;
use crate::config::ServerOptions;
use crate::connection::{ConnectionState, LocalConnection, TcpConnection};
use crate::events::{ConnectionEvent, Endpoint, EventHandlers, ServerEvent, Subscription};
use crate::server::{LocalServer, TcpServer};
use crate::transport::TransportKind;
use crate::{Result, WireError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

fn ensure_supported(kind: TransportKind) -> Result<()> {
    if kind.is_supported() {
        Ok(())
    } else {
        Err(WireError::unsupported(kind, "this platform"))
    }
}

#[derive(Debug, Clone)]
enum ConnectionVariant {
    Tcp(TcpConnection),
    Local(LocalConnection),
}

impl ConnectionVariant {
    fn new(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Tcp => ConnectionVariant::Tcp(TcpConnection::new()),
            TransportKind::Local => ConnectionVariant::Local(LocalConnection::new()),
        }
    }

    fn subscribe(&self, handlers: EventHandlers<ConnectionEvent>) -> Subscription {
        let forward = move |event: &ConnectionEvent| handlers.emit(event);
        match self {
            ConnectionVariant::Tcp(c) => c.subscribe(forward),
            ConnectionVariant::Local(c) => c.subscribe(forward),
        }
    }

    async fn connect(&self, target: &str, cancel: &CancellationToken) -> Result<()> {
        match self {
            ConnectionVariant::Tcp(c) => c.connect(target, cancel).await,
            ConnectionVariant::Local(c) => c.connect(target, cancel).await,
        }
    }

    async fn send(&self, message: &Message) -> Result<()> {
        match self {
            ConnectionVariant::Tcp(c) => c.send(message).await,
            ConnectionVariant::Local(c) => c.send(message).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            ConnectionVariant::Tcp(c) => c.close().await,
            ConnectionVariant::Local(c) => c.close().await,
        }
    }

    fn state(&self) -> ConnectionState {
        match self {
            ConnectionVariant::Tcp(c) => c.state(),
            ConnectionVariant::Local(c) => c.state(),
        }
    }

    fn remote_endpoint(&self) -> Option<Endpoint> {
        match self {
            ConnectionVariant::Tcp(c) => c.remote_endpoint(),
            ConnectionVariant::Local(c) => c.remote_endpoint(),
        }
    }
}

/// The held variant and the subscription forwarding its events.
struct HeldConnection {
    variant: ConnectionVariant,
    _forward: Subscription,
}

struct ConnectionSlot {
    kind: TransportKind,
    held: Option<HeldConnection>,
}

/// A client connection over a selectable transport.
///
/// A closed variant cannot reconnect; the facade replaces it with a fresh
/// one on the next `connect`, so a `Connection` can be reused indefinitely.
#[derive(Clone)]
pub struct Connection {
    slot: Arc<Mutex<ConnectionSlot>>,
    handlers: EventHandlers<ConnectionEvent>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(TransportKind::default())
    }
}

impl Connection {
    /// Create a facade using `kind`.
    ///
    /// An unsupported kind is accepted here and reported by `connect`.
    pub fn new(kind: TransportKind) -> Self {
        Self {
            slot: Arc::new(Mutex::new(ConnectionSlot { kind, held: None })),
            handlers: EventHandlers::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn held(&self) -> Option<ConnectionVariant> {
        self.lock().held.as_ref().map(|held| held.variant.clone())
    }

    /// The variant to connect with: the held one if still idle, otherwise a
    /// fresh one replacing it.
    fn prepare(&self) -> Result<ConnectionVariant> {
        let mut slot = self.lock();
        ensure_supported(slot.kind)?;

        if let Some(held) = &slot.held {
            match held.variant.state() {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(WireError::AlreadyConnected)
                }
                ConnectionState::Idle => return Ok(held.variant.clone()),
                ConnectionState::Closing | ConnectionState::Closed => {
                    debug!("Replacing closed {} connection", slot.kind);
                }
            }
        }

        let variant = ConnectionVariant::new(slot.kind);
        let forward = variant.subscribe(self.handlers.clone());
        slot.held = Some(HeldConnection {
            variant: variant.clone(),
            _forward: forward,
        });
        Ok(variant)
    }

    /// The selected transport.
    pub fn transport(&self) -> TransportKind {
        self.lock().kind
    }

    /// Select a transport, closing the held variant if the kind changes.
    pub async fn set_transport(&self, kind: TransportKind) -> Result<()> {
        ensure_supported(kind)?;

        let previous = {
            let mut slot = self.lock();
            if slot.kind == kind {
                return Ok(());
            }
            info!("Switching connection transport from {} to {}", slot.kind, kind);
            slot.kind = kind;
            slot.held.take()
        };

        if let Some(held) = previous {
            held.variant.close().await?;
        }
        Ok(())
    }

    /// Connect using the selected transport.
    ///
    /// `target` is `host:port` for TCP or a channel name for local.
    pub async fn connect(&self, target: &str, cancel: &CancellationToken) -> Result<()> {
        self.prepare()?.connect(target, cancel).await
    }

    /// Connect to `host` and `port`. Requires the TCP transport.
    pub async fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let kind = self.transport();
        if kind != TransportKind::Tcp {
            return Err(WireError::unsupported(kind, "connect_tcp"));
        }
        match self.prepare()? {
            ConnectionVariant::Tcp(c) => c.connect_to(host, port, cancel).await,
            ConnectionVariant::Local(_) => {
                Err(WireError::unsupported(TransportKind::Local, "connect_tcp"))
            }
        }
    }

    /// Connect to the local channel `name`. Requires the local transport.
    pub async fn connect_local(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let kind = self.transport();
        if kind != TransportKind::Local {
            return Err(WireError::unsupported(kind, "connect_local"));
        }
        match self.prepare()? {
            ConnectionVariant::Local(c) => c.connect(name, cancel).await,
            ConnectionVariant::Tcp(_) => {
                Err(WireError::unsupported(TransportKind::Tcp, "connect_local"))
            }
        }
    }

    /// Send one message on the held connection.
    ///
    /// Fails with [`WireError::NotConnected`] when nothing is connected.
    pub async fn send(&self, message: &Message) -> Result<()> {
        match self.held() {
            Some(variant) => variant.send(message).await,
            None => Err(WireError::NotConnected),
        }
    }

    /// Close the held variant, if any. Idempotent.
    pub async fn close(&self) -> Result<()> {
        match self.held() {
            Some(variant) => variant.close().await,
            None => Ok(()),
        }
    }

    /// State of the held connection, `Idle` when there is none.
    pub fn state(&self) -> ConnectionState {
        self.held()
            .map(|variant| variant.state())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Whether the held connection is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Peer of the held connection.
    pub fn remote_endpoint(&self) -> Option<Endpoint> {
        self.held().and_then(|variant| variant.remote_endpoint())
    }

    /// Subscribe to events of whichever variant is held, now or later.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.handlers.subscribe(handler)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport())
            .field("held", &self.held())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum ServerVariant {
    Tcp(TcpServer),
    Local(LocalServer),
}

impl ServerVariant {
    fn new(kind: TransportKind, options: ServerOptions) -> Self {
        match kind {
            TransportKind::Tcp => ServerVariant::Tcp(TcpServer::with_options(options)),
            TransportKind::Local => ServerVariant::Local(LocalServer::with_options(options)),
        }
    }

    fn subscribe(&self, handlers: EventHandlers<ServerEvent>) -> Subscription {
        let forward = move |event: &ServerEvent| handlers.emit(event);
        match self {
            ServerVariant::Tcp(s) => s.subscribe(forward),
            ServerVariant::Local(s) => s.subscribe(forward),
        }
    }

    async fn start(&self, target: &str, cancel: &CancellationToken) -> Result<()> {
        match self {
            ServerVariant::Tcp(s) => s.start(target, cancel).await,
            ServerVariant::Local(s) => s.start(target, cancel).await,
        }
    }

    async fn stop(&self) -> Result<()> {
        match self {
            ServerVariant::Tcp(s) => s.stop().await,
            ServerVariant::Local(s) => s.stop().await,
        }
    }

    fn is_running(&self) -> bool {
        match self {
            ServerVariant::Tcp(s) => s.is_running(),
            ServerVariant::Local(s) => s.is_running(),
        }
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        match self {
            ServerVariant::Tcp(s) => s.local_endpoint(),
            ServerVariant::Local(s) => s.local_endpoint(),
        }
    }

    fn client_count(&self) -> usize {
        match self {
            ServerVariant::Tcp(s) => s.client_count(),
            ServerVariant::Local(s) => s.client_count(),
        }
    }
}

struct HeldServer {
    variant: ServerVariant,
    _forward: Subscription,
}

struct ServerSlot {
    kind: TransportKind,
    held: Option<HeldServer>,
}

/// A server over a selectable transport.
#[derive(Clone)]
pub struct Server {
    slot: Arc<Mutex<ServerSlot>>,
    options: ServerOptions,
    handlers: EventHandlers<ServerEvent>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(TransportKind::default())
    }
}

impl Server {
    /// Create a server for `kind` with default options.
    pub fn new(kind: TransportKind) -> Self {
        Self::with_options(kind, ServerOptions::default())
    }

    /// Create a facade whose variants all use `options`.
    pub fn with_options(kind: TransportKind, options: ServerOptions) -> Self {
        Self {
            slot: Arc::new(Mutex::new(ServerSlot { kind, held: None })),
            options,
            handlers: EventHandlers::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn held(&self) -> Option<ServerVariant> {
        self.lock().held.as_ref().map(|held| held.variant.clone())
    }

    fn prepare(&self) -> Result<ServerVariant> {
        let mut slot = self.lock();
        ensure_supported(slot.kind)?;

        if let Some(held) = &slot.held {
            if held.variant.is_running() {
                return Err(WireError::AlreadyRunning);
            }
            return Ok(held.variant.clone());
        }

        let variant = ServerVariant::new(slot.kind, self.options.clone());
        let forward = variant.subscribe(self.handlers.clone());
        slot.held = Some(HeldServer {
            variant: variant.clone(),
            _forward: forward,
        });
        Ok(variant)
    }

    /// The transport the next `start` will use.
    pub fn transport(&self) -> TransportKind {
        self.lock().kind
    }

    /// Select a transport, stopping the held variant if the kind changes.
    pub async fn set_transport(&self, kind: TransportKind) -> Result<()> {
        ensure_supported(kind)?;

        let previous = {
            let mut slot = self.lock();
            if slot.kind == kind {
                return Ok(());
            }
            info!("Switching server transport from {} to {}", slot.kind, kind);
            slot.kind = kind;
            slot.held.take()
        };

        if let Some(held) = previous {
            held.variant.stop().await?;
        }
        Ok(())
    }

    /// Serve on `target` until cancelled or stopped.
    ///
    /// `target` is `host:port` or a bare port for TCP, or a channel name for
    /// local.
    pub async fn start(&self, target: &str, cancel: &CancellationToken) -> Result<()> {
        self.prepare()?.start(target, cancel).await
    }

    /// Stop the held server, if any.
    pub async fn stop(&self) -> Result<()> {
        match self.held() {
            Some(variant) => variant.stop().await,
            None => Ok(()),
        }
    }

    /// Whether the held server is serving.
    pub fn is_running(&self) -> bool {
        self.held().is_some_and(|variant| variant.is_running())
    }

    /// Bound endpoint of the held server while running.
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.held().and_then(|variant| variant.local_endpoint())
    }

    /// Number of clients the held server is serving.
    pub fn client_count(&self) -> usize {
        self.held().map_or(0, |variant| variant.client_count())
    }

    /// Register a handler for server events.
    ///
    /// Events from every transport this facade holds are re-raised here, so
    /// the subscription survives `set_transport`.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.handlers.subscribe(handler)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("transport", &self.transport())
            .field("held", &self.held())
            .finish()
    }
}
