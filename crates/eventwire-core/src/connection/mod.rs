//! Client connections.
//!
//! A connection owns exactly one duplex stream. `connect` establishes it and
//! spawns a background receive loop that turns incoming frames into
//! [`ConnectionEvent`]s; `send` writes frames; `close` tears everything down.
//!
//! # Thread Safety
//!
//! Connections are cheap to clone and every clone drives the same stream.
//! The lifecycle state, the stored writer and the disconnect latch live under
//! one `std::sync::Mutex`, which is never held across an `.await`. Writes are
//! serialized by a tokio `Mutex` around the write half. Dropping the last
//! clone cancels the receive loop, which still raises `Disconnected`.

mod local;
mod tcp;

pub use local::LocalConnection;
pub use tcp::TcpConnection;

use crate::cancel::{CancellationToken, DropGuard};
use crate::codec::{self, Message};
use crate::config::WireConfig;
use crate::events::{ConnectionEvent, Endpoint, ErrorEvent, EventHandlers, Subscription};
use crate::transport::{BoxedReader, BoxedWriter, Link, TransportKind};
use crate::{Result, WireError};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

type SharedWriter = Arc<AsyncMutex<BoxedWriter>>;

struct Status {
    state: ConnectionState,
    endpoint: Option<Endpoint>,
    writer: Option<SharedWriter>,
    receive_task: Option<JoinHandle<()>>,
    connected_raised: bool,
    disconnect_fired: bool,
}

impl Status {
    /// Trip the one-shot disconnect latch.
    ///
    /// Returns the endpoint to report if `Disconnected` should fire now.
    fn take_disconnect(&mut self) -> Option<Endpoint> {
        if self.connected_raised && !self.disconnect_fired {
            self.disconnect_fired = true;
            self.endpoint.clone()
        } else {
            None
        }
    }
}

struct Shared {
    transport: TransportKind,
    status: Mutex<Status>,
    /// Held while `Connected` is published and while `close` runs, so the
    /// two never interleave.
    transition: AsyncMutex<()>,
    shutdown: CancellationToken,
    handlers: EventHandlers<ConnectionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, peer: &Endpoint, context: &str, error: WireError) {
        warn!("{} from {}: {}", context, peer, error);
        self.handlers
            .emit(&ConnectionEvent::Error(ErrorEvent::new(context, error)));
    }

    fn raise_disconnected(&self, endpoint: Option<Endpoint>) {
        if let Some(peer) = endpoint {
            info!("{} connection to {} closed", self.transport, peer);
            self.handlers.emit(&ConnectionEvent::Disconnected(peer));
        }
    }

    async fn receive_loop(
        self: Arc<Self>,
        reader: BoxedReader,
        peer: Endpoint,
        token: CancellationToken,
    ) {
        let mut reader = BufReader::with_capacity(WireConfig::READ_BUFFER_BYTES, reader);
        let mut buf = Vec::with_capacity(WireConfig::READ_BUFFER_BYTES);

        loop {
            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => Err(WireError::Cancelled),
                _ = self.shutdown.cancelled() => Err(WireError::Cancelled),
                result = codec::read_frame(&mut reader, &mut buf, WireConfig::MAX_FRAME_BYTES) => result,
            };

            let line = match frame {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Peer {} closed the stream", peer);
                    break;
                }
                Err(e) if e.is_cancellation() => {
                    debug!("Receive loop for {} cancelled", peer);
                    break;
                }
                Err(e) => {
                    self.report(&peer, "Receive failed", e);
                    break;
                }
            };

            match codec::decode(&line) {
                Ok(message) => self
                    .handlers
                    .emit(&ConnectionEvent::MessageReceived(message)),
                Err(e) => {
                    // No resynchronization after a bad frame.
                    self.report(&peer, "Malformed envelope", e);
                    break;
                }
            }
        }

        let endpoint = {
            let mut status = self.lock();
            if status.state == ConnectionState::Connected {
                status.state = ConnectionState::Closed;
                status.writer = None;
            }
            status.take_disconnect()
        };
        self.raise_disconnected(endpoint);
    }
}

/// Transport-independent connection machinery shared by
/// [`TcpConnection`] and [`LocalConnection`].
#[derive(Clone)]
pub(crate) struct ConnectionCore {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl ConnectionCore {
    pub fn new(transport: TransportKind) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            shared: Arc::new(Shared {
                transport,
                status: Mutex::new(Status {
                    state: ConnectionState::Idle,
                    endpoint: None,
                    writer: None,
                    receive_task: None,
                    connected_raised: false,
                    disconnect_fired: false,
                }),
                transition: AsyncMutex::new(()),
                shutdown: shutdown.clone(),
                handlers: EventHandlers::new(),
            }),
            _guard: Arc::new(shutdown.drop_guard()),
        }
    }

    /// Establish the stream produced by `open`.
    ///
    /// Target parsing happens inside `open`, so lifecycle errors
    /// (`AlreadyConnected`, `Closed`) take precedence over target errors.
    pub async fn connect<F>(&self, open: F, cancel: &CancellationToken) -> Result<()>
    where
        F: Future<Output = Result<Link>>,
    {
        {
            let mut status = self.shared.lock();
            match status.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(WireError::AlreadyConnected)
                }
                ConnectionState::Closing | ConnectionState::Closed => {
                    return Err(WireError::Closed)
                }
                ConnectionState::Idle => {}
            }
            cancel.check()?;
            status.state = ConnectionState::Connecting;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WireError::Cancelled),
            _ = self.shared.shutdown.cancelled() => Err(WireError::Cancelled),
            result = open => result,
        };

        let Link {
            reader,
            writer,
            peer,
        } = match outcome {
            Ok(link) => link,
            Err(e) => {
                let mut status = self.shared.lock();
                if status.state == ConnectionState::Connecting {
                    status.state = ConnectionState::Idle;
                }
                if e.is_cancellation() {
                    debug!("{} connect cancelled", self.shared.transport);
                } else {
                    debug!("{} connect failed: {}", self.shared.transport, e);
                }
                return Err(e);
            }
        };

        let _transition = self.shared.transition.lock().await;
        {
            let mut status = self.shared.lock();
            if status.state != ConnectionState::Connecting {
                debug!("Connection to {} closed while connecting", peer);
                return Err(WireError::Cancelled);
            }
            status.state = ConnectionState::Connected;
            status.endpoint = Some(peer.clone());
            status.writer = Some(Arc::new(AsyncMutex::new(writer)));
            status.connected_raised = true;
        }

        info!("{} connection established to {}", self.shared.transport, peer);
        self.shared
            .handlers
            .emit(&ConnectionEvent::Connected(peer.clone()));

        let mut status = self.shared.lock();
        if status.state == ConnectionState::Connected {
            let shared = Arc::clone(&self.shared);
            let token = cancel.child_token();
            status.receive_task = Some(tokio::spawn(shared.receive_loop(reader, peer, token)));
        }
        Ok(())
    }

    /// Write one message as a frame.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let writer = {
            let status = self.shared.lock();
            match (&status.state, &status.writer) {
                (ConnectionState::Connected, Some(writer)) => Arc::clone(writer),
                _ => return Err(WireError::NotConnected),
            }
        };

        let frame = codec::encode(message)?;
        let mut writer = writer.lock().await;
        self.shared
            .shutdown
            .run_until_cancelled(codec::write_frame(&mut *writer, &frame))
            .await
            .map_err(|_| WireError::Closed)?
    }

    /// Close the connection. Safe to call any number of times.
    pub async fn close(&self) -> Result<()> {
        let _transition = self.shared.transition.lock().await;
        let (writer, task) = {
            let mut status = self.shared.lock();
            if matches!(
                status.state,
                ConnectionState::Closing | ConnectionState::Closed
            ) {
                return Ok(());
            }
            status.state = ConnectionState::Closing;
            (status.writer.take(), status.receive_task.take())
        };

        self.shared.shutdown.cancel();

        if let Some(writer) = writer {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!("Shutting down {} writer failed: {}", self.shared.transport, e);
            }
        }

        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Receive loop panicked: {}", e);
                }
            }
        }

        let endpoint = {
            let mut status = self.shared.lock();
            status.state = ConnectionState::Closed;
            status.take_disconnect()
        };
        self.shared.raise_disconnected(endpoint);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn remote_endpoint(&self) -> Option<Endpoint> {
        self.shared.lock().endpoint.clone()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.handlers.subscribe(handler)
    }
}

impl std::fmt::Debug for ConnectionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.shared.transport)
            .field("state", &self.state())
            .field("remote", &self.remote_endpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    fn link_pair() -> (Link, DuplexStream) {
        let (client, peer) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(client);
        let link = Link {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: Endpoint::new("test-peer", 1),
        };
        (link, peer)
    }

    fn record(core: &ConnectionCore) -> (mpsc::UnboundedReceiver<ConnectionEvent>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = core.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (rx, sub)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_raises_connected_then_messages() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let (mut rx, _sub) = record(&core);
        let (link, mut peer) = link_pair();

        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();
        assert!(core.is_connected());
        assert_eq!(core.remote_endpoint(), Some(Endpoint::new("test-peer", 1)));

        peer.write_all(b"{\"eventName\":\"Ping\",\"payload\":\"Pong\"}\n")
            .await
            .unwrap();

        assert!(matches!(next(&mut rx).await, ConnectionEvent::Connected(_)));
        match next(&mut rx).await {
            ConnectionEvent::MessageReceived(message) => {
                assert_eq!(message, Message::new("Ping", "Pong"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        core.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_writes_frame() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let (link, peer) = link_pair();
        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();

        core.send(&Message::new("E", "Data")).await.unwrap();

        let mut line = String::new();
        tokio::io::BufReader::new(peer)
            .read_line(&mut line)
            .await
            .unwrap();
        assert_eq!(line, "{\"eventName\":\"E\",\"payload\":\"Data\"}\n");

        core.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let err = core.send(&Message::new("E", "")).await.unwrap_err();
        assert!(matches!(err, WireError::NotConnected));
    }

    #[tokio::test]
    async fn test_malformed_frame_errors_once_then_disconnects() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let (mut rx, _sub) = record(&core);
        let (link, mut peer) = link_pair();
        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();

        peer.write_all(b"not-json\n{\"eventName\":\"Late\",\"payload\":\"\"}\n")
            .await
            .unwrap();

        assert!(matches!(next(&mut rx).await, ConnectionEvent::Connected(_)));
        match next(&mut rx).await {
            ConnectionEvent::Error(event) => {
                assert!(matches!(
                    event.cause.as_deref(),
                    Some(WireError::MalformedEnvelope { .. })
                ));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Disconnected(_)));
        assert_eq!(core.state(), ConnectionState::Closed);

        core.close().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_eof_then_close_disconnects_once() {
        let core = ConnectionCore::new(TransportKind::Local);
        let (mut rx, _sub) = record(&core);
        let (link, peer) = link_pair();
        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();

        drop(peer);
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Connected(_)));
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Disconnected(_)));

        core.close().await.unwrap();
        core.close().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let (mut rx, _sub) = record(&core);
        let (link, _peer) = link_pair();
        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();

        core.close().await.unwrap();
        core.close().await.unwrap();

        assert!(matches!(next(&mut rx).await, ConnectionEvent::Connected(_)));
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Disconnected(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(core.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_without_connect_is_silent() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let (mut rx, _sub) = record(&core);

        core.close().await.unwrap();
        assert_eq!(core.state(), ConnectionState::Closed);
        assert!(rx.try_recv().is_err());

        let (link, _peer) = link_pair();
        let err = core
            .connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Closed));
    }

    #[tokio::test]
    async fn test_pre_cancelled_connect() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let (mut rx, _sub) = record(&core);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (link, _peer) = link_pair();
        let err = core.connect(async { Ok(link) }, &cancel).await.unwrap_err();

        assert!(err.is_cancellation());
        assert_eq!(core.state(), ConnectionState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_idle() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let err = core
            .connect(
                async { Err(WireError::invalid_target("x", "bad")) },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::InvalidTarget { .. }));
        assert_eq!(core.state(), ConnectionState::Idle);

        let (link, _peer) = link_pair();
        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();
        let (link, _peer2) = link_pair();
        let err = core
            .connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::AlreadyConnected));

        core.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_cancels_pending_connect() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let pending = {
            let core = core.clone();
            tokio::spawn(async move {
                core.connect(std::future::pending(), &CancellationToken::new())
                    .await
            })
        };

        while core.state() != ConnectionState::Connecting {
            tokio::task::yield_now().await;
        }
        core.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(WireError::Cancelled)));
        assert_eq!(core.state(), ConnectionState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_during_connected_handlers_waits_for_them() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let closer = core.clone();
        let closing = core.subscribe(move |event| {
            if let ConnectionEvent::Connected(_) = event {
                let core = closer.clone();
                tokio::spawn(async move { core.close().await });
                // Give the close task time to run on the other worker.
                std::thread::sleep(Duration::from_millis(100));
            }
        });
        let (mut rx, _sub) = record(&core);
        let (link, _peer) = link_pair();

        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(next(&mut rx).await, ConnectionEvent::Connected(_)));
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Disconnected(_)));
        assert_eq!(core.state(), ConnectionState::Closed);
        drop(closing);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_receive_loop() {
        let core = ConnectionCore::new(TransportKind::Tcp);
        let (mut rx, sub) = record(&core);
        let (link, _peer) = link_pair();
        core.connect(async { Ok(link) }, &CancellationToken::new())
            .await
            .unwrap();

        drop(core);
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Connected(_)));
        assert!(matches!(next(&mut rx).await, ConnectionEvent::Disconnected(_)));
        drop(sub);
    }
}
