//! Servers that accept many clients.
//!
//! A server binds a listener, raises [`ServerEvent::Listening`], then runs an
//! accept loop until it is cancelled or stopped. Every accepted client gets
//! its own handler task that reads frames and raises
//! [`ServerEvent::MessageReceived`] until the client goes away.
//!
//! # Thread Safety
//!
//! Client handlers are tracked in a registry behind a `std::sync::Mutex`.
//! A handler is spawned while the registry lock is held, so its entry exists
//! before it can finish and remove itself. `stop` closes the registry,
//! cancels every client and awaits all handlers (join barrier), then waits
//! for `start` to return; no server event fires after `stop` returns.

mod local;
mod tcp;

pub use local::LocalServer;
pub use tcp::TcpServer;

use crate::cancel::CancellationToken;
use crate::codec;
use crate::config::{ReadMode, ServerOptions, WireConfig};
use crate::events::{ClientId, Endpoint, ErrorEvent, EventHandlers, ServerEvent, Subscription};
use crate::transport::{Acceptor, BoxedReader, BoxedWriter, Link, TransportKind};
use crate::{Result, WireError};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct ClientEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Registry {
    accepting: bool,
    clients: HashMap<ClientId, ClientEntry>,
}

#[derive(Default)]
struct Control {
    /// Present while `start` is running.
    stop: Option<CancellationToken>,
    local: Option<Endpoint>,
}

struct Shared {
    transport: TransportKind,
    options: ServerOptions,
    handlers: EventHandlers<ServerEvent>,
    control: Mutex<Control>,
    running: watch::Sender<bool>,
    registry: Mutex<Registry>,
    next_client: AtomicU64,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the registry to new clients, cancel every registered client and
    /// wait for their handlers to finish.
    async fn drain(&self) {
        let clients: Vec<ClientEntry> = {
            let mut registry = self.registry();
            registry.accepting = false;
            registry.clients.drain().map(|(_, entry)| entry).collect()
        };
        if clients.is_empty() {
            return;
        }

        debug!("Waiting for {} client handler(s)", clients.len());
        let handles: Vec<JoinHandle<()>> = clients
            .into_iter()
            .map(|entry| {
                entry.cancel.cancel();
                entry.handle
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Client handler panicked: {}", e);
                }
            }
        }
    }

    async fn handle_client(&self, client: ClientId, link: Link, cancel: CancellationToken) {
        let Link {
            reader,
            mut writer,
            peer,
        } = link;

        info!("Client {} connected from {}", client, peer);
        self.handlers.emit(&ServerEvent::ClientConnected {
            client,
            peer: peer.clone(),
        });

        match self
            .session(client, &peer, reader, &mut writer, &cancel)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_cancellation() => debug!("Client {} cancelled", client),
            Err(e) => {
                warn!("Client {} ({}) failed: {}", client, peer, e);
                self.handlers.emit(&ServerEvent::Error {
                    client: Some(client),
                    error: ErrorEvent::new("Client session failed", e),
                });
            }
        }

        drop(writer);
        info!("Client {} disconnected", client);
        self.handlers
            .emit(&ServerEvent::ClientDisconnected { client, peer });
    }

    async fn session(
        &self,
        client: ClientId,
        peer: &Endpoint,
        reader: BoxedReader,
        writer: &mut BoxedWriter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(initial) = &self.options.initial_message {
            let frame = codec::encode(initial)?;
            cancel
                .run_until_cancelled(codec::write_frame(writer, &frame))
                .await??;
        }

        let mut reader = BufReader::with_capacity(WireConfig::READ_BUFFER_BYTES, reader);
        let mut buf = Vec::with_capacity(WireConfig::READ_BUFFER_BYTES);

        loop {
            let frame = cancel
                .run_until_cancelled(codec::read_frame(
                    &mut reader,
                    &mut buf,
                    self.options.max_frame_bytes,
                ))
                .await??;

            let Some(line) = frame else {
                debug!("Client {} closed the stream", client);
                return Ok(());
            };

            let message = codec::decode(&line)?;
            self.handlers.emit(&ServerEvent::MessageReceived {
                client,
                peer: peer.clone(),
                message,
            });

            if self.options.read_mode == ReadMode::SingleFrame {
                return Ok(());
            }
        }
    }
}

/// Transport-independent server machinery shared by [`TcpServer`] and
/// [`LocalServer`].
#[derive(Clone)]
pub(crate) struct ServerCore {
    shared: Arc<Shared>,
}

impl ServerCore {
    pub fn new(transport: TransportKind, options: ServerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                options,
                handlers: EventHandlers::new(),
                control: Mutex::new(Control::default()),
                running: watch::Sender::new(false),
                registry: Mutex::new(Registry {
                    accepting: false,
                    clients: HashMap::new(),
                }),
                next_client: AtomicU64::new(1),
            }),
        }
    }

    /// Bind with `bind` and serve until `cancel` fires or `stop` is called.
    ///
    /// Returns after every client handler has finished.
    pub async fn start<A, F>(&self, bind: F, cancel: &CancellationToken) -> Result<()>
    where
        A: Acceptor,
        F: Future<Output = Result<A>>,
    {
        let stop = {
            let mut control = self.shared.control();
            if control.stop.is_some() {
                return Err(WireError::AlreadyRunning);
            }
            cancel.check()?;

            let stop = cancel.child_token();
            control.stop = Some(stop.clone());
            self.shared.registry().accepting = true;
            self.shared.running.send_replace(true);
            stop
        };

        let result = self.serve(bind, &stop).await;

        self.shared.drain().await;
        {
            let mut control = self.shared.control();
            control.stop = None;
            control.local = None;
            self.shared.running.send_replace(false);
        }

        match &result {
            Ok(()) => info!("{} server stopped", self.shared.transport),
            Err(e) if e.is_cancellation() => {
                debug!("{} server cancelled before listening", self.shared.transport)
            }
            Err(e) => warn!("{} server failed: {}", self.shared.transport, e),
        }
        result
    }

    async fn serve<A, F>(&self, bind: F, stop: &CancellationToken) -> Result<()>
    where
        A: Acceptor,
        F: Future<Output = Result<A>>,
    {
        let acceptor = stop.run_until_cancelled(bind).await??;

        let local = acceptor.local_endpoint();
        self.shared.control().local = Some(local.clone());
        info!("{} server listening on {}", self.shared.transport, local);
        self.shared.handlers.emit(&ServerEvent::Listening(local));

        loop {
            let accepted = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                result = acceptor.accept() => result,
            };

            match accepted {
                Ok(link) => self.admit(link, stop),
                Err(e) => {
                    error!("{} accept error: {}", self.shared.transport, e);
                    self.shared.handlers.emit(&ServerEvent::Error {
                        client: None,
                        error: ErrorEvent::new("Accept failed", e.into()),
                    });
                    let backoff = tokio::time::sleep(WireConfig::ACCEPT_ERROR_BACKOFF);
                    if stop.run_until_cancelled(backoff).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("{} accept loop exited", self.shared.transport);
        Ok(())
    }

    /// Register and spawn a handler for an accepted client.
    fn admit(&self, link: Link, stop: &CancellationToken) {
        let mut registry = self.shared.registry();
        if !registry.accepting {
            debug!("Dropping client {}: server is stopping", link.peer);
            return;
        }

        let client = ClientId(self.shared.next_client.fetch_add(1, Ordering::Relaxed));
        let cancel = stop.child_token();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);

        let handle = tokio::spawn(async move {
            shared.handle_client(client, link, token).await;
            shared.registry().clients.remove(&client);
        });
        registry.clients.insert(client, ClientEntry { cancel, handle });
    }

    /// Stop a running server. No-op when not running.
    pub async fn stop(&self) -> Result<()> {
        let stop = self.shared.control().stop.clone();
        let Some(stop) = stop else {
            return Ok(());
        };

        info!("Stopping {} server", self.shared.transport);
        stop.cancel();
        self.shared.drain().await;

        let mut running = self.shared.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.control().stop.is_some()
    }

    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.shared.control().local.clone()
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry().clients.len()
    }

    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.shared.handlers.subscribe(handler)
    }
}

impl std::fmt::Debug for ServerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("transport", &self.shared.transport)
            .field("running", &self.is_running())
            .field("local", &self.local_endpoint())
            .field("clients", &self.client_count())
            .finish()
    }
}
