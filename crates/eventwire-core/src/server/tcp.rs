//! TCP server.

use super::ServerCore;
use crate::cancel::CancellationToken;
use crate::config::ServerOptions;
use crate::events::{Endpoint, ServerEvent, Subscription};
use crate::target::TcpTarget;
use crate::transport::{TcpAcceptor, TransportKind};
use crate::Result;

/// A server accepting TCP clients.
///
/// # Example
///
/// ```no_run
/// use eventwire_core::{CancellationToken, ServerEvent, TcpServer};
///
/// # async fn demo() -> eventwire_core::Result<()> {
/// let server = TcpServer::new();
/// let _sub = server.subscribe(|event| {
///     if let ServerEvent::MessageReceived { peer, message, .. } = event {
///         println!("{} sent {}", peer, message.event_name());
///     }
/// });
///
/// // Runs until the token is cancelled or `stop` is called.
/// server.start("127.0.0.1:9000", &CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpServer {
    core: ServerCore,
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpServer {
    /// Create a server with default options.
    pub fn new() -> Self {
        Self::with_options(ServerOptions::default())
    }

    /// Create a server with the given options.
    pub fn with_options(options: ServerOptions) -> Self {
        Self {
            core: ServerCore::new(TransportKind::Tcp, options),
        }
    }

    /// Listen on `target` and serve clients until cancelled or stopped.
    ///
    /// `target` is `host:port`, or a bare port to listen on all interfaces.
    /// Port `0` binds an ephemeral port, reported through
    /// [`ServerEvent::Listening`] and [`TcpServer::local_endpoint`].
    pub async fn start(&self, target: &str, cancel: &CancellationToken) -> Result<()> {
        self.core
            .start(
                async {
                    let target = TcpTarget::parse_listen(target)?;
                    TcpAcceptor::bind(&target).await
                },
                cancel,
            )
            .await
    }

    /// Stop accepting, disconnect every client and wait for `start` to
    /// return. Does nothing if the server is not running.
    pub async fn stop(&self) -> Result<()> {
        self.core.stop().await
    }

    /// Whether `start` is currently serving.
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// The bound address while running.
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.core.local_endpoint()
    }

    /// Number of clients currently being served.
    pub fn client_count(&self) -> usize {
        self.core.client_count()
    }

    /// Options this server applies to each client.
    pub fn options(&self) -> &ServerOptions {
        self.core.options()
    }

    /// Register a handler for server events.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.core.subscribe(handler)
    }
}
