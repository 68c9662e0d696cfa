//! Local channel server (Unix domain sockets).

use super::ServerCore;
use crate::cancel::CancellationToken;
use crate::config::ServerOptions;
use crate::events::{Endpoint, ServerEvent, Subscription};
use crate::transport::TransportKind;
use crate::Result;

/// A server accepting clients on a named local channel.
///
/// The socket file is created with owner-only permissions, replaces any
/// stale file of the same name, and is removed when the server stops.
#[derive(Debug, Clone)]
pub struct LocalServer {
    core: ServerCore,
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalServer {
    /// Create a server with default options.
    pub fn new() -> Self {
        Self::with_options(ServerOptions::default())
    }

    /// Create a server with the given options.
    pub fn with_options(options: ServerOptions) -> Self {
        Self {
            core: ServerCore::new(TransportKind::Local, options),
        }
    }

    /// Listen on the channel called `name` until cancelled or stopped.
    #[cfg(unix)]
    pub async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        use crate::target::LocalTarget;
        use crate::transport::LocalAcceptor;

        self.core
            .start(
                async {
                    let target = LocalTarget::parse(name)?;
                    LocalAcceptor::bind(&target)
                },
                cancel,
            )
            .await
    }

    /// Local channels need Unix domain sockets.
    #[cfg(not(unix))]
    pub async fn start(&self, _name: &str, _cancel: &CancellationToken) -> Result<()> {
        Err(crate::WireError::unsupported(
            TransportKind::Local,
            "this platform",
        ))
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

    /// The channel endpoint (`name`, port `0`) while running.
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
