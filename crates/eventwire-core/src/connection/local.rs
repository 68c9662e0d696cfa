//! Local channel client connection (Unix domain sockets).
//!
//! On platforms without Unix sockets every `connect` fails with
//! [`WireError::UnsupportedTransport`](crate::WireError::UnsupportedTransport).

use super::{ConnectionCore, ConnectionState};
use crate::cancel::CancellationToken;
use crate::codec::Message;
use crate::events::{ConnectionEvent, Endpoint, Subscription};
use crate::target::LocalTarget;
use crate::transport::{self, TransportKind};
use crate::Result;

/// A client connection to a named local channel.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    core: ConnectionCore,
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalConnection {
    /// Create an idle connection.
    pub fn new() -> Self {
        Self {
            core: ConnectionCore::new(TransportKind::Local),
        }
    }

    /// Connect to the channel called `name`.
    pub async fn connect(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.core
            .connect(
                async {
                    let target = LocalTarget::parse(name)?;
                    transport::connect_local(&target).await
                },
                cancel,
            )
            .await
    }

    /// Send one message as a frame.
    ///
    /// Fails with [`WireError::NotConnected`](crate::WireError::NotConnected)
    /// unless the connection is established.
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.core.send(message).await
    }

    /// Close the connection and stop its receive loop.
    ///
    /// Safe to call any number of times. Raises
    /// [`ConnectionEvent::Disconnected`](crate::ConnectionEvent::Disconnected)
    /// once if the connection had been established.
    pub async fn close(&self) -> Result<()> {
        self.core.close().await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Whether the connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// The channel this connection is (or was last) connected to.
    pub fn remote_endpoint(&self) -> Option<Endpoint> {
        self.core.remote_endpoint()
    }

    /// Register a handler for connection events.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.core.subscribe(handler)
    }
}
