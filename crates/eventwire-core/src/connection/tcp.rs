//! TCP client connection.

use super::{ConnectionCore, ConnectionState};
use crate::cancel::CancellationToken;
use crate::codec::Message;
use crate::events::{ConnectionEvent, Endpoint, Subscription};
use crate::target::TcpTarget;
use crate::transport::{self, TransportKind};
use crate::Result;

/// A client connection over TCP.
///
/// # Example
///
/// ```no_run
/// use eventwire_core::{CancellationToken, ConnectionEvent, Message, TcpConnection};
///
/// # async fn demo() -> eventwire_core::Result<()> {
/// let connection = TcpConnection::new();
/// let _sub = connection.subscribe(|event| {
///     if let ConnectionEvent::MessageReceived(message) = event {
///         println!("{} -> {}", message.event_name(), message.payload());
///     }
/// });
///
/// connection.connect("127.0.0.1:9000", &CancellationToken::new()).await?;
/// connection.send(&Message::new("Ping", "Pong")).await?;
/// connection.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpConnection {
    core: ConnectionCore,
}

impl Default for TcpConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnection {
    /// Create an idle connection.
    pub fn new() -> Self {
        Self {
            core: ConnectionCore::new(TransportKind::Tcp),
        }
    }

    /// Connect to `host:port`.
    ///
    /// The attempt is bounded by
    /// [`WireConfig::CONNECT_TIMEOUT`](crate::config::WireConfig::CONNECT_TIMEOUT).
    pub async fn connect(&self, target: &str, cancel: &CancellationToken) -> Result<()> {
        self.core
            .connect(
                async {
                    let target = TcpTarget::parse(target)?;
                    transport::connect_tcp(&target).await
                },
                cancel,
            )
            .await
    }

    /// Connect to `host` and `port` given separately.
    pub async fn connect_to(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.core
            .connect(
                async {
                    let target = TcpTarget::new(host, port)?;
                    transport::connect_tcp(&target).await
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

    /// The peer this connection is (or was last) connected to.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WireError;

    #[tokio::test]
    async fn test_invalid_target_is_rejected_before_io() {
        let connection = TcpConnection::new();
        let err = connection
            .connect("no-port-here", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WireError::InvalidTarget { .. }));
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_to_empty_host() {
        let connection = TcpConnection::new();
        let err = connection
            .connect_to("", 80, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::InvalidTarget { .. }));
    }
}
