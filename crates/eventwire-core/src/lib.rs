//! Eventwire Core - event-driven duplex messaging over TCP or local sockets.
//!
//! Two peers exchange named messages (`eventName` + `payload`) encoded as one
//! JSON object per line. Consumers subscribe to notifications and send
//! messages without touching raw I/O:
//!
//! - [`TcpConnection`] / [`LocalConnection`]: a client holding one stream
//! - [`TcpServer`] / [`LocalServer`]: a listener serving many clients
//! - [`Connection`] / [`Server`]: facades over a selectable [`TransportKind`]
//! - [`EventDispatcher`]: routing of received messages by event name
//!
//! # Example
//!
//! ```rust,no_run
//! use eventwire_core::{
//!     CancellationToken, ConnectionEvent, EventDispatcher, Message, ServerEvent, TcpConnection,
//!     TcpServer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> eventwire_core::Result<()> {
//!     let server = TcpServer::new();
//!     let _log = server.subscribe(|event| {
//!         if let ServerEvent::MessageReceived { message, .. } = event {
//!             println!("server got {}: {}", message.event_name(), message.payload());
//!         }
//!     });
//!
//!     let shutdown = CancellationToken::new();
//!     let serving = {
//!         let server = server.clone();
//!         let shutdown = shutdown.clone();
//!         tokio::spawn(async move { server.start("127.0.0.1:9000", &shutdown).await })
//!     };
//!
//!     let client = TcpConnection::new();
//!     let dispatcher = EventDispatcher::new();
//!     let _pong = dispatcher.subscribe(&client, "Pong", |message| {
//!         println!("pong: {}", message.payload());
//!     });
//!
//!     client.connect("127.0.0.1:9000", &CancellationToken::new()).await?;
//!     dispatcher.emit(&client, &Message::new("Ping", "hello")).await?;
//!     client.close().await?;
//!
//!     shutdown.cancel();
//!     serving.await.ok();
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod facade;
pub mod server;
pub mod target;
pub mod transport;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use codec::Message;
pub use config::{ReadMode, ServerOptions, WireConfig};
pub use connection::{ConnectionState, LocalConnection, TcpConnection};
pub use dispatcher::{EventDispatcher, MessageSink, MessageSource};
pub use error::{Result, WireError};
pub use events::{
    ClientId, ConnectionEvent, Endpoint, ErrorEvent, EventHandlers, ServerEvent, Subscription,
};
pub use facade::{Connection, Server};
pub use server::{LocalServer, TcpServer};
pub use target::{LocalTarget, TcpTarget};
pub use transport::TransportKind;
