//! Name-based publish/subscribe on top of a connection.
//!
//! [`EventDispatcher`] routes received messages to handlers registered for
//! one event name, and sends messages through anything that can write them.
//! It works against two small traits so it does not care which transport (or
//! facade) sits underneath:
//!
//! - [`MessageSource`]: something that reports received messages
//! - [`MessageSink`]: something that can send a message

use crate::codec::Message;
use crate::connection::{LocalConnection, TcpConnection};
use crate::events::{ConnectionEvent, ServerEvent, Subscription};
use crate::facade::{Connection, Server};
use crate::server::{LocalServer, TcpServer};
use crate::Result;
use async_trait::async_trait;

/// Callback for a received message.
pub type MessageHandler = Box<dyn Fn(&Message) + Send + Sync>;

/// Something that reports received messages.
pub trait MessageSource {
    /// Invoke `handler` for every message received from now on, until the
    /// returned subscription is dropped.
    fn on_message(&self, handler: MessageHandler) -> Subscription;
}

/// Something that can send a message to its peer.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, message: &Message) -> Result<()>;
}

/// Routes messages by exact, case-sensitive event name.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventDispatcher;

impl EventDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Call `handler` for every message from `source` whose event name is
    /// exactly `event_name`.
    pub fn subscribe<S, F>(&self, source: &S, event_name: impl Into<String>, handler: F) -> Subscription
    where
        S: MessageSource + ?Sized,
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let event_name = event_name.into();
        source.on_message(Box::new(move |message| {
            if message.event_name() == event_name {
                handler(message);
            }
        }))
    }

    /// Send `message` through `sink`. Errors are returned unchanged.
    pub async fn emit<S>(&self, sink: &S, message: &Message) -> Result<()>
    where
        S: MessageSink + ?Sized,
    {
        sink.send_message(message).await
    }
}

fn connection_messages(handler: MessageHandler) -> impl Fn(&ConnectionEvent) + Send + Sync {
    move |event| {
        if let ConnectionEvent::MessageReceived(message) = event {
            handler(message);
        }
    }
}

fn server_messages(handler: MessageHandler) -> impl Fn(&ServerEvent) + Send + Sync {
    move |event| {
        if let ServerEvent::MessageReceived { message, .. } = event {
            handler(message);
        }
    }
}

impl MessageSource for TcpConnection {
    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.subscribe(connection_messages(handler))
    }
}

impl MessageSource for LocalConnection {
    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.subscribe(connection_messages(handler))
    }
}

impl MessageSource for Connection {
    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.subscribe(connection_messages(handler))
    }
}

impl MessageSource for TcpServer {
    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.subscribe(server_messages(handler))
    }
}

impl MessageSource for LocalServer {
    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.subscribe(server_messages(handler))
    }
}

impl MessageSource for Server {
    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.subscribe(server_messages(handler))
    }
}

#[async_trait]
impl MessageSink for TcpConnection {
    async fn send_message(&self, message: &Message) -> Result<()> {
        self.send(message).await
    }
}

#[async_trait]
impl MessageSink for LocalConnection {
    async fn send_message(&self, message: &Message) -> Result<()> {
        self.send(message).await
    }
}

#[async_trait]
impl MessageSink for Connection {
    async fn send_message(&self, message: &Message) -> Result<()> {
        self.send(message).await
    }
}
