//! Centralized configuration for eventwire.
//!
//! Compile-time limits live on [`WireConfig`]; per-server runtime options are
//! built with [`ServerOptions`].

use crate::codec::Message;
use std::time::Duration;

/// Transport and framing limits.
pub struct WireConfig;

impl WireConfig {
    /// Largest accepted frame, excluding the line terminator.
    pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024; // 16MB
    /// Initial capacity of the per-connection line buffer.
    pub const READ_BUFFER_BYTES: usize = 8192;
    /// Upper bound on a single TCP connect attempt.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Pause after a failed `accept` before trying again.
    pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
    /// `sun_path` is 104 bytes on macOS and 108 on Linux; use the smaller.
    pub const MAX_SOCKET_PATH: usize = 104;
    /// File name prefix for local channel sockets in the temp directory.
    pub const LOCAL_SOCKET_PREFIX: &'static str = "eventwire-";
    /// File name suffix for local channel sockets in the temp directory.
    pub const LOCAL_SOCKET_SUFFIX: &'static str = ".sock";
}

/// How a server handler reads from its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Read frames until the client closes the stream.
    #[default]
    UntilClosed,
    /// Read exactly one frame, then close the client.
    SingleFrame,
}

/// Runtime options for a server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Message written to every client right after it is accepted.
    pub initial_message: Option<Message>,
    /// Per-client read behaviour.
    pub read_mode: ReadMode,
    /// Largest accepted frame from a client.
    pub max_frame_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            initial_message: None,
            read_mode: ReadMode::default(),
            max_frame_bytes: WireConfig::MAX_FRAME_BYTES,
        }
    }
}

impl ServerOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `message` to each client immediately after it connects.
    pub fn with_initial_message(mut self, message: Message) -> Self {
        self.initial_message = Some(message);
        self
    }

    /// Set the per-client read mode.
    pub fn with_read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = mode;
        self
    }

    /// Set the maximum accepted frame size.
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}
