//! Eventwire CLI - serve, send and listen over TCP or local sockets.
//!
//! Received messages are printed to stdout as envelope lines, one per
//! message; logs go to stderr.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use eventwire_core::TransportKind;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "eventwire")]
#[command(about = "Event-driven duplex messaging over TCP or local sockets")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a server and print every received message
    Serve {
        /// Transport to use (tcp or local)
        #[arg(short, long, default_value = "tcp")]
        transport: TransportKind,

        /// `host:port` or port for tcp, channel name for local
        target: String,

        /// Event name sent to each client on connect
        #[arg(long, requires = "initial_payload")]
        initial_event: Option<String>,

        /// Payload sent to each client on connect
        #[arg(long, requires = "initial_event")]
        initial_payload: Option<String>,

        /// Read one message per client, then disconnect it
        #[arg(long)]
        single_frame: bool,
    },

    /// Connect, send one message and disconnect
    Send {
        #[arg(short, long, default_value = "tcp")]
        transport: TransportKind,

        /// `host:port` for tcp, channel name for local
        target: String,

        /// Event name of the message
        event: String,

        /// Message payload
        #[arg(default_value = "")]
        payload: String,
    },

    /// Connect and print received messages until the peer disconnects
    Listen {
        #[arg(short, long, default_value = "tcp")]
        transport: TransportKind,

        /// `host:port` for tcp, channel name for local
        target: String,

        /// Only print messages with this event name
        #[arg(short, long)]
        event: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            transport,
            target,
            initial_event,
            initial_payload,
            single_frame,
        } => {
            info!("Starting eventwire {} server on {}", transport, target);
            let initial = initial_event.zip(initial_payload);
            commands::serve(transport, &target, initial, single_frame).await
        }
        Command::Send {
            transport,
            target,
            event,
            payload,
        } => commands::send(transport, &target, &event, &payload).await,
        Command::Listen {
            transport,
            target,
            event,
        } => commands::listen(transport, &target, event).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_initial_message() {
        let args = Args::try_parse_from([
            "eventwire",
            "serve",
            "--transport",
            "local",
            "bus",
            "--initial-event",
            "Hello",
            "--initial-payload",
            "world",
            "--single-frame",
        ])
        .unwrap();

        match args.command {
            Command::Serve {
                transport,
                target,
                initial_event,
                single_frame,
                ..
            } => {
                assert_eq!(transport, TransportKind::Local);
                assert_eq!(target, "bus");
                assert_eq!(initial_event.as_deref(), Some("Hello"));
                assert!(single_frame);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_send_defaults() {
        let args =
            Args::try_parse_from(["eventwire", "--debug", "send", "127.0.0.1:9000", "Ping"]).unwrap();
        assert!(args.debug);
        match args.command {
            Command::Send {
                transport, payload, ..
            } => {
                assert_eq!(transport, TransportKind::Tcp);
                assert_eq!(payload, "");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_initial_event_requires_payload() {
        assert!(Args::try_parse_from(["eventwire", "serve", "9000", "--initial-event", "Hi"]).is_err());
        assert!(Args::try_parse_from(["eventwire", "send", "--transport", "smoke", "x", "E"]).is_err());
    }
}
