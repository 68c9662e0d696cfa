//! Subcommand implementations.

use anyhow::{Context, Result};
use eventwire_core::{
    CancellationToken, Connection, ConnectionEvent, EventDispatcher, Message, ReadMode, Server,
    ServerEvent, ServerOptions, TransportKind,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Print a message to stdout as an envelope line.
fn print_envelope(message: &Message) {
    match serde_json::to_string(message) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Could not print message: {}", e),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            token.cancel();
        }
    });
}

pub async fn serve(
    transport: TransportKind,
    target: &str,
    initial: Option<(String, String)>,
    single_frame: bool,
) -> Result<()> {
    let mut options = ServerOptions::new();
    if let Some((event, payload)) = initial {
        options = options.with_initial_message(Message::new(event, payload));
    }
    if single_frame {
        options = options.with_read_mode(ReadMode::SingleFrame);
    }

    let server = Server::with_options(transport, options);
    let _printer = server.subscribe(|event| match event {
        ServerEvent::Listening(endpoint) => println!("LISTENING={}", endpoint),
        ServerEvent::MessageReceived { message, .. } => print_envelope(message),
        _ => {}
    });

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);

    server
        .start(target, &shutdown)
        .await
        .with_context(|| format!("{} server on {} failed", transport, target))?;
    Ok(())
}

pub async fn send(transport: TransportKind, target: &str, event: &str, payload: &str) -> Result<()> {
    let connection = Connection::new(transport);
    connection
        .connect(target, &CancellationToken::new())
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;

    let result = connection
        .send(&Message::new(event, payload))
        .await
        .context("Failed to send message");
    connection.close().await?;
    result?;

    info!("Sent {} to {}", event, target);
    Ok(())
}

pub async fn listen(transport: TransportKind, target: &str, event: Option<String>) -> Result<()> {
    let connection = Connection::new(transport);

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let _watch = connection.subscribe(move |event| {
        if let ConnectionEvent::Disconnected(_) = event {
            let _ = closed_tx.send(());
        }
    });

    let _printer = match event {
        Some(name) => EventDispatcher::new().subscribe(&connection, name, print_envelope),
        None => connection.subscribe(|event| {
            if let ConnectionEvent::MessageReceived(message) = event {
                print_envelope(message);
            }
        }),
    };

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);

    connection
        .connect(target, &shutdown)
        .await
        .with_context(|| format!("Failed to connect to {}", target))?;

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = closed_rx.recv() => info!("Peer closed the connection"),
    }

    connection.close().await?;
    Ok(())
}
