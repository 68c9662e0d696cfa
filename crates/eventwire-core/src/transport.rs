//! Byte-stream transports.
//!
//! Connections and servers only need "a duplex byte stream with async read,
//! write and close". This module produces such streams, already split into
//! owned halves, for the two supported transports:
//!
//! - **TCP**: `tokio::net::TcpStream` / `TcpListener`
//! - **Local**: Unix domain sockets addressed by channel name (Unix only)

use crate::config::WireConfig;
use crate::events::Endpoint;
use crate::target::{LocalTarget, TcpTarget};
use crate::{Result, WireError};
use async_trait::async_trait;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established duplex stream and the peer it talks to.
pub(crate) struct Link {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub peer: Endpoint,
}

/// Transport variant selected by the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// Stream socket addressed as `host:port`.
    #[default]
    Tcp,
    /// Local channel addressed by name.
    Local,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Local => "local",
        }
    }

    /// Whether this transport can be used on the current platform.
    pub fn is_supported(&self) -> bool {
        match self {
            TransportKind::Tcp => true,
            TransportKind::Local => cfg!(unix),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "local" | "pipe" | "unix" => Ok(TransportKind::Local),
            other => Err(WireError::unsupported(
                other,
                "anything (expected 'tcp' or 'local')",
            )),
        }
    }
}

/// Open a TCP connection, bounded by [`WireConfig::CONNECT_TIMEOUT`].
pub(crate) async fn connect_tcp(target: &TcpTarget) -> Result<Link> {
    let stream = tokio::time::timeout(
        WireConfig::CONNECT_TIMEOUT,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    .map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connect to {} timed out", target),
        )
    })??;

    stream.set_nodelay(true)?;
    let peer = stream
        .peer_addr()
        .map(Endpoint::from)
        .unwrap_or_else(|_| Endpoint::new(&target.host, target.port));

    let (reader, writer) = stream.into_split();
    Ok(Link {
        reader: Box::new(reader),
        writer: Box::new(writer),
        peer,
    })
}

/// Open a connection to a local channel.
#[cfg(unix)]
pub(crate) async fn connect_local(target: &LocalTarget) -> Result<Link> {
    let stream = tokio::net::UnixStream::connect(target.path()).await?;
    let (reader, writer) = stream.into_split();
    Ok(Link {
        reader: Box::new(reader),
        writer: Box::new(writer),
        peer: target.endpoint(),
    })
}

#[cfg(not(unix))]
pub(crate) async fn connect_local(_target: &LocalTarget) -> Result<Link> {
    Err(WireError::unsupported(TransportKind::Local, "this platform"))
}

/// A bound listener that yields accepted links.
#[async_trait]
pub(crate) trait Acceptor: Send + Sync + 'static {
    /// Wait for the next client.
    async fn accept(&self) -> std::io::Result<Link>;

    /// Where the listener is bound.
    fn local_endpoint(&self) -> Endpoint;
}

/// TCP listener.
pub(crate) struct TcpAcceptor {
    listener: TcpListener,
    local: Endpoint,
}

impl TcpAcceptor {
    pub async fn bind(target: &TcpTarget) -> Result<Self> {
        let listener = TcpListener::bind((target.host.as_str(), target.port)).await?;
        let local = Endpoint::from(listener.local_addr()?);
        Ok(Self { listener, local })
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> std::io::Result<Link> {
        let (stream, peer_addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        let (reader, writer) = stream.into_split();
        Ok(Link {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: Endpoint::from(peer_addr),
        })
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }
}

/// Unix socket listener for a local channel.
///
/// Owns the socket file: it is created owner-only on bind and removed on
/// drop, unless another listener has replaced it in the meantime.
#[cfg(unix)]
pub(crate) struct LocalAcceptor {
    listener: tokio::net::UnixListener,
    target: LocalTarget,
    file_id: Option<(u64, u64)>,
}

#[cfg(unix)]
impl LocalAcceptor {
    pub fn bind(target: &LocalTarget) -> Result<Self> {
        use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

        let path = target.path();

        // Only a socket nobody answers on counts as stale.
        match std::fs::symlink_metadata(path) {
            Ok(meta) if !meta.file_type().is_socket() => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                )
                .into());
            }
            Ok(_) => {
                if std::os::unix::net::UnixStream::connect(path).is_ok() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        format!("{} is in use by another listener", path.display()),
                    )
                    .into());
                }
                debug!("Removing stale socket {}", path.display());
                std::fs::remove_file(path)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = tokio::net::UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

        let file_id = std::fs::metadata(path).ok().map(|m| (m.dev(), m.ino()));

        Ok(Self {
            listener,
            target: target.clone(),
            file_id,
        })
    }
}

#[cfg(unix)]
#[async_trait]
impl Acceptor for LocalAcceptor {
    async fn accept(&self) -> std::io::Result<Link> {
        let (stream, _addr) = self.listener.accept().await?;
        let (reader, writer) = stream.into_split();
        Ok(Link {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: self.target.endpoint(),
        })
    }

    fn local_endpoint(&self) -> Endpoint {
        self.target.endpoint()
    }
}

#[cfg(unix)]
impl Drop for LocalAcceptor {
    fn drop(&mut self) {
        use std::os::unix::fs::MetadataExt;

        let path = self.target.path();
        let current = std::fs::metadata(path).ok().map(|m| (m.dev(), m.ino()));
        if current.is_some() && current == self.file_id {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("Could not remove socket {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parse_and_display() {
        assert_eq!("tcp".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert_eq!("Local".parse::<TransportKind>().unwrap(), TransportKind::Local);
        assert_eq!("pipe".parse::<TransportKind>().unwrap(), TransportKind::Local);
        assert!(matches!(
            "carrier-pigeon".parse::<TransportKind>(),
            Err(WireError::UnsupportedTransport { .. })
        ));
        assert_eq!(TransportKind::Local.to_string(), "local");
        assert!(TransportKind::Tcp.is_supported());
    }

    #[tokio::test]
    async fn test_tcp_acceptor_reports_bound_port() {
        let acceptor = TcpAcceptor::bind(&TcpTarget::parse("127.0.0.1:0").unwrap())
            .await
            .unwrap();
        let local = acceptor.local_endpoint();
        assert_eq!(local.address, "127.0.0.1");
        assert!(local.port > 0);
    }

    #[tokio::test]
    async fn test_connect_tcp_refused() {
        // Bind then drop to find a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = match connect_tcp(&TcpTarget::new("127.0.0.1", port).unwrap()).await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, WireError::Io { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_acceptor_owns_socket_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("owned.sock");
        let target = LocalTarget::parse(path.to_str().unwrap()).unwrap();

        let acceptor = LocalAcceptor::bind(&target).unwrap();
        assert!(path.exists());
        assert_eq!(acceptor.local_endpoint().port, 0);

        drop(acceptor);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_acceptor_replaces_stale_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stale.sock");
        // A std listener leaves its file behind when dropped.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());
        let target = LocalTarget::parse(path.to_str().unwrap()).unwrap();

        let acceptor = LocalAcceptor::bind(&target).unwrap();
        let link = connect_local(&target).await.unwrap();
        assert_eq!(link.peer, Endpoint::local(target.name()));
        drop(acceptor);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_acceptor_keeps_regular_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, b"keep me").unwrap();
        let target = LocalTarget::parse(path.to_str().unwrap()).unwrap();

        let err = match LocalAcceptor::bind(&target) {
            Ok(_) => panic!("bind over a regular file should fail"),
            Err(e) => e,
        };
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::AlreadyExists));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_acceptor_refuses_live_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("live.sock");
        let target = LocalTarget::parse(path.to_str().unwrap()).unwrap();
        let first = LocalAcceptor::bind(&target).unwrap();

        let err = match LocalAcceptor::bind(&target) {
            Ok(_) => panic!("second bind should fail"),
            Err(e) => e,
        };
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::AddrInUse));

        // The first listener still owns the path.
        assert!(connect_local(&target).await.is_ok());
        drop(first);
        assert!(!path.exists());
    }
}
