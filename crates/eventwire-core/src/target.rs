//! Parsing of connection and listen targets.
//!
//! Targets are validated before any I/O happens; a bad target is always an
//! [`WireError::InvalidTarget`].

use crate::config::WireConfig;
use crate::events::Endpoint;
use crate::{Result, WireError};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A stream-socket target of the form `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTarget {
    pub host: String,
    pub port: u16,
}

impl TcpTarget {
    /// Create a target from parts. The host must be non-empty.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(WireError::invalid_target(
                format!("{}:{}", host, port),
                "host is empty",
            ));
        }
        Ok(Self { host, port })
    }

    /// Parse `host:port`.
    ///
    /// Exactly one colon is allowed, so bare IPv6 literals are rejected.
    pub fn parse(target: &str) -> Result<Self> {
        let mut parts = target.split(':');
        let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(WireError::invalid_target(target, "expected 'host:port'"));
        };

        let port = port.parse::<u16>().map_err(|_| {
            WireError::invalid_target(target, "port must be a number between 0 and 65535")
        })?;

        Self::new(host, port)
    }

    /// Parse a listen target: `host:port`, or a bare `port` meaning all
    /// interfaces.
    pub fn parse_listen(target: &str) -> Result<Self> {
        if target.contains(':') {
            return Self::parse(target);
        }
        let port = target.trim().parse::<u16>().map_err(|_| {
            WireError::invalid_target(target, "expected 'host:port' or a port number")
        })?;
        Self::new("0.0.0.0", port)
    }
}

impl FromStr for TcpTarget {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TcpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A local channel target: a name mapped to a Unix socket path.
///
/// Names containing `/` are used as socket paths directly; any other name
/// maps to `eventwire-<name>.sock` in the system temp directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTarget {
    name: String,
    path: PathBuf,
}

impl LocalTarget {
    /// Parse a channel name.
    pub fn parse(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(WireError::invalid_target(name, "channel name is empty"));
        }
        if name.contains('\0') {
            return Err(WireError::invalid_target(name, "channel name contains NUL"));
        }

        let path = if name.contains('/') {
            PathBuf::from(name)
        } else {
            std::env::temp_dir().join(format!(
                "{}{}{}",
                WireConfig::LOCAL_SOCKET_PREFIX,
                name,
                WireConfig::LOCAL_SOCKET_SUFFIX
            ))
        };

        let path_len = path.as_os_str().len();
        if path_len >= WireConfig::MAX_SOCKET_PATH {
            return Err(WireError::invalid_target(
                name,
                format!(
                    "socket path too long ({} bytes, max {}): {}",
                    path_len,
                    WireConfig::MAX_SOCKET_PATH - 1,
                    path.display()
                ),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    /// The channel name as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The socket path the name maps to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The endpoint reported for this channel (`name`, port `0`).
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::local(&self.name)
    }
}

impl FromStr for LocalTarget {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_target() {
        let target = TcpTarget::parse("127.0.0.1:8080").unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.to_string(), "127.0.0.1:8080");

        let target: TcpTarget = "localhost:0".parse().unwrap();
        assert_eq!(target.port, 0);
    }

    #[test]
    fn test_parse_tcp_target_rejects_malformed() {
        for bad in [
            "localhost",
            "a:b:c",
            "::1:80",
            "host:",
            "host:port",
            "host:65536",
            "host:-1",
            ":8080",
            "",
        ] {
            let err = TcpTarget::parse(bad).unwrap_err();
            assert!(
                matches!(err, WireError::InvalidTarget { .. }),
                "expected InvalidTarget for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_listen_target() {
        let target = TcpTarget::parse_listen("9000").unwrap();
        assert_eq!(target.host, "0.0.0.0");
        assert_eq!(target.port, 9000);

        let target = TcpTarget::parse_listen("127.0.0.1:0").unwrap();
        assert_eq!(target.host, "127.0.0.1");

        assert!(TcpTarget::parse_listen("nine").is_err());
    }

    #[test]
    fn test_local_target_maps_name_into_temp_dir() {
        let target = LocalTarget::parse("bus").unwrap();
        assert_eq!(target.name(), "bus");
        assert!(target.path().starts_with(std::env::temp_dir()));
        assert!(target
            .path()
            .to_string_lossy()
            .ends_with("eventwire-bus.sock"));
        assert_eq!(target.endpoint(), Endpoint::local("bus"));
    }

    #[test]
    fn test_local_target_with_path() {
        let target = LocalTarget::parse("/tmp/custom.sock").unwrap();
        assert_eq!(target.path(), Path::new("/tmp/custom.sock"));
        assert_eq!(target.name(), "/tmp/custom.sock");
    }

    #[test]
    fn test_local_target_rejects_bad_names() {
        assert!(LocalTarget::parse("").is_err());
        assert!(LocalTarget::parse("   ").is_err());
        assert!(LocalTarget::parse("a\0b").is_err());

        let long = format!("/tmp/{}", "x".repeat(200));
        assert!(matches!(
            LocalTarget::parse(&long),
            Err(WireError::InvalidTarget { .. })
        ));
    }
}
