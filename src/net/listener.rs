//! Socket binding for protocol listeners.
//!
//! # Responsibilities
//! - Bind UDP sockets, TCP listeners and local control sockets
//! - Report the address actually bound
//!
//! Plugins call these from their open hook, after the conflict index has
//! accepted the listener's coverage.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::net::{TcpListener, UdpSocket};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(SocketAddr, std::io::Error),
    /// Failed to create a local socket.
    Path(PathBuf, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ListenerError::Path(path, e) => write!(f, "Failed to open {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A socket opened on behalf of a listener.
#[derive(Debug)]
pub enum BoundSocket {
    Udp(UdpSocket),
    Tcp {
        listener: TcpListener,
        /// Maximum concurrent connections the scheduler should accept.
        max_connections: usize,
    },
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
}

impl BoundSocket {
    /// Human readable local endpoint.
    pub fn describe(&self) -> String {
        match self {
            BoundSocket::Udp(socket) => match socket.local_addr() {
                Ok(addr) => format!("udp {}", addr),
                Err(_) => "udp <unknown>".to_string(),
            },
            BoundSocket::Tcp { listener, .. } => match listener.local_addr() {
                Ok(addr) => format!("tcp {}", addr),
                Err(_) => "tcp <unknown>".to_string(),
            },
            #[cfg(unix)]
            BoundSocket::Unix { path, .. } => format!("unix {}", path.display()),
        }
    }

    /// Local socket address for network sockets.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            BoundSocket::Udp(socket) => socket.local_addr().ok(),
            BoundSocket::Tcp { listener, .. } => listener.local_addr().ok(),
            #[cfg(unix)]
            BoundSocket::Unix { .. } => None,
        }
    }
}

/// Bind a UDP socket.
pub async fn bind_udp(addr: SocketAddr) -> Result<BoundSocket, ListenerError> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|e| ListenerError::Bind(addr, e))?;

    tracing::debug!(address = %addr, "UDP socket bound");
    Ok(BoundSocket::Udp(socket))
}

/// Bind a TCP listener with a connection ceiling.
pub async fn bind_tcp(addr: SocketAddr, max_connections: usize) -> Result<BoundSocket, ListenerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ListenerError::Bind(addr, e))?;

    tracing::debug!(
        address = %addr,
        max_connections = max_connections,
        "TCP listener bound"
    );
    Ok(BoundSocket::Tcp {
        listener,
        max_connections,
    })
}

/// Bind a local stream socket at `path`, replacing a stale socket file.
#[cfg(unix)]
pub fn bind_unix(path: &Path) -> Result<BoundSocket, ListenerError> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| ListenerError::Path(path.to_path_buf(), e))?;
    }
    let listener = tokio::net::UnixListener::bind(path)
        .map_err(|e| ListenerError::Path(path.to_path_buf(), e))?;

    tracing::debug!(path = %path.display(), "Control socket bound");
    Ok(BoundSocket::Unix {
        listener,
        path: path.to_path_buf(),
    })
}

#[cfg(not(unix))]
pub fn bind_unix(path: &Path) -> Result<BoundSocket, ListenerError> {
    Err(ListenerError::Path(
        path.to_path_buf(),
        std::io::Error::new(std::io::ErrorKind::Unsupported, "local sockets need a unix platform"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_udp_ephemeral() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = socket.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(socket.describe().starts_with("udp 127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_bind_tcp_twice_fails() {
        let first = bind_tcp("127.0.0.1:0".parse().unwrap(), 16).await.unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_tcp(addr, 16).await;
        assert!(matches!(second, Err(ListenerError::Bind(..))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_replaces_stale_file() {
        let path = std::env::temp_dir().join("vserver_listener_test.sock");
        std::fs::write(&path, b"stale").unwrap();

        let socket = bind_unix(&path).unwrap();
        assert!(socket.describe().contains("vserver_listener_test.sock"));

        drop(socket);
        std::fs::remove_file(&path).unwrap_or_default();
    }
}
