//! Transport layer implementations
//!
//! Provides the byte stream the handshake and the tunnel run over:
//! - TLS over TCP (gateway connections)
//! - Raw TCP (for testing and internal networks)

mod tcp;

#[cfg(feature = "tls")]
mod tls;

pub use tcp::TcpDialer;

#[cfg(feature = "tls")]
pub use tls::{insecure_client_config, TlsDialer};

#[cfg(feature = "tls")]
pub(crate) use tls::server_name;

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Timeout")]
    Timeout,
}

/// A bidirectional byte stream usable as a tunnel
pub trait TunnelIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> TunnelIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// An established connection
pub struct Dialed {
    pub stream: Box<dyn TunnelIo>,
    /// Local socket address, when the transport has one
    pub local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Dialed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialed")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Something that can open a stream to a `host:port` address
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Dialed, TransportError>;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout in seconds (TCP connect and TLS handshake each)
    pub connect_timeout: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { connect_timeout: 30 }
    }
}

/// Split `host:port` (brackets around IPv6 literals allowed) and return the bare host
pub fn host_of(addr: &str) -> &str {
    let host = match addr.rfind(':') {
        Some(idx) => {
            let head = &addr[..idx];
            // A bare IPv6 literal has colons but no port
            if !head.is_empty() && (addr.starts_with('[') || !head.contains(':')) {
                head
            } else {
                addr
            }
        }
        None => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
