//! Raw TCP transport (for testing and internal networks)

use super::{Dialed, Dialer, TransportConfig, TransportError};
use async_trait::async_trait;
use tokio::net::TcpStream;

/// Raw TCP dialer
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    config: TransportConfig,
}

impl TcpDialer {
    /// Create a new TCP dialer
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub(crate) async fn connect_tcp(
        config: &TransportConfig,
        addr: &str,
    ) -> Result<TcpStream, TransportError> {
        let timeout = std::time::Duration::from_secs(config.connect_timeout);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        // Small control frames should not wait on Nagle
        stream.set_nodelay(true).ok();

        Ok(stream)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<Dialed, TransportError> {
        let stream = Self::connect_tcp(&self.config, addr).await?;
        let local_addr = stream.local_addr().ok();
        Ok(Dialed {
            stream: Box::new(stream),
            local_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_dialer() {
        // Start a simple echo server
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let dialer = TcpDialer::default();
        let mut dialed = dialer.dial(&addr.to_string()).await.unwrap();
        assert!(dialed.local_addr.is_some());

        let msg = b"Hello, TCP!";
        dialed.stream.write_all(msg).await.unwrap();

        let mut buf = [0u8; 1024];
        let n = dialed.stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], msg);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_dial_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = TcpDialer::default();
        assert!(dialer.dial(&addr.to_string()).await.is_err());
    }
}
