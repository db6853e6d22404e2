//! In-memory virtual interface
//!
//! Each opened interface is paired with a [`MemoryPeer`] that plays the
//! local network stack: frames sent through `inject` are read by the
//! tunnel, frames the tunnel writes show up on `written`.

use super::{DeviceError, InterfaceProvider, VirtualInterface};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Local-stack side of a [`MemoryInterface`]
pub struct MemoryPeer {
    /// Interface name the session asked for
    pub name: String,
    /// Frames to hand to the tunnel
    pub inject: mpsc::Sender<Bytes>,
    /// Frames the tunnel delivered
    pub written: mpsc::UnboundedReceiver<Bytes>,
    closed: CancellationToken,
}

impl MemoryPeer {
    /// Whether the interface has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the interface is closed
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await
    }
}

/// Interface backed by channels
pub struct MemoryInterface {
    name: String,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    closed: CancellationToken,
}

impl MemoryInterface {
    /// Create an interface and its peer
    pub fn pair(name: impl Into<String>) -> (Self, MemoryPeer) {
        let name = name.into();
        let (inject, inbound) = mpsc::channel(64);
        let (outbound, written) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let iface = Self {
            name: name.clone(),
            inbound: Mutex::new(inbound),
            outbound,
            closed: closed.clone(),
        };
        let peer = MemoryPeer {
            name,
            inject,
            written,
            closed,
        };
        (iface, peer)
    }
}

#[async_trait]
impl VirtualInterface for MemoryInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(DeviceError::Closed),
            frame = inbound.recv() => {
                let frame = frame.ok_or(DeviceError::Closed)?;
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
        }
    }

    async fn write(&self, frame: &[u8]) -> Result<(), DeviceError> {
        if self.closed.is_cancelled() {
            return Err(DeviceError::Closed);
        }
        self.outbound
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| DeviceError::Closed)
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Provider handing out [`MemoryInterface`]s
pub struct MemoryProvider {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    deny: bool,
}

impl MemoryProvider {
    /// Provider plus the stream of peers for every interface it opens
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers, deny: false }, rx)
    }

    /// Provider that refuses every open, like an unprivileged process
    pub fn denying() -> Self {
        let (peers, _) = mpsc::unbounded_channel();
        Self { peers, deny: true }
    }
}

#[async_trait]
impl InterfaceProvider for MemoryProvider {
    async fn open(&self, name: &str) -> Result<Arc<dyn VirtualInterface>, DeviceError> {
        if self.deny {
            return Err(DeviceError::PermissionDenied(format!(
                "not allowed to create {}",
                name
            )));
        }
        let (iface, peer) = MemoryInterface::pair(name);
        let _ = self.peers.send(peer);
        Ok(Arc::new(iface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_interface_exchange() {
        let (iface, mut peer) = MemoryInterface::pair("mem0");

        peer.inject.send(Bytes::from_static(b"frame")).await.unwrap();
        let mut buf = [0u8; 1500];
        let n = iface.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"frame");

        iface.write(b"reply").await.unwrap();
        assert_eq!(peer.written.recv().await.unwrap(), Bytes::from_static(b"reply"));
    }

    #[tokio::test]
    async fn test_close_wakes_reader() {
        let (iface, peer) = MemoryInterface::pair("mem0");
        let iface = Arc::new(iface);

        let reader = {
            let iface = Arc::clone(&iface);
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                iface.read(&mut buf).await
            })
        };

        tokio::task::yield_now().await;
        iface.close();

        assert!(matches!(reader.await.unwrap(), Err(DeviceError::Closed)));
        assert!(peer.is_closed());
        assert!(matches!(iface.write(b"x").await, Err(DeviceError::Closed)));
    }

    #[tokio::test]
    async fn test_denying_provider() {
        let provider = MemoryProvider::denying();
        assert!(matches!(
            provider.open("vpn_go").await,
            Err(DeviceError::PermissionDenied(_))
        ));
    }
}
