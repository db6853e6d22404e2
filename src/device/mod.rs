//! Virtual network interface capability
//!
//! The session only needs a frame-oriented read/write channel that can be
//! closed from any task. Closing must wake a pending `read` so the pump
//! blocked on it can exit.

pub mod memory;

#[cfg(feature = "tap")]
mod tap;

pub use memory::{MemoryInterface, MemoryPeer, MemoryProvider};

#[cfg(feature = "tap")]
pub use tap::{TapInterface, TapProvider};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Device errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Permission denied creating interface: {0}")]
    PermissionDenied(String),

    #[error("Failed to open interface: {0}")]
    Open(String),

    #[error("Interface closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open virtual interface exchanging whole Ethernet frames
#[async_trait]
pub trait VirtualInterface: Send + Sync {
    /// OS-visible interface name
    fn name(&self) -> &str;

    /// Read one frame into `buf`, returning its length
    async fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Write one frame
    async fn write(&self, frame: &[u8]) -> Result<(), DeviceError>;

    /// Close the interface; idempotent, wakes pending reads
    fn close(&self);
}

/// Creates virtual interfaces
#[async_trait]
pub trait InterfaceProvider: Send + Sync {
    async fn open(&self, name: &str) -> Result<Arc<dyn VirtualInterface>, DeviceError>;
}
