//! Tunnel layer - the steady-state data plane
//!
//! Provides:
//! - Block framing of Ethernet frames and keep-alives
//! - The forwarding pipeline between the virtual interface and the tunnel

mod frame;
mod pipeline;

pub use frame::{
    decode, pack, unpack, Frame, TunnelBlock, FRAME_HEADER_SIZE, KEEPALIVE_PAYLOAD,
    KEEPALIVE_SENTINEL, MAX_BLOCK_SIZE, MAX_DATA_BLOCKS,
};
pub use pipeline::{Pipeline, PipelineConfig, Pump, PumpExit};

use thiserror::Error;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Block too large: {0} > {1}")]
    BlockTooLarge(usize, usize),

    #[error("Tunnel closed by peer")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(#[from] crate::device::DeviceError),
}

/// Bytes read from the virtual interface per frame
pub const INTERFACE_READ_SIZE: usize = 1500;

/// Depth of the write queue shared by the interface reader and the keep-alive timer
pub const WRITE_QUEUE_DEPTH: usize = 256;

/// Default keep-alive period in seconds
pub const KEEPALIVE_INTERVAL: u64 = 10;
