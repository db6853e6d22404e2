//! Block framing for the tunnel
//!
//! Frame format (big endian):
//! ```text
//! +-----------------+-----------------+---------+-----------------+---------+
//! | block_count (4) | block_size (4)  | block   | block_size (4)  | block   | ...
//! +-----------------+-----------------+---------+-----------------+---------+
//! ```
//!
//! A `block_count` above `MAX_DATA_BLOCKS` marks a control frame; the
//! keep-alive uses `KEEPALIVE_SENTINEL` and carries exactly one block.
//! The client only ever sends single-block data frames.

use super::TunnelError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// `block_count` plus the first `block_size`
pub const FRAME_HEADER_SIZE: usize = 8;

/// Block count announcing a keep-alive
pub const KEEPALIVE_SENTINEL: u32 = 0xFFFF_FFFF;

/// Largest block count still treated as data
pub const MAX_DATA_BLOCKS: u32 = 0xFFF;

/// Largest block accepted from the peer
pub const MAX_BLOCK_SIZE: usize = 65535;

/// Fixed keep-alive body
pub const KEEPALIVE_PAYLOAD: [u8; 5] = [0x00, 0x11, 0x22, 0x33, 0x44];

/// One framed unit with a single payload block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelBlock {
    pub block_count: u32,
    pub payload: Bytes,
}

impl TunnelBlock {
    /// Data frame carrying one Ethernet frame
    pub fn data(payload: Bytes) -> Self {
        Self {
            block_count: 1,
            payload,
        }
    }

    /// Keep-alive frame
    pub fn keepalive() -> Self {
        Self {
            block_count: KEEPALIVE_SENTINEL,
            payload: Bytes::from_static(&KEEPALIVE_PAYLOAD),
        }
    }

    /// Whether this is a control frame rather than data
    pub fn is_control(&self) -> bool {
        self.block_count > MAX_DATA_BLOCKS
    }

    /// Encode to bytes
    pub fn encode(&self) -> Bytes {
        pack(self.block_count, &self.payload)
    }
}

/// Emit `block_count`, `len(payload)`, `payload`
pub fn pack(block_count: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(block_count);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Extract the first block of one complete frame held in `data`.
///
/// Yields `None` when the block count is zero or above the data-block
/// limit (a control frame). A data frame whose first block is empty yields
/// `Some` of an empty payload. Only the first block is returned even when
/// more are announced.
pub fn unpack(data: &[u8]) -> Result<Option<Bytes>, TunnelError> {
    let mut buf = data;
    let block_count = read_u32(&mut buf)?;
    if block_count > MAX_DATA_BLOCKS || block_count == 0 {
        return Ok(None);
    }

    let size = read_u32(&mut buf)? as usize;
    if size > buf.remaining() {
        return Err(TunnelError::Truncated {
            needed: size,
            remaining: buf.remaining(),
        });
    }
    Ok(Some(Bytes::copy_from_slice(&buf[..size])))
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, TunnelError> {
    if buf.remaining() < 4 {
        return Err(TunnelError::Truncated {
            needed: 4,
            remaining: buf.remaining(),
        });
    }
    Ok(buf.get_u32())
}

/// A frame decoded from the tunnel byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Data blocks, each one Ethernet frame
    Data(Vec<Bytes>),
    /// Control or keep-alive frame; never forwarded to the interface
    Control { block_count: u32, payload: Bytes },
}

/// Decode one frame from the front of a stream buffer.
///
/// Returns `Ok(None)` until the whole frame has arrived and consumes nothing
/// in that case.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, TunnelError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let block_count = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let blocks = if block_count > MAX_DATA_BLOCKS {
        1
    } else {
        block_count as usize
    };

    // Walk the size prefixes without consuming
    let mut offset = 4;
    let mut sizes = Vec::with_capacity(blocks.min(16));
    for _ in 0..blocks {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let size =
            u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
                as usize;
        if size > MAX_BLOCK_SIZE {
            return Err(TunnelError::BlockTooLarge(size, MAX_BLOCK_SIZE));
        }
        offset += 4 + size;
        if buf.len() < offset {
            return Ok(None);
        }
        sizes.push(size);
    }

    buf.advance(4);
    let mut payloads = Vec::with_capacity(sizes.len());
    for size in sizes {
        buf.advance(4);
        payloads.push(buf.split_to(size).freeze());
    }

    if block_count > MAX_DATA_BLOCKS {
        let payload = payloads.pop().unwrap_or_default();
        Ok(Some(Frame::Control {
            block_count,
            payload,
        }))
    } else {
        Ok(Some(Frame::Data(payloads)))
    }
}
