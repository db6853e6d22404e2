//! Watermark cover payload

use super::{random_below, random_bytes};
use bytes::{Bytes, BytesMut};

/// Upper bound (exclusive) of the random tail length
pub const WATERMARK_TAIL_MAX: u32 = 1000;

/// Declared media type of the upload; deliberately misleading
pub const WATERMARK_CONTENT_TYPE: &str = "image/jpeg";

/// Fixed marker the gateway recognizes at the start of the upload.
/// Shaped like the header of a tiny GIF image.
pub const WATERMARK_MARKER: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0xc8, 0x00, 0x33, 0x00, 0xf2, 0x00, 0x00, 0x36, 0x37,
    0x34, 0x79, 0x68, 0x54, 0x80, 0x80, 0x80, 0xd0, 0x7e, 0x52, 0xad, 0xbb, 0xa1, 0xe2, 0xaf,
    0x7c, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x07, 0x00,
    0x2c, 0x00, 0x00, 0x00, 0x00, 0xc8, 0x00, 0x33, 0x00, 0x00, 0x03, 0xfe, 0x78, 0xba, 0xdc,
];

/// One generated cover payload
#[derive(Debug, Clone)]
pub struct Watermark {
    payload: Bytes,
}

impl Watermark {
    /// Marker followed by a random tail of uniform length in `[0, WATERMARK_TAIL_MAX)`
    pub fn generate() -> Self {
        let tail_len = random_below(WATERMARK_TAIL_MAX) as usize;
        Self::with_tail_len(tail_len)
    }

    /// Marker followed by `tail_len` random bytes
    pub fn with_tail_len(tail_len: usize) -> Self {
        let mut payload = BytesMut::with_capacity(WATERMARK_MARKER.len() + tail_len);
        payload.extend_from_slice(WATERMARK_MARKER);

        let mut tail = vec![0u8; tail_len];
        random_bytes(&mut tail);
        payload.extend_from_slice(&tail);

        Self {
            payload: payload.freeze(),
        }
    }

    /// Length of the whole payload
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty (never, the marker is always present)
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload bytes
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_shape() {
        for _ in 0..50 {
            let mark = Watermark::generate();
            assert!(mark.len() >= WATERMARK_MARKER.len());
            assert!(mark.len() < WATERMARK_MARKER.len() + WATERMARK_TAIL_MAX as usize);
            assert!(mark.into_bytes().starts_with(WATERMARK_MARKER));
        }
    }

    #[test]
    fn test_fixed_tail() {
        let mark = Watermark::with_tail_len(0);
        assert_eq!(&mark.into_bytes()[..], WATERMARK_MARKER);
    }
}
