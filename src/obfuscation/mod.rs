//! Traffic disguise for the handshake
//!
//! The first request on a fresh connection uploads a "watermark": a fixed
//! marker followed by a random-length random tail, posted as if it were an
//! image. It carries no secret; it only makes the opening exchange look like
//! an ordinary upload and varies its size between connections.

mod watermark;

pub use watermark::{Watermark, WATERMARK_CONTENT_TYPE, WATERMARK_MARKER, WATERMARK_TAIL_MAX};

/// Fill `buf` with cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    rng.fill(buf).expect("Failed to generate random bytes");
}

/// Uniform random integer in `[0, bound)`; `bound` must be non-zero
pub fn random_below(bound: u32) -> u32 {
    debug_assert!(bound > 0);
    // Rejection sampling keeps the distribution uniform
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let mut buf = [0u8; 4];
        random_bytes(&mut buf);
        let value = u32::from_le_bytes(buf);
        if value < zone {
            return value % bound;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes() {
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];
        random_bytes(&mut buf1);
        random_bytes(&mut buf2);
        assert_ne!(buf1, buf2);
    }

    #[test]
    fn test_random_below_bound() {
        for _ in 0..1000 {
            assert!(random_below(7) < 7);
        }
        assert_eq!(random_below(1), 0);
    }
}
