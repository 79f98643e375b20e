//! Frame construction for the serial wire format
//!
//! Validates payloads against the length-prefix range and exposes the
//! encoded parts in write order.

use bytes::Bytes;
use thiserror::Error;

use super::{LENGTH_PREFIX_LEN, MAX_PAYLOAD_LEN};

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),
}

/// A validated frame ready to be written to the serial link
#[derive(Debug, Clone)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Validate a payload against the length-prefix range
    pub fn new(payload: Bytes) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(payload.len(), MAX_PAYLOAD_LEN));
        }
        Ok(Self { payload })
    }

    /// The two-byte little-endian length prefix
    pub fn length_prefix(&self) -> [u8; LENGTH_PREFIX_LEN] {
        (self.payload.len() as u16).to_le_bytes()
    }

    /// The raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        LENGTH_PREFIX_LEN + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_little_endian() {
        let frame = Frame::new(Bytes::from_static(&[0x01, 0x02, 0x03])).unwrap();
        assert_eq!(frame.length_prefix(), [0x03, 0x00]);

        let frame = Frame::new(Bytes::from(vec![0u8; 0x1234])).unwrap();
        assert_eq!(frame.length_prefix(), [0x34, 0x12]);
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(Bytes::new()).unwrap();
        assert_eq!(frame.length_prefix(), [0x00, 0x00]);
        assert_eq!(frame.payload(), &[] as &[u8]);
        assert_eq!(frame.wire_len(), LENGTH_PREFIX_LEN);
    }

    #[test]
    fn test_max_payload_accepted() {
        let frame = Frame::new(Bytes::from(vec![0xAAu8; MAX_PAYLOAD_LEN])).unwrap();
        assert_eq!(frame.length_prefix(), [0xFF, 0xFF]);
        assert_eq!(frame.wire_len(), MAX_PAYLOAD_LEN + LENGTH_PREFIX_LEN);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let result = Frame::new(Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]));
        assert_eq!(
            result.unwrap_err(),
            FrameError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1, MAX_PAYLOAD_LEN)
        );
    }

    #[test]
    fn test_wire_len_counts_prefix() {
        let frame = Frame::new(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(frame.wire_len(), 7);
    }
}
