//! Protocol module - Defines the serial wire format
//!
//! A frame is a two-part unit written to the serial link:
//! - 2 bytes payload length (little-endian unsigned)
//! - Variable length payload
//!
//! There is no checksum, acknowledgement, or version field.

mod codec;

pub use codec::*;

/// Default port for the HTTP listener
pub const DEFAULT_PORT: u16 = 8003;

/// Default baud rate for the serial link
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest payload the length prefix can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
