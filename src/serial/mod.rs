//! Serial link to the attached micro:bit
//!
//! Owns the open serial device and writes frames to it: the length prefix
//! first, then the payload, each write followed by a flush.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::protocol::Frame;

/// Serial link errors
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Port(#[from] tokio_serial::Error),
}

pub type SerialResult<T> = Result<T, SerialError>;

/// Sink for outgoing frames
///
/// The HTTP handler talks to the serial device through this trait so that
/// tests can substitute an in-memory sink.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame, returning the number of bytes put on the wire
    async fn send_frame(&mut self, frame: &Frame) -> SerialResult<usize>;
}

/// Render bytes as a colon-separated hex string, e.g. "03:00:ff"
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// An open serial connection that frames written payloads
pub struct SerialLink<W> {
    writer: W,
}

impl SerialLink<SerialStream> {
    /// Open a serial device at the given baud rate (8N1, no flow control)
    pub fn open(path: &Path, baud_rate: u32) -> SerialResult<Self> {
        let stream = tokio_serial::new(path.to_string_lossy(), baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        tracing::info!("Opened serial device {} at {} baud", path.display(), baud_rate);

        Ok(Self::new(stream))
    }
}

impl<W: AsyncWrite + Unpin + Send> SerialLink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one chunk and flush it through to the device
    async fn send_chunk(&mut self, data: &[u8], label: &str) -> SerialResult<usize> {
        self.writer.write_all(data).await?;
        self.writer.flush().await?;

        tracing::debug!(
            "[SEND {}] {} ({}/{} bytes)",
            label,
            hex_string(data),
            data.len(),
            data.len()
        );

        Ok(data.len())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for SerialLink<W> {
    async fn send_frame(&mut self, frame: &Frame) -> SerialResult<usize> {
        let prefix = frame.length_prefix();
        let mut written = self.send_chunk(&prefix, "LENGTH").await?;
        written += self.send_chunk(frame.payload(), "PROGRAM").await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x01, 0x02, 0xAB]), "01:02:ab");
        assert_eq!(hex_string(&[0x00]), "00");
        assert_eq!(hex_string(&[]), "");
    }

    #[tokio::test]
    async fn test_send_frame_writes_length_then_payload() {
        // The mock fails the test on any write that is out of order or
        // different from the expected bytes.
        let mock = tokio_test::io::Builder::new()
            .write(&[0x03, 0x00])
            .write(&[0x01, 0x02, 0x03])
            .build();

        let mut link = SerialLink::new(mock);
        let frame = Frame::new(Bytes::from_static(&[0x01, 0x02, 0x03])).unwrap();

        let written = link.send_frame(&frame).await.unwrap();
        assert_eq!(written, 5);
    }

    #[tokio::test]
    async fn test_send_empty_frame_writes_zero_prefix() {
        let mock = tokio_test::io::Builder::new().write(&[0x00, 0x00]).build();

        let mut link = SerialLink::new(mock);
        let frame = Frame::new(Bytes::new()).unwrap();

        let written = link.send_frame(&frame).await.unwrap();
        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn test_send_frame_propagates_write_errors() {
        let mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device detached",
            ))
            .build();

        let mut link = SerialLink::new(mock);
        let frame = Frame::new(Bytes::from_static(&[0x01])).unwrap();

        let result = link.send_frame(&frame).await;
        assert!(matches!(result, Err(SerialError::Io(_))));
    }
}
