//! Transport abstractions for the device link.
//!
//! Two layers:
//! - [`Transport`]: any byte-oriented channel (serial port, simulator).
//! - [`FrameLink`]: whole frames on top of a transport. The device
//!   session only ever talks to a `FrameLink`, so swapping the framing or
//!   the byte channel needs no session changes.

use core::fmt;

use crate::error::LinkError;

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: fmt::Display;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read; 0 if nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> Result<usize, Self::Error>;
}

/// One frame exchanged with the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command identifier (6 bits on the wire).
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(id: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// Framed, bidirectional device link.
pub trait FrameLink {
    /// Queue one frame for the device.
    fn send_frame(&mut self, id: u8, payload: &[u8]) -> Result<(), LinkError>;

    /// Drain every frame received since the last poll. Never blocks.
    fn poll(&mut self) -> Result<Vec<Frame>, LinkError>;

    /// Release the underlying transport. Further calls fail with
    /// [`LinkError::Closed`].
    fn close(&mut self);
}
