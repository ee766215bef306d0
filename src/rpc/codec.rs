//! Length-prefix frame codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬─────────────────────────┐
//! │ Length (4B)│ postcard payload (N B)  │
//! │ LE u32     │                         │
//! └────────────┴─────────────────────────┘
//! ```
//!
//! The codec accumulates incoming bytes and queues complete frames. A
//! single socket read may return part of the header, part of the payload,
//! or several frames concatenated.

use std::collections::VecDeque;

use crate::error::RpcError;

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame header size (4-byte little-endian length).
const HEADER_SIZE: usize = 4;

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading payload.
    ReadingPayload { expected: usize },
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; HEADER_SIZE],
    payload_buf: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; HEADER_SIZE],
            payload_buf: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Feed bytes into the decoder, queueing every completed frame.
    ///
    /// A zero or oversized length is unrecoverable: the stream has lost
    /// sync and the connection should be dropped.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), RpcError> {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::ReadingHeader { collected } => {
                    let to_copy = (HEADER_SIZE - *collected).min(data.len() - offset);
                    self.header_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == HEADER_SIZE {
                        let expected = u32::from_le_bytes(self.header_buf) as usize;
                        if expected == 0 || expected > MAX_FRAME_SIZE {
                            self.reset();
                            return Err(RpcError::FrameTooLarge);
                        }
                        self.payload_buf = Vec::with_capacity(expected.min(64 * 1024));
                        self.state = DecoderState::ReadingPayload { expected };
                    }
                }

                DecoderState::ReadingPayload { expected } => {
                    let needed = *expected - self.payload_buf.len();
                    let to_copy = needed.min(data.len() - offset);
                    self.payload_buf
                        .extend_from_slice(&data[offset..offset + to_copy]);
                    offset += to_copy;

                    if self.payload_buf.len() == *expected {
                        self.ready.push_back(core::mem::take(&mut self.payload_buf));
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                    }
                }
            }
        }
        Ok(())
    }

    /// Pop the oldest completed frame payload.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Reset decoder state (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
        self.payload_buf.clear();
        self.ready.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a payload into a length-prefixed frame: `[LE-u32 length][payload]`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, RpcError> {
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge);
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
