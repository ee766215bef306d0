//! MIN frame codec.
//!
//! Wire format:
//! ```text
//! ┌──────────┬──────┬─────┬───────────────┬────────────┬─────┐
//! │ AA AA AA │ id   │ len │ payload (len) │ CRC32 (BE) │ 55  │
//! └──────────┴──────┴─────┴───────────────┴────────────┴─────┘
//! ```
//!
//! The CRC covers id, len and payload. Between header and EOF, every run
//! of two `0xAA` bytes is followed by a `0x55` stuff byte so the header
//! can never appear inside a frame.
//!
//! Frames with bit 7 of the id set are reliable transport frames and carry
//! a sequence byte after the id; the peer retransmits them until they are
//! acknowledged. The decoder delivers each sequence number once, in
//! order, and every transport frame (repeats included) is answered with a
//! cumulative ACK carrying the next expected sequence. The link sends a
//! transport RESET with its first frame so both ends start at sequence 0.
//!
//! The decoder is a byte-at-a-time state machine, so partial reads,
//! line noise and concatenated frames are all handled the same way.

use log::{debug, error, warn};

use crate::error::LinkError;

use super::transport::{Frame, FrameLink, Transport};

pub const HEADER_BYTE: u8 = 0xAA;
pub const STUFF_BYTE: u8 = 0x55;
pub const EOF_BYTE: u8 = 0x55;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = 255;

const ID_MASK: u8 = 0x3F;
const TRANSPORT_FLAG: u8 = 0x80;
/// Transport-layer ACK / RESET ids (with the flag set).
const TRANSPORT_ACK: u8 = 0xFF;
const TRANSPORT_RESET: u8 = 0xFE;

const READ_BUF_SIZE: usize = 256;

// ── Encoder ──────────────────────────────────────────────────

struct Stuffer<'a> {
    out: &'a mut Vec<u8>,
    run: u8,
}

impl Stuffer<'_> {
    fn push(&mut self, byte: u8) {
        self.out.push(byte);
        if byte == HEADER_BYTE {
            self.run += 1;
            if self.run == 2 {
                self.out.push(STUFF_BYTE);
                self.run = 0;
            }
        } else {
            self.run = 0;
        }
    }
}

/// Append one encoded frame to `out`.
pub fn encode_frame(id: u8, payload: &[u8], out: &mut Vec<u8>) -> Result<(), LinkError> {
    encode(id & ID_MASK, None, payload, out)
}

/// Append one reliable transport frame with sequence number `seq`.
pub fn encode_transport_frame(
    id: u8,
    seq: u8,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), LinkError> {
    encode((id & ID_MASK) | TRANSPORT_FLAG, Some(seq), payload, out)
}

/// Cumulative ACK: everything before `rn` was received.
fn encode_ack(rn: u8, out: &mut Vec<u8>) -> Result<(), LinkError> {
    encode(TRANSPORT_ACK, Some(rn), &[rn], out)
}

fn encode_reset(out: &mut Vec<u8>) -> Result<(), LinkError> {
    encode(TRANSPORT_RESET, Some(0), &[], out)
}

fn encode(
    id_control: u8,
    seq: Option<u8>,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), LinkError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge);
    }

    let len = payload.len() as u8;

    let mut crc = crc32fast::Hasher::new();
    crc.update(&[id_control]);
    if let Some(seq) = seq {
        crc.update(&[seq]);
    }
    crc.update(&[len]);
    crc.update(payload);
    let crc = crc.finalize();

    out.extend_from_slice(&[HEADER_BYTE; 3]);
    let mut s = Stuffer { out, run: 0 };
    s.push(id_control);
    if let Some(seq) = seq {
        s.push(seq);
    }
    s.push(len);
    for &b in payload {
        s.push(b);
    }
    for b in crc.to_be_bytes() {
        s.push(b);
    }
    out.push(EOF_BYTE);
    Ok(())
}

// ── Decoder ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    SearchingForSof,
    Id,
    Seq,
    Length,
    Payload,
    Crc { remaining: u8 },
    Eof,
}

/// Streaming MIN frame decoder.
pub struct MinDecoder {
    state: RxState,
    header_seen: u8,
    id_control: u8,
    length: usize,
    payload: heapless::Vec<u8, MAX_PAYLOAD>,
    crc: crc32fast::Hasher,
    received_crc: u32,
    crc_failures: u32,
    seq: u8,
    /// Next transport sequence number expected from the peer.
    rn: u8,
    /// ACK owed to the peer, if any transport frame arrived.
    ack: Option<u8>,
}

impl MinDecoder {
    pub fn new() -> Self {
        Self {
            state: RxState::SearchingForSof,
            header_seen: 0,
            id_control: 0,
            length: 0,
            payload: heapless::Vec::new(),
            crc: crc32fast::Hasher::new(),
            received_crc: 0,
            crc_failures: 0,
            seq: 0,
            rn: 0,
            ack: None,
        }
    }

    /// Frames dropped because their checksum did not match.
    pub fn crc_failures(&self) -> u32 {
        self.crc_failures
    }

    /// The ACK owed for transport frames received since the last call.
    pub fn take_ack(&mut self) -> Option<u8> {
        self.ack.take()
    }

    /// Restart transport sequencing at 0.
    pub fn reset_transport(&mut self) {
        self.rn = 0;
        self.ack = None;
    }

    /// Feed bytes, pushing every completed frame onto `frames`.
    pub fn feed(&mut self, data: &[u8], frames: &mut Vec<Frame>) {
        for &byte in data {
            if let Some(frame) = self.feed_byte(byte) {
                frames.push(frame);
            }
        }
    }

    /// Feed one byte. Returns a frame when `byte` completes one.
    pub fn feed_byte(&mut self, byte: u8) -> Option<Frame> {
        if self.header_seen == 2 {
            self.header_seen = 0;
            if byte == HEADER_BYTE {
                self.state = RxState::Id;
                return None;
            }
            if byte == STUFF_BYTE {
                return None;
            }
            self.state = RxState::SearchingForSof;
            return None;
        }

        if byte == HEADER_BYTE {
            self.header_seen += 1;
        } else {
            self.header_seen = 0;
        }

        match self.state {
            RxState::SearchingForSof => {}
            RxState::Id => {
                self.id_control = byte;
                self.payload.clear();
                self.crc = crc32fast::Hasher::new();
                self.crc.update(&[byte]);
                self.state = if byte & TRANSPORT_FLAG != 0 {
                    RxState::Seq
                } else {
                    RxState::Length
                };
            }
            RxState::Seq => {
                self.seq = byte;
                self.crc.update(&[byte]);
                self.state = RxState::Length;
            }
            RxState::Length => {
                self.crc.update(&[byte]);
                self.length = byte as usize;
                self.received_crc = 0;
                self.state = if self.length > 0 {
                    RxState::Payload
                } else {
                    RxState::Crc { remaining: 4 }
                };
            }
            RxState::Payload => {
                self.crc.update(&[byte]);
                // Capacity equals the largest encodable length.
                let _ = self.payload.push(byte);
                if self.payload.len() == self.length {
                    self.state = RxState::Crc { remaining: 4 };
                }
            }
            RxState::Crc { remaining } => {
                self.received_crc = (self.received_crc << 8) | u32::from(byte);
                if remaining > 1 {
                    self.state = RxState::Crc {
                        remaining: remaining - 1,
                    };
                } else {
                    let computed = core::mem::replace(&mut self.crc, crc32fast::Hasher::new())
                        .finalize();
                    if computed == self.received_crc {
                        self.state = RxState::Eof;
                    } else {
                        self.crc_failures += 1;
                        debug!("LINK: CRC mismatch on id 0x{:02x}", self.id_control);
                        self.state = RxState::SearchingForSof;
                    }
                }
            }
            RxState::Eof => {
                self.state = RxState::SearchingForSof;
                if byte == EOF_BYTE {
                    return self.complete();
                }
            }
        }
        None
    }

    fn complete(&mut self) -> Option<Frame> {
        match self.id_control {
            // The host never queues transport frames, so ACKs retire nothing.
            TRANSPORT_ACK => return None,
            TRANSPORT_RESET => {
                debug!("LINK: peer reset transport sequencing");
                self.reset_transport();
                return None;
            }
            _ => {}
        }

        if self.id_control & TRANSPORT_FLAG != 0 {
            let fresh = self.seq == self.rn;
            if fresh {
                self.rn = self.rn.wrapping_add(1);
            } else {
                debug!(
                    "LINK: dropping transport frame seq {} (expecting {})",
                    self.seq, self.rn
                );
            }
            // Repeats are acknowledged again; the earlier ACK may have been lost.
            self.ack = Some(self.rn);
            if !fresh {
                return None;
            }
        }
        Some(Frame::new(self.id_control & ID_MASK, self.payload.as_slice()))
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = RxState::SearchingForSof;
        self.header_seen = 0;
        self.payload.clear();
        self.reset_transport();
    }
}

impl Default for MinDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Framed link over any transport ───────────────────────────

/// [`FrameLink`] speaking MIN framing over a byte [`Transport`].
pub struct MinLink<T: Transport> {
    transport: Option<T>,
    decoder: MinDecoder,
    tx_buf: Vec<u8>,
    /// Set once the transport RESET has gone out.
    synced: bool,
}

impl<T: Transport> MinLink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Some(transport),
            decoder: MinDecoder::new(),
            tx_buf: Vec::with_capacity(MAX_PAYLOAD + 16),
            synced: false,
        }
    }

    fn transport(&mut self) -> Result<&mut T, LinkError> {
        self.transport.as_mut().ok_or(LinkError::Closed)
    }

    fn fail(&mut self, op: &str, e: &T::Error) -> LinkError {
        error!("LINK: {} failed: {}", op, e);
        self.transport = None;
        LinkError::Transport
    }

    /// Write all of `buf`, then flush.
    fn transmit(&mut self, buf: &[u8]) -> Result<(), LinkError> {
        let mut written = 0;
        while written < buf.len() {
            match self.transport()?.write(&buf[written..]) {
                Ok(0) => {
                    warn!("LINK: transport accepted no bytes");
                    self.transport = None;
                    return Err(LinkError::Closed);
                }
                Ok(n) => written += n,
                Err(e) => return Err(self.fail("write", &e)),
            }
        }
        match self.transport()?.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail("flush", &e)),
        }
    }

    fn send_ack(&mut self, rn: u8) -> Result<(), LinkError> {
        let mut buf = Vec::with_capacity(16);
        encode_ack(rn, &mut buf)?;
        self.transmit(&buf)
    }
}

impl<T: Transport> FrameLink for MinLink<T> {
    fn send_frame(&mut self, id: u8, payload: &[u8]) -> Result<(), LinkError> {
        let mut buf = core::mem::take(&mut self.tx_buf);
        buf.clear();
        let mut result = Ok(());
        if !self.synced {
            self.decoder.reset_transport();
            result = encode_reset(&mut buf);
        }
        let result = result
            .and_then(|()| encode_frame(id, payload, &mut buf))
            .and_then(|()| self.transmit(&buf));
        self.tx_buf = buf;
        if result.is_ok() && !self.synced {
            debug!("LINK: transport sequencing reset");
            self.synced = true;
        }
        result
    }

    fn poll(&mut self) -> Result<Vec<Frame>, LinkError> {
        let mut frames = Vec::new();
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            let transport = self.transport()?;
            let pending = match transport.available() {
                Ok(n) => n,
                Err(e) => return Err(self.fail("poll", &e)),
            };
            if pending == 0 {
                break;
            }
            let want = pending.min(buf.len());
            match self.transport()?.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => self.decoder.feed(&buf[..n], &mut frames),
                Err(e) => return Err(self.fail("read", &e)),
            }
        }
        if let Some(rn) = self.decoder.take_ack() {
            self.send_ack(rn)?;
        }
        Ok(frames)
    }

    fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!("LINK: transport closed");
        }
        self.decoder.reset();
        self.synced = false;
    }
}
