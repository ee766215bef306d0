//! Device command vocabulary and payload layouts.
//!
//! All multi-byte fields are little-endian.
//!
//! | id | name        | direction      | payload                          |
//! |----|-------------|----------------|----------------------------------|
//! | 0  | KEEP_ALIVE  | both           | (none)                           |
//! | 1  | PLC_START   | host → dev, ack| (none)                           |
//! | 2  | PLC_STOP    | host → dev, ack| (none)                           |
//! | 3  | PLC_RESET   | host → dev     | (none)                           |
//! | 4  | PLC_INIT    | host → dev     | (none)                           |
//! | 5  | PLC_UPLOAD  | reserved       |                                  |
//! | 6  | TICK        | dev → host     | u32 tick                         |
//! | 7  | SET_TRACE   | host → dev     | u32 id, u32 width, u8 forced, value |
//! | 8  | GET_TRACE   | both           | u16 id / raw sample bytes        |
//! | 9  | WAIT_TRACE  | host → dev     | u16 id                           |
//! | 10 | RESET_TRACE | host → dev     | (none)                           |

use crate::error::LinkError;
use crate::plc::TraceEntry;

pub const KEEP_ALIVE: u8 = 0;
pub const PLC_START: u8 = 1;
pub const PLC_STOP: u8 = 2;
pub const PLC_RESET: u8 = 3;
pub const PLC_INIT: u8 = 4;
pub const PLC_UPLOAD: u8 = 5;
pub const PLC_TICK: u8 = 6;
pub const SET_TRACE: u8 = 7;
pub const GET_TRACE: u8 = 8;
pub const WAIT_TRACE: u8 = 9;
pub const RESET_TRACE: u8 = 10;

/// Human-readable command name for logs.
pub fn command_name(id: u8) -> &'static str {
    match id {
        KEEP_ALIVE => "KEEP_ALIVE",
        PLC_START => "PLC_START",
        PLC_STOP => "PLC_STOP",
        PLC_RESET => "PLC_RESET",
        PLC_INIT => "PLC_INIT",
        PLC_UPLOAD => "PLC_UPLOAD",
        PLC_TICK => "TICK",
        SET_TRACE => "SET_TRACE",
        GET_TRACE => "GET_TRACE",
        WAIT_TRACE => "WAIT_TRACE",
        RESET_TRACE => "RESET_TRACE",
        _ => "UNKNOWN",
    }
}

/// SET_TRACE payload for one selected variable.
pub fn set_trace_payload(entry: &TraceEntry) -> Vec<u8> {
    let mut p = Vec::with_capacity(9 + entry.initial.len());
    p.extend_from_slice(&u32::from(entry.id).to_le_bytes());
    p.extend_from_slice(&(entry.ty.width() as u32).to_le_bytes());
    p.push(u8::from(entry.forced));
    p.extend_from_slice(&entry.initial);
    p
}

/// GET_TRACE / WAIT_TRACE request payload.
pub fn trace_request_payload(id: u16) -> [u8; 2] {
    id.to_le_bytes()
}

pub fn tick_payload(tick: u32) -> [u8; 4] {
    tick.to_le_bytes()
}

pub fn parse_tick(payload: &[u8]) -> Result<u32, LinkError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| LinkError::Protocol("TICK payload must be 4 bytes"))?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn parse_trace_request(payload: &[u8]) -> Result<u16, LinkError> {
    let bytes: [u8; 2] = payload
        .try_into()
        .map_err(|_| LinkError::Protocol("trace request must carry a 2-byte id"))?;
    Ok(u16::from_le_bytes(bytes))
}

/// Decoded SET_TRACE request (device side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetTraceRequest {
    pub id: u32,
    pub width: u32,
    pub forced: bool,
    pub value: Vec<u8>,
}

pub fn parse_set_trace(payload: &[u8]) -> Result<SetTraceRequest, LinkError> {
    if payload.len() < 9 {
        return Err(LinkError::Protocol("SET_TRACE payload too short"));
    }
    let id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let width = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let value = &payload[9..];
    if value.len() != width as usize {
        return Err(LinkError::Protocol("SET_TRACE value does not match width"));
    }
    Ok(SetTraceRequest {
        id,
        width,
        forced: payload[8] != 0,
        value: value.to_vec(),
    })
}
