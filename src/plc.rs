//! PLC domain types shared by the control service and the device session.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TraceError;

/// Coarse run status of the control program as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No program loaded.
    Empty,
    /// Program loaded, not running.
    Stopped,
    /// Program running.
    Started,
    /// Upload or start failed; only a successful upload leaves this state.
    Broken,
}

impl LifecycleState {
    /// Whether a new program may be uploaded from this state.
    pub const fn accepts_upload(self) -> bool {
        matches!(self, Self::Empty | Self::Stopped | Self::Broken)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "Empty",
            Self::Stopped => "Stopped",
            Self::Started => "Started",
            Self::Broken => "Broken",
        };
        f.write_str(name)
    }
}

/// Log severity; the discriminant is the wire level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogLevel {
    Critical = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub const COUNT: usize = 4;

    pub const fn from_index(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Critical),
            1 => Some(Self::Warning),
            2 => Some(Self::Info),
            3 => Some(Self::Debug),
            _ => None,
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One appended log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    /// Device tick when the record was produced.
    pub tick: u32,
    /// Wall clock, seconds since the Unix epoch.
    pub secs: u64,
    /// Sub-second part of the wall clock.
    pub nanos: u32,
}

// ---------------------------------------------------------------------------
// IEC 61131 variable types
// ---------------------------------------------------------------------------

/// Elementary types accepted for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IecType {
    Bool,
    Byte,
    Sint,
    Usint,
    String,
    Int,
    Word,
    Uint,
    Dint,
    Dword,
    Udint,
    Real,
    Lint,
    Lword,
    Ulint,
    Lreal,
    Date,
    Dt,
    Time,
    Tod,
}

impl IecType {
    /// Byte width of a sampled value on the device.
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::Byte | Self::Sint | Self::Usint | Self::String => 1,
            Self::Int | Self::Word | Self::Uint => 2,
            Self::Dint | Self::Dword | Self::Udint | Self::Real => 4,
            Self::Lint
            | Self::Lword
            | Self::Ulint
            | Self::Lreal
            | Self::Date
            | Self::Dt
            | Self::Time
            | Self::Tod => 8,
        }
    }

    /// Parse the IEC type tag used by the IDE (`"DINT"`, `"TOD"`...).
    pub fn from_tag(tag: &str) -> Option<Self> {
        let ty = match tag {
            "BOOL" => Self::Bool,
            "BYTE" => Self::Byte,
            "SINT" => Self::Sint,
            "USINT" => Self::Usint,
            "STRING" => Self::String,
            "INT" => Self::Int,
            "WORD" => Self::Word,
            "UINT" => Self::Uint,
            "DINT" => Self::Dint,
            "DWORD" => Self::Dword,
            "UDINT" => Self::Udint,
            "REAL" => Self::Real,
            "LINT" => Self::Lint,
            "LWORD" => Self::Lword,
            "ULINT" => Self::Ulint,
            "LREAL" => Self::Lreal,
            "DATE" => Self::Date,
            "DT" => Self::Dt,
            "TIME" => Self::Time,
            "TOD" => Self::Tod,
            _ => return None,
        };
        Some(ty)
    }

    /// Little-endian encoding of an initial value, exactly `width()` bytes.
    ///
    /// An absent value encodes as zero (a single NUL byte for STRING).
    pub fn encode(self, value: Option<&IecValue>) -> Result<Vec<u8>, TraceError> {
        let Some(value) = value else {
            return Ok(vec![0; self.width()]);
        };

        let bytes = match self {
            Self::Bool => vec![u8::from(value.as_bool()?)],
            Self::String => match value {
                IecValue::Text(s) => vec![s.as_bytes().first().copied().unwrap_or(0)],
                _ => return Err(TraceError::TypeMismatch),
            },
            Self::Byte | Self::Sint => integer::<i8>(value)?.to_le_bytes().to_vec(),
            Self::Usint => integer::<u8>(value)?.to_le_bytes().to_vec(),
            Self::Int | Self::Word => integer::<i16>(value)?.to_le_bytes().to_vec(),
            Self::Uint => integer::<u16>(value)?.to_le_bytes().to_vec(),
            Self::Dint | Self::Dword => integer::<i32>(value)?.to_le_bytes().to_vec(),
            Self::Udint => integer::<u32>(value)?.to_le_bytes().to_vec(),
            Self::Lint | Self::Lword => integer::<i64>(value)?.to_le_bytes().to_vec(),
            Self::Ulint | Self::Date | Self::Dt | Self::Time | Self::Tod => {
                integer::<u64>(value)?.to_le_bytes().to_vec()
            }
            Self::Real => (value.as_real()? as f32).to_le_bytes().to_vec(),
            Self::Lreal => value.as_real()?.to_le_bytes().to_vec(),
        };
        Ok(bytes)
    }
}

fn integer<T: TryFrom<i64>>(value: &IecValue) -> Result<T, TraceError> {
    let raw = match value {
        IecValue::Int(v) => *v,
        IecValue::Bool(b) => i64::from(*b),
        _ => return Err(TraceError::TypeMismatch),
    };
    T::try_from(raw).map_err(|_| TraceError::ValueOutOfRange)
}

/// Initial value supplied with a trace selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IecValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl IecValue {
    fn as_bool(&self) -> Result<bool, TraceError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int(v) => Ok(*v != 0),
            _ => Err(TraceError::TypeMismatch),
        }
    }

    fn as_real(&self) -> Result<f64, TraceError> {
        match self {
            Self::Real(v) => Ok(*v),
            Self::Int(v) => Ok(*v as f64),
            _ => Err(TraceError::TypeMismatch),
        }
    }
}

// ---------------------------------------------------------------------------
// Trace selection
// ---------------------------------------------------------------------------

/// One variable requested by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceVariable {
    pub id: u32,
    pub ty: IecType,
    pub value: Option<IecValue>,
}

/// A validated variable ready to be sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub id: u16,
    pub ty: IecType,
    /// Encoded initial value, `ty.width()` bytes.
    pub initial: Vec<u8>,
    pub forced: bool,
}

/// A validated trace selection tagged with its debug token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSelection {
    pub token: u32,
    pub entries: Vec<TraceEntry>,
}

impl TraceSelection {
    /// Validate every variable; a single bad entry rejects the selection.
    pub fn new(token: u32, variables: &[TraceVariable]) -> Result<Self, TraceError> {
        let entries = variables
            .iter()
            .map(|var| {
                let id = u16::try_from(var.id).map_err(|_| TraceError::IdOutOfRange(var.id))?;
                Ok(TraceEntry {
                    id,
                    ty: var.ty,
                    initial: var.ty.encode(var.value.as_ref())?,
                    forced: var.value.is_some(),
                })
            })
            .collect::<Result<Vec<_>, TraceError>>()?;
        Ok(Self { token, entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One completed trace sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSample {
    /// Debug token of the selection that produced the sweep.
    pub token: u32,
    /// Device tick captured at sweep start.
    pub tick: u32,
    /// Sampled payloads concatenated in selection order.
    pub data: Vec<u8>,
}
