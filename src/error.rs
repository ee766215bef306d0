//! Unified error types for the PLC link service.
//!
//! Every subsystem has a small `Copy` error enum; the top-level [`Error`]
//! wraps them so the RPC engine can collapse any failure into a single
//! reason string at the remote boundary.

use core::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Top-level service error
// ---------------------------------------------------------------------------

/// Every fallible service operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The serial link or frame codec failed.
    Link(LinkError),
    /// Blob staging failed.
    Blob(BlobError),
    /// A program upload failed after it was accepted.
    Upload(UploadError),
    /// A trace selection was rejected.
    Trace(TraceError),
    /// A status or log query was out of range.
    Query(QueryError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// The RPC layer failed.
    Rpc(RpcError),
    /// The service is shutting down and no longer accepts lifecycle calls.
    ShuttingDown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Blob(e) => write!(f, "blob: {e}"),
            Self::Upload(e) => write!(f, "upload: {e}"),
            Self::Trace(e) => write!(f, "trace: {e}"),
            Self::Query(e) => write!(f, "query: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Rpc(e) => write!(f, "rpc: {e}"),
            Self::ShuttingDown => write!(f, "service shutting down"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// A transport read, write or flush failed.
    Transport,
    /// The transport was closed by the peer or by a previous fault.
    Closed,
    /// A frame payload exceeded the 255-byte wire limit.
    PayloadTooLarge,
    /// A frame arrived with a payload the protocol cannot interpret.
    Protocol(&'static str),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport I/O failed"),
            Self::Closed => write!(f, "link closed"),
            Self::PayloadTooLarge => write!(f, "frame payload too large"),
            Self::Protocol(what) => write!(f, "protocol violation: {what}"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Blob errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobError {
    /// No pending blob is indexed under the given key.
    UnknownKey,
    /// The next digest is already the key of another pending blob.
    KeyCollision,
    /// Filesystem operation on the staging area failed.
    Io(io::ErrorKind),
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey => write!(f, "unknown blob key"),
            Self::KeyCollision => write!(f, "blob digest collides with a pending blob"),
            Self::Io(kind) => write!(f, "staging I/O failed ({kind})"),
        }
    }
}

impl From<io::Error> for BlobError {
    fn from(e: io::Error) -> Self {
        Self::Io(e.kind())
    }
}

impl From<BlobError> for Error {
    fn from(e: BlobError) -> Self {
        Self::Blob(e)
    }
}

// ---------------------------------------------------------------------------
// Upload errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    /// Upload requested while a program is running.
    InvalidState,
    /// None of the extra files names a build environment.
    MissingEnvironment,
    /// A file name would escape the target directory.
    InvalidFileName,
    /// A staged blob could not be committed.
    Commit(BlobError),
    /// The target directory could not be prepared.
    Io(io::ErrorKind),
    /// The flasher process could not be started.
    FlasherSpawn,
    /// The flasher exited unsuccessfully (exit code if any).
    FlashFailed(Option<i32>),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => write!(f, "program is running"),
            Self::MissingEnvironment => write!(f, "missing build environment file"),
            Self::InvalidFileName => write!(f, "invalid file name"),
            Self::Commit(e) => write!(f, "commit failed: {e}"),
            Self::Io(kind) => write!(f, "target directory I/O failed ({kind})"),
            Self::FlasherSpawn => write!(f, "flasher could not be started"),
            Self::FlashFailed(Some(code)) => write!(f, "flasher exited with status {code}"),
            Self::FlashFailed(None) => write!(f, "flasher terminated by signal"),
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(e: io::Error) -> Self {
        Self::Io(e.kind())
    }
}

impl From<BlobError> for UploadError {
    fn from(e: BlobError) -> Self {
        Self::Commit(e)
    }
}

impl From<UploadError> for Error {
    fn from(e: UploadError) -> Self {
        Self::Upload(e)
    }
}

// ---------------------------------------------------------------------------
// Trace selection errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    /// Variable id does not fit the 16-bit trace request field.
    IdOutOfRange(u32),
    /// Initial value kind cannot be encoded as the variable's type.
    TypeMismatch,
    /// Initial value does not fit the variable's width.
    ValueOutOfRange,
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdOutOfRange(id) => write!(f, "variable id {id} out of range"),
            Self::TypeMismatch => write!(f, "initial value does not match variable type"),
            Self::ValueOutOfRange => write!(f, "initial value out of range for variable type"),
        }
    }
}

impl From<TraceError> for Error {
    fn from(e: TraceError) -> Self {
        Self::Trace(e)
    }
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    /// Log level outside 0..=3.
    LevelOutOfRange(u8),
    /// No record at this index for the level.
    IndexOutOfRange { level: u8, index: u32 },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LevelOutOfRange(level) => write!(f, "log level {level} out of range"),
            Self::IndexOutOfRange { level, index } => {
                write!(f, "log index {index} out of range for level {level}")
            }
        }
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        Self::Query(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(io::ErrorKind),
    /// The config file is not valid JSON for [`ServiceConfig`](crate::config::ServiceConfig).
    Corrupted,
    /// A field failed range validation; describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(kind) => write!(f, "config file unreadable ({kind})"),
            Self::Corrupted => write!(f, "config file is not valid"),
            Self::ValidationFailed(why) => write!(f, "validation failed: {why}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// RPC errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    /// Socket I/O failed.
    Io(io::ErrorKind),
    /// The peer closed the connection.
    Closed,
    /// A length prefix exceeded the frame limit.
    FrameTooLarge,
    /// A message could not be serialised.
    Encode,
    /// A message could not be deserialised.
    Decode,
    /// The reply did not match the request.
    UnexpectedResponse,
    /// The server reported a failure.
    Remote,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(kind) => write!(f, "socket I/O failed ({kind})"),
            Self::Closed => write!(f, "connection closed"),
            Self::FrameTooLarge => write!(f, "frame exceeds size limit"),
            Self::Encode => write!(f, "message encode failed"),
            Self::Decode => write!(f, "message decode failed"),
            Self::UnexpectedResponse => write!(f, "unexpected response"),
            Self::Remote => write!(f, "remote call failed"),
        }
    }
}

impl From<io::Error> for RpcError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => Self::Closed,
            kind => Self::Io(kind),
        }
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Service-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
