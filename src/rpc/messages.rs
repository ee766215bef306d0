//! Remote surface message types.
//!
//! Every frame carries one postcard-encoded [`Envelope`]. Replies echo
//! the request id; failures cross the boundary as [`Response::Failure`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::blob::BlobKey;
use crate::error::RpcError;
use crate::plc::{LifecycleState, LogRecord, TraceVariable};

/// Correlates a reply with its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u32,
    pub body: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    UploadProgram {
        checksum: String,
        firmware: BlobKey,
        extra_files: Vec<(String, BlobKey)>,
    },
    StartProgram,
    StopProgram,
    QueryStatus,
    FetchLogRecord {
        level: u8,
        index: u32,
    },
    SelectTraceVariables(Vec<TraceVariable>),
    FetchTraceSamples {
        token: u32,
    },
    BeginBlob {
        seed: Vec<u8>,
    },
    AppendChunk {
        key: BlobKey,
        data: Vec<u8>,
    },
    PurgeAllBlobs,
    MatchChecksum {
        checksum: String,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UploadProgram { .. } => "UploadProgram",
            Self::StartProgram => "StartProgram",
            Self::StopProgram => "StopProgram",
            Self::QueryStatus => "QueryStatus",
            Self::FetchLogRecord { .. } => "FetchLogRecord",
            Self::SelectTraceVariables(_) => "SelectTraceVariables",
            Self::FetchTraceSamples { .. } => "FetchTraceSamples",
            Self::BeginBlob { .. } => "BeginBlob",
            Self::AppendChunk { .. } => "AppendChunk",
            Self::PurgeAllBlobs => "PurgeAllBlobs",
            Self::MatchChecksum { .. } => "MatchChecksum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Bool(bool),
    Unit,
    Status {
        state: LifecycleState,
        counts: [u32; 4],
    },
    LogRecord(LogRecord),
    Token(u32),
    TraceSamples {
        state: LifecycleState,
        samples: Vec<(u32, Vec<u8>)>,
    },
    BlobKey(BlobKey),
    /// `None` when the chunk's key is not pending.
    MaybeBlobKey(Option<BlobKey>),
    Failure(String),
}

pub fn encode<T: Serialize>(envelope: &Envelope<T>) -> Result<Vec<u8>, RpcError> {
    postcard::to_allocvec(envelope).map_err(|_| RpcError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<Envelope<T>, RpcError> {
    postcard::from_bytes(bytes).map_err(|_| RpcError::Decode)
}
