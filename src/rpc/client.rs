//! Blocking RPC client.
//!
//! Used by the integration tests and by anything scripting the service
//! from Rust. One request is in flight per connection.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use hmac_sha256::Hash;
use log::debug;

use crate::blob::BlobKey;
use crate::error::RpcError;
use crate::plc::{LifecycleState, LogRecord, TraceVariable};

use super::codec::{FrameDecoder, encode_frame};
use super::messages::{self, Envelope, Request, Response};

pub struct RpcClient {
    stream: TcpStream,
    decoder: FrameDecoder,
    next_id: u32,
    last_failure: Option<String>,
}

impl RpcClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            next_id: 1,
            last_failure: None,
        })
    }

    /// Reason carried by the most recent [`RpcError::Remote`].
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Send one request and wait for its reply.
    pub fn call(&mut self, request: Request) -> Result<Response, RpcError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let payload = messages::encode(&Envelope { id, body: request })?;
        self.stream.write_all(&encode_frame(&payload)?)?;

        let frame = self.read_frame()?;
        let reply: Envelope<Response> = messages::decode(&frame)?;
        if reply.id != id {
            debug!("RPC: reply id {} does not match request {}", reply.id, id);
            return Err(RpcError::UnexpectedResponse);
        }
        Ok(reply.body)
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, RpcError> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(frame);
            }
            match self.stream.read(&mut buf)? {
                0 => return Err(RpcError::Closed),
                n => self.decoder.feed(&buf[..n])?,
            }
        }
    }

    /// Call and unwrap the expected reply shape.
    fn expect<T>(
        &mut self,
        request: Request,
        pick: impl FnOnce(Response) -> Option<T>,
    ) -> Result<T, RpcError> {
        match self.call(request)? {
            Response::Failure(reason) => {
                self.last_failure = Some(reason);
                Err(RpcError::Remote)
            }
            other => pick(other).ok_or(RpcError::UnexpectedResponse),
        }
    }

    // ── Typed calls ───────────────────────────────────────────

    pub fn upload_program(
        &mut self,
        checksum: &str,
        firmware: BlobKey,
        extra_files: Vec<(String, BlobKey)>,
    ) -> Result<bool, RpcError> {
        let req = Request::UploadProgram {
            checksum: checksum.into(),
            firmware,
            extra_files,
        };
        self.expect(req, |r| match r {
            Response::Bool(b) => Some(b),
            _ => None,
        })
    }

    pub fn start_program(&mut self) -> Result<(), RpcError> {
        self.expect(Request::StartProgram, |r| match r {
            Response::Unit => Some(()),
            _ => None,
        })
    }

    pub fn stop_program(&mut self) -> Result<bool, RpcError> {
        self.expect(Request::StopProgram, |r| match r {
            Response::Bool(b) => Some(b),
            _ => None,
        })
    }

    pub fn query_status(&mut self) -> Result<(LifecycleState, [u32; 4]), RpcError> {
        self.expect(Request::QueryStatus, |r| match r {
            Response::Status { state, counts } => Some((state, counts)),
            _ => None,
        })
    }

    pub fn fetch_log_record(&mut self, level: u8, index: u32) -> Result<LogRecord, RpcError> {
        self.expect(Request::FetchLogRecord { level, index }, |r| match r {
            Response::LogRecord(record) => Some(record),
            _ => None,
        })
    }

    pub fn select_trace_variables(
        &mut self,
        variables: Vec<TraceVariable>,
    ) -> Result<u32, RpcError> {
        self.expect(Request::SelectTraceVariables(variables), |r| match r {
            Response::Token(t) => Some(t),
            _ => None,
        })
    }

    pub fn fetch_trace_samples(
        &mut self,
        token: u32,
    ) -> Result<(LifecycleState, Vec<(u32, Vec<u8>)>), RpcError> {
        self.expect(Request::FetchTraceSamples { token }, |r| match r {
            Response::TraceSamples { state, samples } => Some((state, samples)),
            _ => None,
        })
    }

    pub fn begin_blob(&mut self, seed: &[u8]) -> Result<BlobKey, RpcError> {
        self.expect(Request::BeginBlob { seed: seed.to_vec() }, |r| match r {
            Response::BlobKey(key) => Some(key),
            _ => None,
        })
    }

    pub fn append_chunk(
        &mut self,
        key: BlobKey,
        data: &[u8],
    ) -> Result<Option<BlobKey>, RpcError> {
        let req = Request::AppendChunk {
            key,
            data: data.to_vec(),
        };
        self.expect(req, |r| match r {
            Response::MaybeBlobKey(next) => Some(next),
            _ => None,
        })
    }

    pub fn purge_all_blobs(&mut self) -> Result<(), RpcError> {
        self.expect(Request::PurgeAllBlobs, |r| match r {
            Response::Unit => Some(()),
            _ => None,
        })
    }

    pub fn match_checksum(&mut self, checksum: &str) -> Result<bool, RpcError> {
        let req = Request::MatchChecksum {
            checksum: checksum.into(),
        };
        self.expect(req, |r| match r {
            Response::Bool(b) => Some(b),
            _ => None,
        })
    }

    /// Stage `data` in `chunk_size` pieces, checking every returned key
    /// against the locally computed digest chain.
    pub fn upload_blob(
        &mut self,
        seed: &[u8],
        data: &[u8],
        chunk_size: usize,
    ) -> Result<BlobKey, RpcError> {
        let mut local = Hash::new();
        local.update(seed);

        let mut key = self.begin_blob(seed)?;
        if key.0 != local.clone().finalize() {
            return Err(RpcError::UnexpectedResponse);
        }
        for chunk in data.chunks(chunk_size.max(1)) {
            local.update(chunk);
            key = self
                .append_chunk(key, chunk)?
                .ok_or(RpcError::UnexpectedResponse)?;
            if key.0 != local.clone().finalize() {
                return Err(RpcError::UnexpectedResponse);
            }
        }
        Ok(key)
    }
}
