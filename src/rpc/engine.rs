//! RPC engine: dispatches decoded requests to the [`ControlService`].
//!
//! **Transport-decoupled**: the engine owns no socket. The server feeds it
//! complete frame payloads and writes back whatever it returns, so the
//! same engine serves TCP clients and in-process tests alike.
//!
//! No failure escapes as a panic or a dropped reply: malformed input and
//! service errors all become [`Response::Failure`].

use std::sync::Arc;

use log::{debug, warn};

use crate::app::service::ControlService;
use crate::error::RpcError;

use super::messages::{self, Envelope, Request, Response};

pub struct RpcEngine {
    service: Arc<ControlService>,
}

impl RpcEngine {
    pub fn new(service: Arc<ControlService>) -> Self {
        Self { service }
    }

    /// Decode one frame payload, execute it and encode the reply.
    ///
    /// An undecodable frame is answered with a failure under id 0.
    pub fn handle_frame(&self, frame: &[u8]) -> Result<Vec<u8>, RpcError> {
        let reply = match messages::decode::<Request>(frame) {
            Ok(Envelope { id, body }) => Envelope {
                id,
                body: self.dispatch(body),
            },
            Err(e) => {
                warn!("RPC: rejecting malformed frame ({} bytes): {}", frame.len(), e);
                Envelope {
                    id: 0,
                    body: Response::Failure(e.to_string()),
                }
            }
        };
        messages::encode(&reply)
    }

    /// Execute one request against the service.
    pub fn dispatch(&self, request: Request) -> Response {
        debug!("RPC: {}", request.name());
        let svc = &self.service;
        match request {
            Request::UploadProgram {
                checksum,
                firmware,
                extra_files,
            } => Response::Bool(svc.upload_program(&checksum, &firmware, &extra_files)),
            Request::StartProgram => match svc.start_program() {
                Ok(()) => Response::Unit,
                Err(e) => failure(e),
            },
            Request::StopProgram => match svc.stop_program() {
                Ok(stopped) => Response::Bool(stopped),
                Err(e) => failure(e),
            },
            Request::QueryStatus => {
                let (state, counts) = svc.query_status();
                Response::Status { state, counts }
            }
            Request::FetchLogRecord { level, index } => {
                match svc.fetch_log_record(level, index) {
                    Ok(record) => Response::LogRecord(record),
                    Err(e) => failure(e),
                }
            }
            Request::SelectTraceVariables(variables) => {
                match svc.select_trace_variables(&variables) {
                    Ok(token) => Response::Token(token),
                    Err(e) => failure(e),
                }
            }
            Request::FetchTraceSamples { token } => {
                let (state, samples) = svc.fetch_trace_samples(token);
                Response::TraceSamples { state, samples }
            }
            Request::BeginBlob { seed } => match svc.begin_blob(&seed) {
                Ok(key) => Response::BlobKey(key),
                Err(e) => failure(e),
            },
            Request::AppendChunk { key, data } => match svc.append_chunk(&key, &data) {
                Ok(next) => Response::MaybeBlobKey(next),
                Err(e) => failure(e),
            },
            Request::PurgeAllBlobs => match svc.purge_all_blobs() {
                Ok(()) => Response::Unit,
                Err(e) => failure(e),
            },
            Request::MatchChecksum { checksum } => {
                Response::Bool(svc.match_checksum(&checksum))
            }
        }
    }
}

fn failure(e: impl core::fmt::Display) -> Response {
    warn!("RPC: request failed: {}", e);
    Response::Failure(e.to_string())
}
