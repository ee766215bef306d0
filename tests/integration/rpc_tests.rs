//! End-to-end RPC: a TCP server in front of the control service, driven
//! by the blocking client.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use plcbridge::blob::BlobKey;
use plcbridge::error::RpcError;
use plcbridge::plc::{IecType, IecValue, LifecycleState, TraceVariable};
use plcbridge::rpc::client::RpcClient;
use plcbridge::rpc::engine::RpcEngine;
use plcbridge::rpc::server::RpcServer;

use crate::harness::{Harness, eventually};

struct Served {
    h: Harness,
    addr: SocketAddr,
    server: Option<JoinHandle<()>>,
}

impl Served {
    fn start() -> Self {
        let h = Harness::start();
        let engine = Arc::new(RpcEngine::new(Arc::clone(&h.service)));
        let server = RpcServer::bind("127.0.0.1", 0, engine, Arc::clone(&h.run)).unwrap();
        let addr = server.local_addr().unwrap();
        let server = server.spawn().unwrap();
        Self {
            h,
            addr,
            server: Some(server),
        }
    }

    fn client(&self) -> RpcClient {
        RpcClient::connect(self.addr).unwrap()
    }
}

impl Drop for Served {
    fn drop(&mut self) {
        self.h.run.store(false, std::sync::atomic::Ordering::Release);
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
    }
}

#[test]
fn full_program_flow_over_rpc() {
    let s = Served::start();
    let mut c = s.client();

    assert_eq!(c.query_status().unwrap(), (LifecycleState::Empty, [0; 4]));
    assert!(!c.match_checksum("cafe").unwrap());

    let firmware = c.upload_blob(b"fw", &[0x5a; 1000], 64).unwrap();
    let env = c.upload_blob(b"env", b"", 64).unwrap();
    assert!(
        c.upload_program("cafe", firmware, vec![("env.nucleo".into(), env)])
            .unwrap()
    );
    assert!(c.match_checksum("cafe").unwrap());
    assert_eq!(
        std::fs::read(s.h.build_dir("nucleo").join("firmware.bin")).unwrap(),
        vec![0x5a; 1000]
    );

    c.start_program().unwrap();
    let (state, counts) = c.query_status().unwrap();
    assert_eq!(state, LifecycleState::Started);
    assert_eq!(counts, [0, 0, 0, 1]);
    assert_eq!(c.fetch_log_record(3, 0).unwrap().message, "PLC started");

    let token = c
        .select_trace_variables(vec![TraceVariable {
            id: 2,
            ty: IecType::Uint,
            value: Some(IecValue::Int(513)),
        }])
        .unwrap();
    let samples = eventually(|| {
        let (_, samples) = c.fetch_trace_samples(token).unwrap();
        (!samples.is_empty()).then_some(samples)
    });
    assert_eq!(samples[0].1, vec![0x01, 0x02]);

    assert!(c.stop_program().unwrap());
    assert!(!c.stop_program().unwrap());
    assert_eq!(c.query_status().unwrap().0, LifecycleState::Stopped);
}

#[test]
fn remote_failures_carry_a_reason() {
    let s = Served::start();
    let mut c = s.client();

    assert_eq!(c.fetch_log_record(0, 0), Err(RpcError::Remote));
    assert!(c.last_failure().is_some());
    assert_eq!(c.fetch_log_record(9, 0), Err(RpcError::Remote));

    let bad = vec![TraceVariable {
        id: 70_000,
        ty: IecType::Bool,
        value: None,
    }];
    assert_eq!(c.select_trace_variables(bad), Err(RpcError::Remote));

    // The connection survives failures.
    assert_eq!(c.query_status().unwrap().0, LifecycleState::Empty);
}

#[test]
fn append_to_unknown_key_returns_none() {
    let s = Served::start();
    let mut c = s.client();
    assert_eq!(c.append_chunk(BlobKey([7; 32]), b"data"), Ok(None));
}

#[test]
fn purge_forgets_staged_blobs() {
    let s = Served::start();
    let mut c = s.client();
    let key = c.upload_blob(b"seed", b"abc", 2).unwrap();

    c.purge_all_blobs().unwrap();
    assert_eq!(c.append_chunk(key, b"more"), Ok(None));
}

#[test]
fn clients_are_served_concurrently() {
    let s = Served::start();
    let mut a = s.client();
    let mut b = s.client();

    let key_a = a.begin_blob(b"a").unwrap();
    let key_b = b.begin_blob(b"b").unwrap();
    assert_ne!(key_a, key_b);
    assert!(a.append_chunk(key_a, b"1").unwrap().is_some());
    assert!(b.append_chunk(key_b, b"2").unwrap().is_some());
}

#[test]
fn zero_length_frame_drops_connection() {
    let s = Served::start();
    let mut raw = TcpStream::connect(s.addr).unwrap();
    raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    raw.write_all(&0u32.to_le_bytes()).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(raw.read(&mut buf).unwrap(), 0);

    // Other clients are unaffected.
    let mut c = s.client();
    assert!(c.query_status().is_ok());
}
