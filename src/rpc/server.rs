//! TCP front end for the [`RpcEngine`].
//!
//! One thread accepts connections, polling a non-blocking listener every
//! 50 ms so it notices the run flag. Each client gets its own thread:
//! Start/Stop block their caller until the device answers, and a blocked
//! client must not stall the others.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use super::codec::{FrameDecoder, encode_frame};
use super::engine::RpcEngine;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// Client read timeout; bounds how long a client thread takes to see the run flag.
const CLIENT_POLL: Duration = Duration::from_millis(100);
const READ_BUF_SIZE: usize = 8192;

pub struct RpcServer {
    listener: TcpListener,
    engine: Arc<RpcEngine>,
    run: Arc<AtomicBool>,
}

impl RpcServer {
    /// Bind `addr:port`; port 0 picks a free port (see [`local_addr`](Self::local_addr)).
    pub fn bind(
        addr: &str,
        port: u16,
        engine: Arc<RpcEngine>,
        run: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((addr, port))?;
        listener.set_nonblocking(true)?;
        info!("RPC: listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            engine,
            run,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until the run flag clears, then wait for every
    /// client thread to finish.
    pub fn serve(self) {
        let mut clients: Vec<JoinHandle<()>> = Vec::new();
        let mut next_client = 0u32;

        while self.run.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    next_client = next_client.wrapping_add(1);
                    let id = next_client;
                    info!("RPC[{}]: connected from {}", id, peer);
                    let engine = Arc::clone(&self.engine);
                    let run = Arc::clone(&self.run);
                    let spawned = thread::Builder::new()
                        .name(format!("rpc-client-{id}"))
                        .spawn(move || serve_client(id, stream, &engine, &run));
                    match spawned {
                        Ok(handle) => clients.push(handle),
                        Err(e) => warn!("RPC[{}]: could not spawn client thread: {}", id, e),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!("RPC: accept error: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
            clients.retain(|c| !c.is_finished());
        }

        info!("RPC: server stopping, {} client(s) open", clients.len());
        for client in clients {
            let _ = client.join();
        }
    }

    /// Run [`serve`](Self::serve) on its own thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("rpc-server".into())
            .spawn(move || self.serve())
    }
}

fn serve_client(id: u32, mut stream: TcpStream, engine: &RpcEngine, run: &AtomicBool) {
    if let Err(e) = configure(&stream) {
        warn!("RPC[{}]: socket setup failed: {}", id, e);
        return;
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    while run.load(Ordering::Acquire) {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                debug!("RPC[{}]: read failed: {}", id, e);
                break;
            }
        };

        if let Err(e) = decoder.feed(&buf[..n]) {
            warn!("RPC[{}]: dropping connection: {}", id, e);
            break;
        }

        while let Some(frame) = decoder.next_frame() {
            let reply = match engine.handle_frame(&frame).and_then(|p| encode_frame(&p)) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("RPC[{}]: could not encode reply: {}", id, e);
                    continue;
                }
            };
            if let Err(e) = stream.write_all(&reply) {
                debug!("RPC[{}]: write failed: {}", id, e);
                return;
            }
        }
    }
    info!("RPC[{}]: disconnected", id);
}

fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_POLL))?;
    stream.set_nodelay(true)
}
