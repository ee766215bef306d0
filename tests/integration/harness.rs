//! Shared test harness: a control service wired to a device session that
//! talks MIN over the in-process simulated controller.
//!
//! Timing is shrunk (40 ms keepalive windows, 2 ms polling, threshold 3)
//! so link-loss scenarios finish in well under a second.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use plcbridge::app::events::{Message, Topic};
use plcbridge::app::ports::{FirmwareFlasher, FlashReport};
use plcbridge::app::service::ControlService;
use plcbridge::blob::BlobKey;
use plcbridge::config::ServiceConfig;
use plcbridge::error::UploadError;
use plcbridge::link::codec::MinLink;
use plcbridge::link::session::{DeviceSession, SessionOutcome};
use plcbridge::link::sim::{SimHandle, SimulatedPlc};
use plcbridge::relay::Relay;
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(5);

// ── Mock flasher ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FlashCall {
    pub build_root: PathBuf,
    pub environment: String,
    /// Files present in `<build_root>/pio/<env>` when the flasher ran.
    pub files: Vec<String>,
}

/// Records every flash and answers with a configurable exit status.
#[derive(Clone)]
pub struct MockFlasher {
    pub calls: Arc<Mutex<Vec<FlashCall>>>,
    pub status: Arc<Mutex<Option<i32>>>,
}

impl MockFlasher {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new(Some(0))),
        }
    }

    pub fn fail_with(&self, status: i32) {
        *self.status.lock() = Some(status);
    }

    pub fn succeed(&self) {
        *self.status.lock() = Some(0);
    }
}

impl FirmwareFlasher for MockFlasher {
    fn flash(&self, build_root: &Path, environment: &str) -> Result<FlashReport, UploadError> {
        let dir = build_root.join("pio").join(environment);
        let mut files: Vec<String> = std::fs::read_dir(&dir)
            .map_err(|e| UploadError::Io(e.kind()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        self.calls.lock().push(FlashCall {
            build_root: build_root.to_path_buf(),
            environment: environment.to_owned(),
            files,
        });
        Ok(FlashReport {
            status: *self.status.lock(),
            stdout: "mock flasher output".into(),
            stderr: String::new(),
        })
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub tmp: TempDir,
    pub config: ServiceConfig,
    pub relay: Relay,
    pub service: Arc<ControlService>,
    pub flasher: MockFlasher,
    pub device: SimHandle,
    pub run: Arc<AtomicBool>,
    link: mpsc::Receiver<bool>,
    session: Option<JoinHandle<SessionOutcome>>,
}

impl Harness {
    /// Service plus a running session whose device is already ready.
    pub fn start() -> Self {
        let h = Self::start_unready();
        h.wait_link(true);
        h
    }

    pub fn start_unready() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            work_dir: tmp.path().to_path_buf(),
            simulate: true,
            keepalive_period_ms: 40,
            idle_threshold: 3,
            poll_interval_ms: 2,
            ..ServiceConfig::default()
        };
        config.validate().unwrap();

        let relay = Relay::new();
        let flasher = MockFlasher::new();
        let service =
            ControlService::new(&config, relay.clone(), Box::new(flasher.clone())).unwrap();

        let (tx, link) = mpsc::channel();
        let tx = Mutex::new(tx);
        relay.subscribe(Topic::LinkStatus, move |msg| {
            if let Message::LinkStatus { ready } = msg {
                let _ = tx.lock().send(*ready);
            }
        });

        let run = Arc::new(AtomicBool::new(true));
        let (device, session) = spawn_session(&relay, &config, &run);
        Self {
            tmp,
            config,
            relay,
            service,
            flasher,
            device,
            run,
            link,
            session: Some(session),
        }
    }

    /// Start a fresh session against a fresh simulated device, as the
    /// binary's supervisor does after a fault.
    pub fn restart_session(&mut self) -> SessionOutcome {
        let outcome = self.join_session();
        let (device, session) = spawn_session(&self.relay, &self.config, &self.run);
        self.device = device;
        self.session = Some(session);
        outcome
    }

    /// Wait for the current session to end.
    pub fn join_session(&mut self) -> SessionOutcome {
        self.session
            .take()
            .expect("session running")
            .join()
            .expect("session thread panicked")
    }

    /// Block until the link reports `ready`, skipping other transitions.
    pub fn wait_link(&self, ready: bool) {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.link.recv_timeout(left) {
                Ok(r) if r == ready => return,
                Ok(_) => {}
                Err(_) => panic!("link never became ready={ready}"),
            }
        }
    }

    /// Stage `data` as a blob through the service.
    pub fn stage(&self, seed: &[u8], data: &[u8]) -> BlobKey {
        let mut key = self.service.begin_blob(seed).unwrap();
        for chunk in data.chunks(7) {
            key = self.service.append_chunk(&key, chunk).unwrap().unwrap();
        }
        key
    }

    /// Upload a program for environment `bluepill`; asserts success.
    pub fn install(&self, checksum: &str) {
        let firmware = self.stage(b"fw", b"\x7fELF firmware image");
        let env = self.stage(b"env", b"");
        let files = vec![("env.bluepill".to_string(), env)];
        assert!(self.service.upload_program(checksum, &firmware, &files));
    }

    pub fn build_dir(&self, env: &str) -> PathBuf {
        self.tmp.path().join("pio").join(env)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.run.store(false, Ordering::Release);
        if let Some(session) = self.session.take() {
            let _ = session.join();
        }
    }
}

fn spawn_session(
    relay: &Relay,
    config: &ServiceConfig,
    run: &Arc<AtomicBool>,
) -> (SimHandle, JoinHandle<SessionOutcome>) {
    let (sim, device) = SimulatedPlc::new();
    let session = DeviceSession::new(relay.clone(), config.session_config(), Arc::clone(run));
    (device, session.spawn(MinLink::new(sim)).unwrap())
}

/// Poll `check` until it returns `Some` or the deadline passes.
pub fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(v) = check() {
            return v;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
