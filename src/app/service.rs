//! Control service: the hexagonal core behind the remote surface.
//!
//! [`ControlService`] owns the authoritative lifecycle state, the four log
//! buffers, the trace token and sample queue, and the blob staging area.
//! It never touches the serial line: lifecycle commands travel to the
//! device session over the [`Relay`], and device events come back the
//! same way.
//!
//! ```text
//!  RpcEngine ──▶ ┌──────────────────────────┐ ──Command──▶ Relay
//!                │      ControlService      │
//!  Flasher   ◀── │ state · logs · trace · ✉ │ ◀─PlcState── Relay
//!                └──────────────────────────┘
//! ```
//!
//! Start and Stop block the calling thread on an `embassy-sync` signal
//! until the session reports a lifecycle change, the link drops the
//! command, or shutdown is broadcast.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::blob::{self, BlobKey, BlobStore};
use crate::config::ServiceConfig;
use crate::error::{Error, QueryError, Result, UploadError};
use crate::plc::{
    LifecycleState, LogLevel, LogRecord, TraceSample, TraceSelection, TraceVariable,
};
use crate::relay::{Relay, SubscriptionId};

use super::commands::SessionCommand;
use super::events::{Message, Topic};
use super::ports::FirmwareFlasher;

/// Name the firmware blob is committed under.
const FIRMWARE_FILE: &str = "firmware.bin";
/// Checksum of the last successfully flashed program.
const CHECKSUM_FILE: &str = "lastbuildPLC.md5";
/// Marker identifying the extra file that names the build environment.
const ENV_MARKER: &str = "env.";

/// Token returned when a selection disables tracing.
pub const TRACE_DISABLED: u32 = 0;

// ───────────────────────────────────────────────────────────────
// ControlService
// ───────────────────────────────────────────────────────────────

struct Inner {
    state: LifecycleState,
    logs: [Vec<LogRecord>; LogLevel::COUNT],
    starting: bool,
    /// Last readiness reported by the device session.
    link_ready: bool,
    debug_token: u32,
    last_checksum: Option<String>,
    trace_queue: VecDeque<TraceSample>,
    dropped_samples: u64,
}

pub struct ControlService {
    relay: Relay,
    blobs: BlobStore,
    flasher: Box<dyn FirmwareFlasher>,
    work_dir: PathBuf,
    trace_queue_depth: usize,
    inner: Mutex<Inner>,
    /// Serialises Upload / Start / Stop.
    lifecycle: Mutex<()>,
    /// Orders selection changes as the session sees them.
    selection: Mutex<()>,
    completion: Signal<CriticalSectionRawMutex, ()>,
    shutdown: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl ControlService {
    /// Build the service and subscribe it to the relay.
    ///
    /// Resets the blob staging directory under `config.work_dir`.
    pub fn new(
        config: &ServiceConfig,
        relay: Relay,
        flasher: Box<dyn FirmwareFlasher>,
    ) -> Result<Arc<Self>> {
        let blobs = BlobStore::open(config.work_dir.join("blobs"))?;
        let service = Arc::new(Self {
            relay,
            blobs,
            flasher,
            work_dir: config.work_dir.clone(),
            trace_queue_depth: config.trace_queue_depth.max(1),
            inner: Mutex::new(Inner {
                state: LifecycleState::Empty,
                logs: Default::default(),
                starting: false,
                link_ready: false,
                debug_token: TRACE_DISABLED,
                last_checksum: None,
                trace_queue: VecDeque::new(),
                dropped_samples: 0,
            }),
            lifecycle: Mutex::new(()),
            selection: Mutex::new(()),
            completion: Signal::new(),
            shutdown: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        });
        service.attach();
        info!("PLC: control service ready in {}", service.work_dir.display());
        Ok(service)
    }

    fn attach(self: &Arc<Self>) {
        let ids = [
            Topic::PlcState,
            Topic::Log,
            Topic::TraceSample,
            Topic::LinkStatus,
            Topic::Shutdown,
        ]
        .into_iter()
        .map(|topic| {
            let weak: Weak<Self> = Arc::downgrade(self);
            self.relay.subscribe(topic, move |msg| {
                if let Some(service) = weak.upgrade() {
                    service.on_message(msg);
                }
            })
        })
        .collect();
        *self.subscriptions.lock() = ids;
    }

    // ── Relay intake ──────────────────────────────────────────

    fn on_message(&self, msg: &Message) {
        match msg {
            Message::PlcState { state, tick } => self.on_plc_state(*state, *tick),
            Message::Log {
                level,
                message,
                tick,
            } => self.append_log(*level, message, *tick),
            Message::TraceSample(sample) => self.enqueue_sample(sample),
            Message::LinkStatus { ready } => {
                self.inner.lock().link_ready = *ready;
                if !*ready {
                    self.release_waiter();
                }
            }
            Message::Shutdown => {
                self.shutdown.store(true, Ordering::Release);
                self.completion.signal(());
            }
            _ => {}
        }
    }

    fn on_plc_state(&self, state: LifecycleState, tick: u32) {
        let records = {
            let mut inner = self.inner.lock();
            inner.state = state;
            let mut records = Vec::new();
            if state == LifecycleState::Stopped {
                records.push((LogLevel::Debug, "PLC stopped"));
            }
            if inner.starting {
                inner.starting = false;
                records.push(if state == LifecycleState::Started {
                    (LogLevel::Debug, "PLC started")
                } else {
                    (LogLevel::Critical, "Problem starting PLC")
                });
            }
            records
        };

        self.relay.publish(Message::Status { state });
        for (level, message) in records {
            self.relay.publish(Message::Log {
                level,
                message: message.into(),
                tick,
            });
        }
        self.completion.signal(());
    }

    /// The link dropped a command or went away: whoever is blocked on a
    /// lifecycle change returns and observes the unchanged state.
    fn release_waiter(&self) {
        let was_starting = core::mem::replace(&mut self.inner.lock().starting, false);
        if was_starting {
            self.relay.publish(Message::Log {
                level: LogLevel::Critical,
                message: "Problem starting PLC".into(),
                tick: 0,
            });
        }
        self.completion.signal(());
    }

    fn append_log(&self, level: LogLevel, message: &str, tick: u32) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.inner.lock().logs[level.index()].push(LogRecord {
            message: message.to_owned(),
            tick,
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        });
    }

    fn enqueue_sample(&self, sample: &TraceSample) {
        let mut inner = self.inner.lock();
        if sample.token != inner.debug_token {
            debug!("TRACE: dropping sample for stale token {}", sample.token);
            return;
        }
        if inner.trace_queue.len() >= self.trace_queue_depth {
            inner.trace_queue.pop_front();
            inner.dropped_samples += 1;
            if inner.dropped_samples.is_power_of_two() {
                warn!(
                    "TRACE: sample queue full, {} samples dropped so far",
                    inner.dropped_samples
                );
            }
        }
        inner.trace_queue.push_back(sample.clone());
    }

    fn set_state(&self, state: LifecycleState) {
        self.inner.lock().state = state;
        self.relay.publish(Message::Status { state });
    }

    fn check_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Install and flash a new program.
    ///
    /// Returns `false` without side effects unless the state accepts an
    /// upload. Once accepted, the call ends in `Stopped` (returns `true`)
    /// or `Broken` (returns `false`).
    pub fn upload_program(
        &self,
        checksum: &str,
        firmware: &BlobKey,
        extra_files: &[(String, BlobKey)],
    ) -> bool {
        let _guard = self.lifecycle.lock();
        let state = self.inner.lock().state;
        if !state.accepts_upload() {
            warn!("PLC: upload rejected in state {}", state);
            return false;
        }

        match self.install(checksum, firmware, extra_files) {
            Ok(env) => {
                self.inner.lock().last_checksum = Some(checksum.to_owned());
                self.set_state(LifecycleState::Stopped);
                info!("PLC: program {} installed for {}", checksum, env);
                self.inner.lock().state == LifecycleState::Stopped
            }
            Err(e) => {
                error!("PLC: problem uploading firmware to PLC: {}", e);
                self.inner.lock().last_checksum = None;
                self.set_state(LifecycleState::Broken);
                false
            }
        }
    }

    fn install(
        &self,
        checksum: &str,
        firmware: &BlobKey,
        extra_files: &[(String, BlobKey)],
    ) -> core::result::Result<String, UploadError> {
        let env = environment_of(extra_files).ok_or(UploadError::MissingEnvironment)?;
        let files: Vec<_> = extra_files
            .iter()
            .filter(|(name, _)| !name.contains(ENV_MARKER))
            .collect();
        if files.iter().any(|(name, _)| !is_plain_file_name(name)) {
            return Err(UploadError::InvalidFileName);
        }

        let build_dir = self.work_dir.join("pio").join(&env);
        blob::reset_dir(&build_dir)?;
        self.blobs.commit(firmware, &build_dir.join(FIRMWARE_FILE))?;
        for (name, key) in files {
            self.blobs.commit(key, &build_dir.join(name))?;
        }

        info!("PLC: flashing environment {}", env);
        let report = self.flasher.flash(&self.work_dir, &env)?;
        if !report.success() {
            for line in report.stdout.lines().chain(report.stderr.lines()) {
                error!("PLC:   {}", line);
            }
            return Err(UploadError::FlashFailed(report.status));
        }

        fs::write(build_dir.join(CHECKSUM_FILE), checksum)?;
        Ok(env)
    }

    /// Ask the device to start and block until it answers.
    ///
    /// The outcome is observable through [`query_status`](Self::query_status)
    /// and the log buffers, which are cleared at the beginning of the call.
    pub fn start_program(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        {
            let mut inner = self.inner.lock();
            for log in inner.logs.iter_mut() {
                log.clear();
            }
            inner.starting = true;
        }
        self.completion.reset();
        if let Err(e) = self.check_running() {
            self.inner.lock().starting = false;
            return Err(e);
        }

        if self.inner.lock().link_ready {
            info!("PLC: start requested");
            self.relay
                .publish(Message::Command(SessionCommand::RunPlc(true)));
        } else {
            warn!("PLC: device link down, start dropped");
            self.release_waiter();
        }
        futures_lite::future::block_on(self.completion.wait());
        self.check_running()
    }

    /// Ask a running program to stop.
    ///
    /// Returns `true` only once the device reports `Stopped`. A program
    /// that is not started, a link that is down, or a wait released by a
    /// lost link all return `false`.
    pub fn stop_program(&self) -> Result<bool> {
        let _guard = self.lifecycle.lock();
        if self.inner.lock().state != LifecycleState::Started {
            return Ok(false);
        }
        self.completion.reset();
        self.check_running()?;

        if !self.inner.lock().link_ready {
            warn!("PLC: device link down, stop dropped");
            return Ok(false);
        }
        self.relay
            .publish(Message::Command(SessionCommand::RunPlc(false)));
        futures_lite::future::block_on(self.completion.wait());
        self.check_running()?;

        // Released without the device confirming, e.g. the link dropped.
        if self.inner.lock().state != LifecycleState::Stopped {
            warn!("PLC: stop not confirmed by device");
            return Ok(false);
        }
        info!("PLC stopped");
        Ok(true)
    }

    // ── Queries ───────────────────────────────────────────────

    /// Current state and the record count of each log level.
    pub fn query_status(&self) -> (LifecycleState, [u32; LogLevel::COUNT]) {
        let inner = self.inner.lock();
        let counts = core::array::from_fn(|i| inner.logs[i].len() as u32);
        (inner.state, counts)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn fetch_log_record(&self, level: u8, index: u32) -> Result<LogRecord> {
        let lvl = LogLevel::from_index(level).ok_or(QueryError::LevelOutOfRange(level))?;
        let inner = self.inner.lock();
        inner.logs[lvl.index()]
            .get(index as usize)
            .cloned()
            .ok_or_else(|| QueryError::IndexOutOfRange { level, index }.into())
    }

    /// Whether the loaded program was flashed with `checksum`.
    pub fn match_checksum(&self, checksum: &str) -> bool {
        let inner = self.inner.lock();
        matches!(
            inner.state,
            LifecycleState::Stopped | LifecycleState::Started
        ) && inner.last_checksum.as_deref() == Some(checksum)
    }

    // ── Tracing ───────────────────────────────────────────────

    /// Replace the trace selection.
    ///
    /// Returns the new debug token, or [`TRACE_DISABLED`] for an empty
    /// selection. An invalid variable rejects the whole call and leaves
    /// the token unchanged.
    pub fn select_trace_variables(&self, variables: &[TraceVariable]) -> Result<u32> {
        let _order = self.selection.lock();
        let selection = {
            let mut inner = self.inner.lock();
            let token = match inner.debug_token.wrapping_add(1) {
                TRACE_DISABLED => 1,
                t => t,
            };
            let selection = TraceSelection::new(token, variables)?;
            inner.debug_token = token;
            inner.trace_queue.clear();
            selection
        };
        let reply = if selection.is_empty() {
            TRACE_DISABLED
        } else {
            selection.token
        };
        self.relay
            .publish(Message::Command(SessionCommand::SetTrace(selection)));
        Ok(reply)
    }

    /// Drain queued samples for `token`. A stale token yields
    /// `(Broken, [])`.
    pub fn fetch_trace_samples(&self, token: u32) -> (LifecycleState, Vec<(u32, Vec<u8>)>) {
        let mut inner = self.inner.lock();
        if token != inner.debug_token {
            return (LifecycleState::Broken, Vec::new());
        }
        let samples = inner
            .trace_queue
            .drain(..)
            .map(|s| (s.tick, s.data))
            .collect();
        (inner.state, samples)
    }

    pub fn debug_token(&self) -> u32 {
        self.inner.lock().debug_token
    }

    /// Samples discarded because the queue was full.
    pub fn dropped_samples(&self) -> u64 {
        self.inner.lock().dropped_samples
    }

    // ── Blob staging ──────────────────────────────────────────

    pub fn begin_blob(&self, seed: &[u8]) -> Result<BlobKey> {
        Ok(self.blobs.begin(seed)?)
    }

    pub fn append_chunk(&self, key: &BlobKey, data: &[u8]) -> Result<Option<BlobKey>> {
        Ok(self.blobs.append(key, data)?)
    }

    pub fn purge_all_blobs(&self) -> Result<()> {
        Ok(self.blobs.purge_all()?)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for ControlService {
    fn drop(&mut self) {
        for id in self.subscriptions.get_mut().drain(..) {
            self.relay.unsubscribe(id);
        }
    }
}

/// Environment named by the last `env.<name>` extra file.
fn environment_of(extra_files: &[(String, BlobKey)]) -> Option<String> {
    extra_files
        .iter()
        .filter(|(name, _)| name.contains(ENV_MARKER))
        .filter_map(|(name, _)| name.split('.').nth(1))
        .filter(|env| is_plain_file_name(env))
        .last()
        .map(str::to_owned)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && Path::new(name).file_name().is_some()
}
