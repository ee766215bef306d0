//! Device session: link supervision and protocol sequencing.
//!
//! Runs on a dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` timers. Four futures share one
//! [`FrameLink`] and the session state:
//!
//! 1. **Poller**: drains received frames every poll interval
//! 2. **Keepalive**: resets the device on first contact, then judges
//!    liveness once per keepalive window
//! 3. **Trace driver**: runs WAIT_TRACE / GET_TRACE sweeps while the
//!    program is started and a selection exists
//! 4. **Commands**: applies [`SessionCommand`]s arriving over the relay
//!
//! ```text
//!  ┌───────────────────────────────────────────────────────────┐
//!  │  Session thread                                           │
//!  │  futures_lite::block_on(LocalExecutor::run)               │
//!  │                                                           │
//!  │  ┌────────┐  ┌───────────┐  ┌─────────┐  ┌────────────┐   │
//!  │  │ Poller │  │ Keepalive │  │  Trace  │  │  Commands  │   │
//!  │  │ 10ms ⏱ │  │  window ⏱ │  │ sweeps  │  │ ◀─ channel │   │
//!  │  └───┬────┘  └─────▲─────┘  └────▲────┘  └────────────┘   │
//!  │      └── alive ────┘             │                        │
//!  │      └── trace_ready ────────────┘                        │
//!  └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Only one request awaits a reply at a time: the trace driver is the
//! only task that waits for responses, and every send goes through the
//! single session-owned link. Any transport fault aborts every task; the
//! owning process decides whether to start a fresh session.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, error, info, warn};

use crate::app::commands::SessionCommand;
use crate::app::events::{Message, Topic};
use crate::error::LinkError;
use crate::plc::{LifecycleState, LogLevel, TraceSample};
use crate::relay::Relay;

use super::keepalive::Keepalive;
use super::protocol::{self, command_name};
use super::trace::{OverflowTracker, TraceSession};
use super::transport::{Frame, FrameLink};

/// Commands buffered between the relay and the session executor.
const COMMAND_DEPTH: usize = 16;

type CommandChannel = Channel<CriticalSectionRawMutex, SessionCommand, COMMAND_DEPTH>;

/// Session timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub keepalive_period: Duration,
    pub idle_threshold: u32,
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_period: Duration::from_secs(1),
            idle_threshold: 10,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Shutdown was requested.
    Shutdown,
    /// The link failed; the session is finished.
    Faulted(LinkError),
}

enum Wait {
    Fired,
    TimedOut,
    Stopped,
}

// ── Shared session state ─────────────────────────────────────

struct Shared<L> {
    link: RefCell<L>,
    relay: Relay,
    config: SessionConfig,
    run: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    fault: Cell<Option<LinkError>>,
    ready: Cell<bool>,
    busy: Cell<bool>,
    plc_state: Cell<LifecycleState>,
    tick: Cell<u32>,
    trace: RefCell<TraceSession>,
    alive: Signal<NoopRawMutex, ()>,
    trace_ready: Signal<NoopRawMutex, ()>,
}

impl<L: FrameLink> Shared<L> {
    fn stopped(&self) -> bool {
        self.fault.get().is_some()
            || !self.run.load(Ordering::Acquire)
            || self.stop.load(Ordering::Acquire)
    }

    fn abort(&self, e: LinkError) {
        if self.fault.get().is_none() {
            error!("LINK: session aborted: {}", e);
            self.fault.set(Some(e));
        }
    }

    /// Send one frame; a failure aborts the session.
    fn send(&self, id: u8, payload: &[u8]) -> bool {
        if self.fault.get().is_some() {
            return false;
        }
        let result = self.link.borrow_mut().send_frame(id, payload);
        match result {
            Ok(()) => {
                debug!("LINK: -> {} ({} bytes)", command_name(id), payload.len());
                true
            }
            Err(e) => {
                self.abort(e);
                false
            }
        }
    }

    fn set_ready(&self, ready: bool) {
        if self.ready.replace(ready) != ready {
            info!("LINK: device {}", if ready { "ready" } else { "not responding" });
            self.relay.publish(Message::LinkStatus { ready });
        }
    }

    fn publish_state(&self, state: LifecycleState) {
        self.plc_state.set(state);
        self.relay.publish(Message::PlcState {
            state,
            tick: self.tick.get(),
        });
    }

    /// Wait for `signal`, checking for shutdown every poll interval.
    async fn wait(&self, signal: &Signal<NoopRawMutex, ()>, timeout: Option<Duration>) -> Wait {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.stopped() {
                return Wait::Stopped;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wait::TimedOut;
                    }
                    (deadline - now).min(self.config.poll_interval)
                }
                None => self.config.poll_interval,
            };
            let fired = future::or(
                async {
                    signal.wait().await;
                    true
                },
                async {
                    async_io_mini::Timer::after(slice).await;
                    false
                },
            )
            .await;
            if fired {
                return Wait::Fired;
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame.id {
            protocol::PLC_START => self.publish_state(LifecycleState::Started),
            protocol::PLC_STOP => self.publish_state(LifecycleState::Stopped),
            protocol::PLC_TICK => match protocol::parse_tick(&frame.payload) {
                Ok(tick) => self.tick.set(tick),
                Err(e) => self.abort(e),
            },
            protocol::GET_TRACE => {
                if !self.trace.borrow_mut().store(&frame.payload) {
                    debug!("LINK: GET_TRACE reply not stored");
                }
                // The reply arrived either way; the driver checks the token.
                self.trace_ready.signal(());
            }
            protocol::KEEP_ALIVE => {}
            other => debug!("LINK: ignoring unexpected {}", command_name(other)),
        }
    }

    fn tracing_active(&self) -> bool {
        !self.stopped()
            && self.plc_state.get() == LifecycleState::Started
            && !self.trace.borrow().is_empty()
    }

    /// Request one variable and block until its reply arrives.
    ///
    /// WAIT_TRACE is only answered at the device's next cycle, which may
    /// be far longer than a keepalive window, so there is no deadline.
    async fn request_sample(&self, cmd: u8, id: u16) -> bool {
        self.trace_ready.reset();
        self.trace.borrow_mut().await_sample(id);
        if !self.send(cmd, &protocol::trace_request_payload(id)) {
            return false;
        }
        matches!(self.wait(&self.trace_ready, None).await, Wait::Fired)
    }

    /// One full sweep over the selection. Returns `false` if the session
    /// stopped mid-sweep.
    async fn sweep(&self, overflow: &mut OverflowTracker) -> bool {
        let (token, ids) = {
            let t = self.trace.borrow();
            (t.token(), t.ids().to_vec())
        };
        if ids.is_empty() {
            return true;
        }

        let mut start_tick = 0;
        for (i, &id) in ids.iter().enumerate() {
            let cmd = if i == 0 {
                protocol::WAIT_TRACE
            } else {
                protocol::GET_TRACE
            };
            if !self.request_sample(cmd, id).await {
                return false;
            }
            if i == 0 {
                start_tick = self.tick.get();
            }
        }
        let end_tick = self.tick.get();

        let data = {
            let t = self.trace.borrow();
            if t.token() != token {
                debug!("TRACE: discarding sweep of superseded selection {}", token);
                return true;
            }
            t.assemble()
        };

        if overflow.record(start_tick != end_tick) {
            let n = end_tick.wrapping_sub(start_tick);
            warn!(
                "TRACE: debug trace period too slow by {} {}; reduce the number of \
                 trace variables or increase the PLC cycle time",
                n,
                if n < 2 { "tick" } else { "ticks" }
            );
            self.relay.publish(Message::Log {
                level: LogLevel::Warning,
                message: "Debug Trace Period too slow".into(),
                tick: 0,
            });
        }

        self.relay.publish(Message::TraceSample(TraceSample {
            token,
            tick: start_tick,
            data,
        }));
        true
    }

    fn execute(&self, cmd: SessionCommand) {
        if !self.ready.get() {
            warn!("LINK: device not ready, dropping {:?}", cmd);
            // Lets a caller blocked on this command observe the drop.
            self.relay.publish(Message::LinkStatus { ready: false });
            return;
        }

        match cmd {
            SessionCommand::RunPlc(true) => {
                info!("LINK: starting PLC");
                let _ = self.send(protocol::PLC_INIT, &[]) && self.send(protocol::PLC_START, &[]);
            }
            SessionCommand::RunPlc(false) => {
                info!("LINK: stopping PLC");
                self.send(protocol::PLC_STOP, &[]);
            }
            SessionCommand::SetTrace(selection) => {
                *self.trace.borrow_mut() = TraceSession::new(&selection);
                if selection.is_empty() {
                    info!("TRACE: selection cleared");
                    self.send(protocol::RESET_TRACE, &[]);
                    return;
                }
                info!(
                    "TRACE: {} variables selected (token {})",
                    selection.entries.len(),
                    selection.token
                );
                for entry in &selection.entries {
                    if !self.send(protocol::SET_TRACE, &protocol::set_trace_payload(entry)) {
                        break;
                    }
                }
            }
        }
    }
}

// ── Session tasks ────────────────────────────────────────────

async fn poll_loop<L: FrameLink>(s: Rc<Shared<L>>) {
    while !s.stopped() {
        let polled = s.link.borrow_mut().poll();
        match polled {
            Ok(frames) => {
                if !frames.is_empty() {
                    s.alive.signal(());
                }
                for frame in frames {
                    s.dispatch(frame);
                }
            }
            Err(e) => {
                s.abort(e);
                break;
            }
        }
        async_io_mini::Timer::after(s.config.poll_interval).await;
    }
}

async fn keepalive_loop<L: FrameLink>(s: Rc<Shared<L>>) {
    if let Wait::Stopped = s.wait(&s.alive, None).await {
        return;
    }
    info!("LINK: device contact, resetting PLC");
    if !s.send(protocol::PLC_RESET, &[]) {
        return;
    }
    s.publish_state(LifecycleState::Empty);

    let mut keepalive = Keepalive::new(s.config.idle_threshold);
    loop {
        let outcome = match s.wait(&s.alive, Some(s.config.keepalive_period)).await {
            Wait::Stopped => break,
            Wait::Fired => keepalive.frame_seen(),
            Wait::TimedOut => keepalive.window_missed(s.busy.get()),
        };
        if outcome.ready_changed {
            s.set_ready(keepalive.is_ready());
        }
        if outcome.probe && !s.send(protocol::KEEP_ALIVE, &[]) {
            break;
        }
        async_io_mini::Timer::after(s.config.poll_interval).await;
    }
}

async fn trace_loop<L: FrameLink>(s: Rc<Shared<L>>) {
    let mut overflow = OverflowTracker::new();
    while !s.stopped() {
        s.busy.set(false);
        overflow.reset();
        while s.tracing_active() {
            s.busy.set(true);
            if !s.sweep(&mut overflow).await {
                break;
            }
        }
        async_io_mini::Timer::after(s.config.poll_interval).await;
    }
    s.busy.set(false);
}

async fn command_loop<L: FrameLink>(s: Rc<Shared<L>>, commands: Arc<CommandChannel>) {
    while !s.stopped() {
        let next = future::or(async { Some(commands.receive().await) }, async {
            async_io_mini::Timer::after(s.config.poll_interval).await;
            None
        })
        .await;
        if let Some(cmd) = next {
            s.execute(cmd);
        }
    }
}

// ── Public API ───────────────────────────────────────────────

/// One supervised connection to the device.
pub struct DeviceSession {
    relay: Relay,
    config: SessionConfig,
    run: Arc<AtomicBool>,
}

impl DeviceSession {
    /// `run` is the process-wide run flag; clearing it ends the session.
    pub fn new(relay: Relay, config: SessionConfig, run: Arc<AtomicBool>) -> Self {
        Self { relay, config, run }
    }

    /// Drive the session on the current thread until shutdown or a fault.
    pub fn run<L: FrameLink + 'static>(&self, link: L) -> SessionOutcome {
        let commands: Arc<CommandChannel> = Arc::new(Channel::new());
        let stop = Arc::new(AtomicBool::new(false));

        let tx = Arc::clone(&commands);
        let command_sub = self.relay.subscribe(Topic::Command, move |msg| {
            if let Message::Command(cmd) = msg {
                if tx.try_send(cmd.clone()).is_err() {
                    warn!("LINK: command queue full, dropping {:?}", cmd);
                }
            }
        });
        let flag = Arc::clone(&stop);
        let shutdown_sub = self.relay.subscribe(Topic::Shutdown, move |_| {
            flag.store(true, Ordering::Release);
        });

        let shared = Rc::new(Shared {
            link: RefCell::new(link),
            relay: self.relay.clone(),
            config: self.config,
            run: Arc::clone(&self.run),
            stop,
            fault: Cell::new(None),
            ready: Cell::new(false),
            busy: Cell::new(false),
            plc_state: Cell::new(LifecycleState::Empty),
            tick: Cell::new(0),
            trace: RefCell::new(TraceSession::default()),
            alive: Signal::new(),
            trace_ready: Signal::new(),
        });

        let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
        let tasks = [
            executor.spawn(poll_loop(Rc::clone(&shared))),
            executor.spawn(keepalive_loop(Rc::clone(&shared))),
            executor.spawn(trace_loop(Rc::clone(&shared))),
            executor.spawn(command_loop(Rc::clone(&shared), Arc::clone(&commands))),
        ];

        info!(
            "LINK: session started (keepalive {:?}, idle threshold {})",
            self.config.keepalive_period, self.config.idle_threshold
        );

        future::block_on(executor.run(async {
            for task in tasks {
                task.await;
            }
        }));

        self.relay.unsubscribe(command_sub);
        self.relay.unsubscribe(shutdown_sub);

        // Best effort; fails silently if the link is already gone.
        let _ = shared.link.borrow_mut().send_frame(protocol::PLC_RESET, &[]);
        shared.link.borrow_mut().close();

        // Always published so a caller waiting on a lost command returns.
        shared.ready.set(false);
        self.relay.publish(Message::LinkStatus { ready: false });

        match shared.fault.get() {
            Some(e) => {
                warn!("LINK: session ended: {}", e);
                SessionOutcome::Faulted(e)
            }
            None => {
                info!("LINK: session ended");
                SessionOutcome::Shutdown
            }
        }
    }

    /// Run the session on its own thread.
    pub fn spawn<L: FrameLink + Send + 'static>(
        self,
        link: L,
    ) -> std::io::Result<JoinHandle<SessionOutcome>> {
        thread::Builder::new()
            .name("plc-session".into())
            .spawn(move || self.run(link))
    }
}
