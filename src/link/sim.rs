//! In-process simulated controller.
//!
//! Speaks MIN framing over a byte [`Transport`], so the whole host stack
//! (codec, session, service) runs unchanged against it. Behaviour mirrors
//! the device runtime:
//!
//! - announces itself with a TICK frame on creation;
//! - echoes KEEP_ALIVE;
//! - acknowledges PLC_START / PLC_STOP;
//! - WAIT_TRACE advances to the next cycle, then replies TICK + sample
//!   (with a cycle period set, the reply waits for the next cycle boundary);
//! - GET_TRACE replies with a TICK first if the cycle moved, then the sample.
//!
//! A [`SimHandle`] lets tests steer it (mute it, make tracing drift across
//! cycles, inject a transport fault) and inspect every frame it received.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use super::codec::{MinDecoder, encode_frame};
use super::protocol;
use super::transport::{Frame, Transport};

/// Transport-level failure raised by fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimDisconnected;

impl fmt::Display for SimDisconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulated device disconnected")
    }
}

struct SimState {
    decoder: MinDecoder,
    outbound: VecDeque<u8>,
    received: Vec<Frame>,
    responsive: bool,
    ack_start: bool,
    faulted: bool,
    running: bool,
    tick: u32,
    /// Ticks elapsed while serving each GET_TRACE (0 keeps sweeps within a cycle).
    trace_drift: u32,
    /// Real-time cycle length; `None` answers WAIT_TRACE immediately.
    cycle: Option<(Instant, Duration)>,
    /// WAIT_TRACE held until its cycle boundary.
    deferred: Option<(Instant, u16)>,
    vars: HashMap<u16, Vec<u8>>,
}

impl SimState {
    fn reply(&mut self, id: u8, payload: &[u8]) {
        let mut buf = Vec::new();
        if encode_frame(id, payload, &mut buf).is_ok() {
            self.outbound.extend(buf);
        }
    }

    fn sample(&self, id: u16) -> Vec<u8> {
        self.vars.get(&id).cloned().unwrap_or_default()
    }

    fn next_cycle(&mut self, id: u16) {
        self.tick = self.tick.wrapping_add(1);
        let tick = protocol::tick_payload(self.tick);
        self.reply(protocol::PLC_TICK, &tick);
        let sample = self.sample(id);
        self.reply(protocol::GET_TRACE, &sample);
    }

    /// Release a deferred WAIT_TRACE once its cycle boundary has passed.
    fn advance(&mut self) {
        if let Some((due, id)) = self.deferred {
            if Instant::now() >= due {
                self.deferred = None;
                if self.responsive {
                    self.next_cycle(id);
                }
            }
        }
    }

    fn handle(&mut self, frame: Frame) {
        debug!(
            "SIM: <- {} ({} bytes)",
            protocol::command_name(frame.id),
            frame.payload.len()
        );
        self.received.push(frame.clone());
        if !self.responsive {
            return;
        }

        match frame.id {
            protocol::KEEP_ALIVE => self.reply(protocol::KEEP_ALIVE, &[]),
            protocol::PLC_RESET => {
                self.running = false;
                self.deferred = None;
                self.vars.clear();
            }
            protocol::PLC_START => {
                self.running = true;
                if self.ack_start {
                    self.reply(protocol::PLC_START, &[]);
                }
            }
            protocol::PLC_STOP => {
                self.running = false;
                self.reply(protocol::PLC_STOP, &[]);
            }
            protocol::SET_TRACE => {
                if let Ok(req) = protocol::parse_set_trace(&frame.payload) {
                    self.vars.insert(req.id as u16, req.value);
                }
            }
            protocol::RESET_TRACE => self.vars.clear(),
            protocol::WAIT_TRACE => {
                if let Ok(id) = protocol::parse_trace_request(&frame.payload) {
                    match self.cycle {
                        Some((epoch, period)) => {
                            let done = epoch.elapsed().as_nanos() / period.as_nanos().max(1);
                            let cycles = u32::try_from(done + 1).unwrap_or(u32::MAX);
                            self.deferred = Some((epoch + period * cycles, id));
                        }
                        None => self.next_cycle(id),
                    }
                }
            }
            protocol::GET_TRACE => {
                if let Ok(id) = protocol::parse_trace_request(&frame.payload) {
                    if self.trace_drift > 0 {
                        self.tick = self.tick.wrapping_add(self.trace_drift);
                        let tick = protocol::tick_payload(self.tick);
                        self.reply(protocol::PLC_TICK, &tick);
                    }
                    let sample = self.sample(id);
                    self.reply(protocol::GET_TRACE, &sample);
                }
            }
            _ => {}
        }
    }
}

/// Device side of the simulated serial line.
pub struct SimulatedPlc {
    state: Arc<Mutex<SimState>>,
}

/// Test-side control over a [`SimulatedPlc`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlc {
    pub fn new() -> (Self, SimHandle) {
        let mut state = SimState {
            decoder: MinDecoder::new(),
            outbound: VecDeque::new(),
            received: Vec::new(),
            responsive: true,
            ack_start: true,
            faulted: false,
            running: false,
            tick: 0,
            trace_drift: 0,
            cycle: None,
            deferred: None,
            vars: HashMap::new(),
        };
        state.reply(protocol::PLC_TICK, &protocol::tick_payload(0));

        let state = Arc::new(Mutex::new(state));
        let handle = SimHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }
}

impl Transport for SimulatedPlc {
    type Error = SimDisconnected;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut s = self.state.lock();
        if s.faulted {
            return Err(SimDisconnected);
        }
        s.advance();
        let n = buf.len().min(s.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(s.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut s = self.state.lock();
        if s.faulted {
            return Err(SimDisconnected);
        }
        let mut frames = Vec::new();
        s.decoder.feed(data, &mut frames);
        for frame in frames {
            s.handle(frame);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.state.lock().faulted {
            return Err(SimDisconnected);
        }
        Ok(())
    }

    fn available(&mut self) -> Result<usize, Self::Error> {
        let mut s = self.state.lock();
        if s.faulted {
            return Err(SimDisconnected);
        }
        s.advance();
        Ok(s.outbound.len())
    }
}

impl SimHandle {
    /// A muted device still records frames but never answers.
    pub fn set_responsive(&self, responsive: bool) {
        self.state.lock().responsive = responsive;
    }

    pub fn set_ack_start(&self, ack: bool) {
        self.state.lock().ack_start = ack;
    }

    /// Ticks that pass while each GET_TRACE is served.
    pub fn set_trace_drift(&self, ticks: u32) {
        self.state.lock().trace_drift = ticks;
    }

    /// Run the program in real time: WAIT_TRACE is answered at the next
    /// multiple of `period` rather than at once.
    pub fn set_cycle_period(&self, period: Duration) {
        self.state.lock().cycle = Some((Instant::now(), period));
    }

    /// Make every subsequent transport call fail.
    pub fn inject_fault(&self) {
        self.state.lock().faulted = true;
    }

    /// Push an arbitrary frame towards the host.
    pub fn push_frame(&self, id: u8, payload: &[u8]) {
        self.state.lock().reply(id, payload);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn tick(&self) -> u32 {
        self.state.lock().tick
    }

    pub fn received(&self) -> Vec<Frame> {
        self.state.lock().received.clone()
    }

    pub fn received_ids(&self) -> Vec<u8> {
        self.state.lock().received.iter().map(|f| f.id).collect()
    }

    pub fn count(&self, id: u8) -> usize {
        self.state.lock().received.iter().filter(|f| f.id == id).count()
    }
}
