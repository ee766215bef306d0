//! Keepalive window bookkeeping.
//!
//! Pure state machine driven once per keepalive window by the session:
//! either a frame arrived during the window or it did not. The session
//! owns the timing; this type owns the readiness rules.

/// What the session must do after a window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Readiness changed and should be published.
    pub ready_changed: bool,
    /// Send a KEEP_ALIVE probe.
    pub probe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    ready: bool,
    idle: u32,
    threshold: u32,
}

impl Keepalive {
    pub fn new(threshold: u32) -> Self {
        Self {
            ready: false,
            idle: 0,
            threshold,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Consecutive missed windows, capped at the threshold.
    pub fn idle(&self) -> u32 {
        self.idle
    }

    /// A frame arrived during the window.
    pub fn frame_seen(&mut self) -> WindowOutcome {
        let changed = !self.ready;
        self.ready = true;
        self.idle = 0;
        WindowOutcome {
            ready_changed: changed,
            probe: false,
        }
    }

    /// The window closed silently. Probes are suppressed while a trace
    /// sweep is `busy`.
    pub fn window_missed(&mut self, busy: bool) -> WindowOutcome {
        let mut changed = false;
        self.idle += 1;
        if self.idle > self.threshold {
            self.idle = self.threshold;
            changed = self.ready;
            self.ready = false;
        }
        WindowOutcome {
            ready_changed: changed,
            probe: !busy,
        }
    }
}
