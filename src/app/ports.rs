//! Port traits: the hexagonal boundary between the control service and
//! the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlService (domain)
//! ```
//!
//! Driven adapters (firmware flasher, event sinks) implement these traits.
//! The [`ControlService`](super::service::ControlService) receives them at
//! construction, so tests swap in mocks without touching the domain core.

use std::path::Path;

use crate::error::UploadError;
use crate::relay::{Relay, SubscriptionId};

use super::events::{Message, Topic};

// ───────────────────────────────────────────────────────────────
// Firmware flasher port (driven adapter: domain → build tooling)
// ───────────────────────────────────────────────────────────────

/// Captured result of one flasher run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashReport {
    /// Exit status; `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl FlashReport {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Writes a committed build directory to the device.
///
/// Implementations block until the flasher exits. A non-zero exit is
/// reported through [`FlashReport`], not as an error; `Err` means the
/// flasher could not be run at all.
pub trait FirmwareFlasher: Send + Sync {
    fn flash(&self, build_dir: &Path, environment: &str) -> Result<FlashReport, UploadError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// Observes every message crossing the relay. Adapters decide where they
/// go (stdout log, metrics, a remote monitor).
pub trait EventSink: Send + Sync {
    fn emit(&self, message: &Message);
}

/// Subscribe `sink` to every topic. Returns the subscription ids so the
/// caller can detach it again.
pub fn attach_sink<S>(relay: &Relay, sink: S) -> Vec<SubscriptionId>
where
    S: EventSink + 'static,
{
    let sink = std::sync::Arc::new(sink);
    Topic::ALL
        .iter()
        .map(|&topic| {
            let sink = std::sync::Arc::clone(&sink);
            relay.subscribe(topic, move |msg| sink.emit(msg))
        })
        .collect()
}
