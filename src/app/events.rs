//! Messages carried by the relay.
//!
//! The device session publishes what it observes on the wire; the
//! control service publishes its authoritative status and log appends.
//! Observers such as [`LogEventSink`](crate::adapters::log_sink::LogEventSink)
//! subscribe without either side knowing about them.

use crate::plc::{LifecycleState, LogLevel, TraceSample};

use super::commands::SessionCommand;

/// Subscription key; every [`Message`] belongs to exactly one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Command,
    PlcState,
    Status,
    Log,
    TraceSample,
    LinkStatus,
    Shutdown,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Command,
        Topic::PlcState,
        Topic::Status,
        Topic::Log,
        Topic::TraceSample,
        Topic::LinkStatus,
        Topic::Shutdown,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Control service → device session.
    Command(SessionCommand),

    /// Device reported a lifecycle change (or was reset).
    PlcState { state: LifecycleState, tick: u32 },

    /// Control service changed its published lifecycle state.
    Status { state: LifecycleState },

    /// A log line to append to the per-level buffers.
    Log {
        level: LogLevel,
        message: String,
        tick: u32,
    },

    /// A completed trace sweep.
    TraceSample(TraceSample),

    /// Device link readiness changed, a command was dropped, or the
    /// session ended.
    LinkStatus { ready: bool },

    /// Process-wide shutdown broadcast.
    Shutdown,
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Command(_) => Topic::Command,
            Self::PlcState { .. } => Topic::PlcState,
            Self::Status { .. } => Topic::Status,
            Self::Log { .. } => Topic::Log,
            Self::TraceSample(_) => Topic::TraceSample,
            Self::LinkStatus { .. } => Topic::LinkStatus,
            Self::Shutdown => Topic::Shutdown,
        }
    }
}
