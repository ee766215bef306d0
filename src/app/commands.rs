//! Commands posted by the control service for the device session.
//!
//! These travel over the [`Relay`](crate::relay::Relay) on the
//! [`Topic::Command`](super::events::Topic::Command) topic; the session
//! consumes them on its own executor.

use crate::plc::TraceSelection;

/// Work the device session performs on behalf of a remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// `true` sends INIT then START; `false` sends STOP.
    RunPlc(bool),

    /// Replace the trace selection. An empty selection disables tracing.
    SetTrace(TraceSelection),
}
