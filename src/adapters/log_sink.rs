//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every relay message to the process
//! logger (`env_logger` on stderr). A metrics or remote-monitor adapter
//! would implement the same trait.

use log::{debug, info, warn};

use crate::app::commands::SessionCommand;
use crate::app::events::Message;
use crate::app::ports::EventSink;
use crate::plc::LogLevel;

/// Adapter that logs every [`Message`] to the console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, message: &Message) {
        match message {
            Message::Status { state } => {
                info!("STATE | {}", state);
            }
            Message::PlcState { state, tick } => {
                debug!("STATE | device reports {} @ tick {}", state, tick);
            }
            Message::LinkStatus { ready } => {
                info!("LINK  | {}", if *ready { "ready" } else { "not ready" });
            }
            Message::Log {
                level,
                message,
                tick,
            } => match level {
                LogLevel::Critical | LogLevel::Warning => {
                    warn!("LOG   | {:?} @ {} | {}", level, tick, message);
                }
                LogLevel::Info | LogLevel::Debug => {
                    info!("LOG   | {:?} @ {} | {}", level, tick, message);
                }
            },
            Message::TraceSample(sample) => {
                debug!(
                    "TRACE | token={} tick={} bytes={}",
                    sample.token,
                    sample.tick,
                    sample.data.len()
                );
            }
            Message::Command(SessionCommand::RunPlc(run)) => {
                info!("CMD   | {}", if *run { "start" } else { "stop" });
            }
            Message::Command(SessionCommand::SetTrace(selection)) => {
                info!(
                    "CMD   | trace {} variable(s), token {}",
                    selection.entries.len(),
                    selection.token
                );
            }
            Message::Shutdown => {
                info!("SHUTDOWN");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::Topic;
    use crate::app::ports::attach_sink;
    use crate::relay::Relay;

    #[test]
    fn attaches_to_every_topic() {
        let relay = Relay::new();
        let ids = attach_sink(&relay, LogEventSink::new());
        assert_eq!(ids.len(), Topic::ALL.len());
        for topic in Topic::ALL {
            assert_eq!(relay.subscriber_count(topic), 1);
        }
        assert_eq!(relay.publish(Message::Shutdown), 1);
    }
}
