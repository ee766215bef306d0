//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements      | Connects to                 |
//! |------------|-----------------|-----------------------------|
//! | `flasher`  | FirmwareFlasher | PlatformIO `pio run`        |
//! | `log_sink` | EventSink       | Process log (`env_logger`)  |

pub mod flasher;
pub mod log_sink;
