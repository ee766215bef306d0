//! Service configuration parameters
//!
//! Loaded from an optional JSON file, then overridden by command-line
//! flags. Every field has a default so a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::link::session::SessionConfig;

/// Core service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    // --- RPC surface ---
    /// Address the RPC server binds to
    pub listen_addr: String,
    /// TCP port; 0 picks a free port
    pub listen_port: u16,

    // --- Serial link ---
    /// Serial device path (e.g. /dev/ttyACM0)
    pub serial_port: String,
    pub baud_rate: u32,
    /// Run against the in-process simulated controller instead of hardware
    pub simulate: bool,

    // --- Files ---
    /// Working directory for staged blobs and per-environment builds
    pub work_dir: PathBuf,
    /// PlatformIO project directory the flasher runs in
    pub pio_project_dir: PathBuf,
    /// Flasher executable
    pub flasher_program: String,

    // --- Timing ---
    /// Keepalive window (milliseconds)
    pub keepalive_period_ms: u64,
    /// Consecutive missed windows before the link is not ready
    pub idle_threshold: u32,
    /// Frame poll interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Delay before a faulted session is restarted (milliseconds)
    pub restart_delay_ms: u64,
    pub restart_on_fault: bool,

    // --- Tracing ---
    /// Maximum queued trace samples before the oldest is dropped
    pub trace_queue_depth: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".into(),
            listen_port: 0,

            serial_port: String::new(),
            baud_rate: 115_200,
            simulate: false,

            work_dir: PathBuf::from("plcbridge-work"),
            pio_project_dir: PathBuf::from("platformio"),
            flasher_program: "pio".into(),

            keepalive_period_ms: 1000, // 1 Hz liveness window
            idle_threshold: 10,
            poll_interval_ms: 10,
            restart_delay_ms: 2000,
            restart_on_fault: true,

            trace_queue_depth: 4096,
        }
    }
}

impl ServiceConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.kind()))?;
        serde_json::from_str(&text).map_err(|_| ConfigError::Corrupted)
    }

    /// Reject values the service cannot run with. Never clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_period_ms == 0 {
            return Err(ConfigError::ValidationFailed("keepalive_period_ms must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("poll_interval_ms must be > 0"));
        }
        if self.poll_interval_ms >= self.keepalive_period_ms {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be shorter than keepalive_period_ms",
            ));
        }
        if self.idle_threshold == 0 {
            return Err(ConfigError::ValidationFailed("idle_threshold must be > 0"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::ValidationFailed("baud_rate must be > 0"));
        }
        if !self.simulate && self.serial_port.is_empty() {
            return Err(ConfigError::ValidationFailed("serial_port is required"));
        }
        if self.trace_queue_depth == 0 {
            return Err(ConfigError::ValidationFailed("trace_queue_depth must be > 0"));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keepalive_period: Duration::from_millis(self.keepalive_period_ms),
            idle_threshold: self.idle_threshold,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}
