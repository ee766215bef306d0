//! plcbridge: supervisory service for a PLC runtime on a serial link.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  RpcServer (TCP)   LogEventSink   PioFlasher   SerialTransport │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌──────────────────────┐  Relay  ┌────────────────────────┐   │
//! │  │ ControlService       │◀───────▶│ DeviceSession          │   │
//! │  │ state · logs · blobs │         │ keepalive · trace · ✉  │   │
//! │  └──────────────────────┘         └────────────────────────┘   │
//! │                                                                │
//! │  Supervisor: restarts a faulted session after a delay          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{error, info, warn};

use plcbridge::adapters::flasher::PioFlasher;
use plcbridge::adapters::log_sink::LogEventSink;
use plcbridge::app::events::Message;
use plcbridge::app::ports::attach_sink;
use plcbridge::app::service::ControlService;
use plcbridge::config::ServiceConfig;
use plcbridge::link::codec::MinLink;
use plcbridge::link::serial::SerialTransport;
use plcbridge::link::session::{DeviceSession, SessionOutcome};
use plcbridge::link::sim::SimulatedPlc;
use plcbridge::relay::Relay;
use plcbridge::rpc::engine::RpcEngine;
use plcbridge::rpc::server::RpcServer;

// ── Command line ──────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "plcbridge", version)]
#[command(about = "Serial-link supervisor for a PLC runtime", long_about = None)]
struct Cli {
    /// RPC port (0 picks a free port)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Address the RPC server binds to
    #[arg(short = 'i', long = "interface")]
    interface: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Keepalive window in milliseconds
    #[arg(long = "keepalive-ms")]
    keepalive_ms: Option<u64>,

    /// Missed windows before the device is considered not ready
    #[arg(long = "idle-windows")]
    idle_windows: Option<u32>,

    /// PlatformIO project directory
    #[arg(long = "pio-dir")]
    pio_dir: Option<PathBuf>,

    /// Run against the built-in simulated controller
    #[arg(long)]
    simulate: bool,

    /// Exit instead of restarting a faulted device session
    #[arg(long = "no-restart")]
    no_restart: bool,

    /// Working directory for staged blobs and builds
    work_dir: PathBuf,

    /// Serial device (e.g. /dev/ttyACM0)
    serial: Option<String>,
}

impl Cli {
    /// Command-line flags win over the configuration file.
    fn apply(self, config: &mut ServiceConfig) {
        config.work_dir = self.work_dir;
        if let Some(serial) = self.serial {
            config.serial_port = serial;
        }
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(addr) = self.interface {
            config.listen_addr = addr;
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(ms) = self.keepalive_ms {
            config.keepalive_period_ms = ms;
        }
        if let Some(windows) = self.idle_windows {
            config.idle_threshold = windows;
        }
        if let Some(dir) = self.pio_dir {
            config.pio_project_dir = dir;
        }
        config.simulate |= self.simulate;
        if self.no_restart {
            config.restart_on_fault = false;
        }
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("plcbridge v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Configuration ──────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .map_err(plcbridge::error::Error::from)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    cli.apply(&mut config);
    config
        .validate()
        .map_err(plcbridge::error::Error::from)
        .context("invalid configuration")?;

    fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("creating {}", config.work_dir.display()))?;

    // ── 2. Core wiring ────────────────────────────────────────
    let run = Arc::new(AtomicBool::new(true));
    let relay = Relay::new();
    attach_sink(&relay, LogEventSink::new());

    let flasher = PioFlasher::new(
        config.flasher_program.clone(),
        config.pio_project_dir.clone(),
    );
    let service = ControlService::new(&config, relay.clone(), Box::new(flasher))?;

    // ── 3. RPC surface ────────────────────────────────────────
    let engine = Arc::new(RpcEngine::new(Arc::clone(&service)));
    let server = RpcServer::bind(
        &config.listen_addr,
        config.listen_port,
        engine,
        Arc::clone(&run),
    )
    .context("binding RPC server")?;
    let addr = server.local_addr()?;
    println!("Port number : {}", addr.port());
    println!("Working dir : {}", config.work_dir.display());
    let server_thread = server.spawn().context("spawning RPC server")?;

    {
        let run = Arc::clone(&run);
        let relay = relay.clone();
        ctrlc::set_handler(move || {
            info!("Interrupt received, shutting down");
            run.store(false, Ordering::Release);
            relay.publish(Message::Shutdown);
        })
        .context("installing interrupt handler")?;
    }

    // ── 4. Device supervision ─────────────────────────────────
    supervise(&config, &relay, &run);

    run.store(false, Ordering::Release);
    relay.publish(Message::Shutdown);
    if server_thread.join().is_err() {
        error!("RPC server thread panicked");
    }
    info!("plcbridge stopped");
    Ok(())
}

/// Run device sessions until shutdown, restarting after faults.
fn supervise(config: &ServiceConfig, relay: &Relay, run: &Arc<AtomicBool>) {
    while run.load(Ordering::Acquire) {
        match run_session(config, relay, run) {
            Ok(SessionOutcome::Shutdown) => break,
            Ok(SessionOutcome::Faulted(e)) => warn!("LINK: session faulted: {}", e),
            Err(e) => error!("LINK: {:#}", e),
        }
        if !config.restart_on_fault {
            info!("LINK: restarts disabled, shutting down");
            break;
        }

        let deadline = Instant::now() + config.restart_delay();
        while run.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        if run.load(Ordering::Acquire) {
            info!("LINK: restarting device session");
        }
    }
}

fn run_session(
    config: &ServiceConfig,
    relay: &Relay,
    run: &Arc<AtomicBool>,
) -> Result<SessionOutcome> {
    let session = DeviceSession::new(relay.clone(), config.session_config(), Arc::clone(run));
    let handle = if config.simulate {
        let (sim, _control) = SimulatedPlc::new();
        info!("LINK: using simulated controller");
        session.spawn(MinLink::new(sim))?
    } else {
        let port = SerialTransport::open(&config.serial_port, config.baud_rate)
            .with_context(|| format!("opening {}", config.serial_port))?;
        session.spawn(MinLink::new(port))?
    };
    handle
        .join()
        .map_err(|_| anyhow!("device session thread panicked"))
}
