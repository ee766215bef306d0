//! Device link: framing, transports and the supervised device session.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Link Stack                        │
//! │                                                      │
//! │  ┌───────────┐   ┌──────────┐   ┌─────────────────┐  │
//! │  │ Transport │──▶│ MinLink  │──▶│  DeviceSession  │  │
//! │  │ serial/sim│   │ (codec)  │   │  → Relay        │  │
//! │  └───────────┘   └──────────┘   └─────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod keepalive;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod sim;
pub mod trace;
pub mod transport;
