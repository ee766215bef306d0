//! Remote control surface.
//!
//! Postcard-encoded request/reply envelopes in length-prefixed frames
//! over TCP.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      RPC Stack                           │
//! │                                                          │
//! │  ┌───────────┐   ┌──────────┐   ┌──────────────────────┐ │
//! │  │ RpcServer │──▶│  Codec   │──▶│  Engine (dispatcher) │ │
//! │  │ (TCP)     │   │ (framing)│   │  → ControlService    │ │
//! │  └───────────┘   └──────────┘   └──────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod engine;
pub mod messages;
pub mod server;
