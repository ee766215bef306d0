//! plcbridge library.
//!
//! Exposes the service core, device link and RPC layers for the binary,
//! integration tests and fuzz targets. The simulated controller in
//! [`link::sim`] lets everything run without hardware.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod blob;
pub mod config;
pub mod error;
pub mod link;
pub mod plc;
pub mod relay;
pub mod rpc;
