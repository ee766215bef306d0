//! Application core: lifecycle rules, log buffers and trace bookkeeping.
//!
//! This layer never touches the serial line or the network. The device
//! session reaches it through relay [`events`]; build tooling and event
//! observers plug in through the [`ports`] traits, keeping the
//! [`service`] testable with mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
