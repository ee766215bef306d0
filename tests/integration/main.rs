//! Integration test driver for `tests/integration/` submodules.
//!
//! Every test wires a real [`ControlService`](plcbridge::app::service::ControlService)
//! to a device session running MIN over the simulated controller, so the
//! whole stack runs on the host with no serial hardware.

mod harness;
mod rpc_tests;
mod service_tests;
mod session_tests;
