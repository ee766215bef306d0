//! Device session behaviour over MIN: keepalive, readiness and restarts.

use std::thread;
use std::time::Duration;

use plcbridge::app::events::Message;
use plcbridge::link::protocol;
use plcbridge::link::session::SessionOutcome;
use plcbridge::plc::{IecType, LifecycleState, TraceVariable};

use crate::harness::{Harness, eventually};

#[test]
fn session_resets_device_before_ready() {
    let h = Harness::start();
    let ids = h.device.received_ids();
    assert_eq!(ids.first(), Some(&protocol::PLC_RESET));
    assert_eq!(h.service.state(), LifecycleState::Empty);
}

#[test]
fn muted_device_goes_unready_and_is_probed() {
    let h = Harness::start();
    h.device.set_responsive(false);
    let probes = h.device.count(protocol::KEEP_ALIVE);

    h.wait_link(false);
    assert!(h.device.count(protocol::KEEP_ALIVE) > probes);
}

#[test]
fn device_recovers_after_unmute() {
    let h = Harness::start();
    h.device.set_responsive(false);
    h.wait_link(false);

    h.device.set_responsive(true);
    h.wait_link(true);
}

#[test]
fn device_muted_mid_sweep_gets_no_keepalive() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();
    let token = h
        .service
        .select_trace_variables(&[TraceVariable {
            id: 1,
            ty: IecType::Bool,
            value: None,
        }])
        .unwrap();
    eventually(|| (!h.service.fetch_trace_samples(token).1.is_empty()).then_some(()));

    // The sweep now blocks on a reply that never comes.
    h.device.set_responsive(false);
    let probes = h.device.count(protocol::KEEP_ALIVE);
    h.wait_link(false);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.device.count(protocol::KEEP_ALIVE), probes);
}

#[test]
fn fault_ends_session_and_restart_recovers() {
    let mut h = Harness::start();
    h.device.inject_fault();
    h.wait_link(false);

    assert!(matches!(h.restart_session(), SessionOutcome::Faulted(_)));
    h.wait_link(true);

    h.install("aa");
    h.service.start_program().unwrap();
    assert_eq!(h.service.state(), LifecycleState::Started);
}

#[test]
fn new_session_resets_running_program() {
    let mut h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();

    h.device.inject_fault();
    h.wait_link(false);
    h.restart_session();
    h.wait_link(true);

    assert!(!h.device.is_running());
    assert_eq!(h.service.state(), LifecycleState::Empty);
    assert_eq!(h.service.stop_program(), Ok(false));
    h.install("bb");
    assert_eq!(h.service.state(), LifecycleState::Stopped);
}

#[test]
fn shutdown_ends_session_cleanly() {
    let mut h = Harness::start();
    h.relay.publish(Message::Shutdown);

    assert_eq!(h.join_session(), SessionOutcome::Shutdown);
    // Best-effort reset on the way out.
    assert_eq!(h.device.received_ids().last(), Some(&protocol::PLC_RESET));
}

#[test]
fn commands_while_unready_are_dropped() {
    let h = Harness::start();
    h.install("aa");
    h.device.set_responsive(false);
    h.wait_link(false);

    let before = h.device.count(protocol::SET_TRACE);
    h.service
        .select_trace_variables(&[TraceVariable {
            id: 3,
            ty: IecType::Bool,
            value: None,
        }])
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.device.count(protocol::SET_TRACE), before);
}
