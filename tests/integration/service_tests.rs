//! Control service lifecycle against the simulated controller.

use std::fs;
use std::thread;
use std::time::Duration;

use plcbridge::error::Error;
use plcbridge::link::protocol;
use plcbridge::plc::{IecType, IecValue, LifecycleState, TraceVariable};

use crate::harness::{Harness, eventually};

fn var(id: u32, ty: IecType, value: Option<IecValue>) -> TraceVariable {
    TraceVariable { id, ty, value }
}

// ── Upload ────────────────────────────────────────────────────

#[test]
fn upload_commits_build_directory_and_flashes() {
    let h = Harness::start();
    let firmware = h.stage(b"fw", b"firmware bytes");
    let linker = h.stage(b"ld", b"MEMORY {}");
    let env = h.stage(b"env", b"");
    let files = vec![
        ("linker.ld".to_string(), linker),
        ("env.bluepill".to_string(), env),
    ];

    assert!(h.service.upload_program("0123abcd", &firmware, &files));
    assert_eq!(h.service.state(), LifecycleState::Stopped);
    assert!(h.service.match_checksum("0123abcd"));
    assert!(!h.service.match_checksum("ffff"));

    let dir = h.build_dir("bluepill");
    assert_eq!(fs::read(dir.join("firmware.bin")).unwrap(), b"firmware bytes");
    assert_eq!(fs::read(dir.join("linker.ld")).unwrap(), b"MEMORY {}");
    assert_eq!(
        fs::read_to_string(dir.join("lastbuildPLC.md5")).unwrap(),
        "0123abcd"
    );

    let calls = h.flasher.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].environment, "bluepill");
    assert_eq!(calls[0].build_root, h.tmp.path());
    assert_eq!(calls[0].files, vec!["firmware.bin", "linker.ld"]);
}

#[test]
fn upload_recreates_existing_build_directory() {
    let h = Harness::start();
    let stale = h.build_dir("bluepill").join("stale.o");
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, b"old").unwrap();

    h.install("aa");
    assert!(!stale.exists());
}

#[test]
fn failed_flash_breaks_until_next_good_upload() {
    let h = Harness::start();
    h.flasher.fail_with(1);
    let firmware = h.stage(b"fw", b"image");
    let env = h.stage(b"env", b"");
    let files = vec![("env.bluepill".to_string(), env)];

    assert!(!h.service.upload_program("aa", &firmware, &files));
    assert_eq!(h.service.state(), LifecycleState::Broken);
    assert!(!h.service.match_checksum("aa"));
    assert!(!h.build_dir("bluepill").join("lastbuildPLC.md5").exists());

    h.flasher.succeed();
    h.install("bb");
    assert_eq!(h.service.state(), LifecycleState::Stopped);
}

#[test]
fn accepted_upload_always_ends_stopped_or_broken() {
    let h = Harness::start();
    let firmware = h.stage(b"fw", b"image");
    let env = h.stage(b"env", b"");

    // Missing environment.
    assert!(!h.service.upload_program("aa", &firmware, &[]));
    assert_eq!(h.service.state(), LifecycleState::Broken);

    // Path-like extra file name.
    let extra = h.stage(b"x", b"x");
    let files = vec![
        ("env.bluepill".to_string(), env),
        ("../escape".to_string(), extra),
    ];
    assert!(!h.service.upload_program("aa", &firmware, &files));
    assert_eq!(h.service.state(), LifecycleState::Broken);

    // Unknown firmware key.
    let env = h.stage(b"env2", b"");
    let files = vec![("env.bluepill".to_string(), env)];
    let bogus = plcbridge::blob::BlobKey([9; 32]);
    assert!(!h.service.upload_program("aa", &bogus, &files));
    assert_eq!(h.service.state(), LifecycleState::Broken);
    assert!(h.flasher.calls.lock().is_empty());
}

#[test]
fn upload_rejected_while_running() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();
    assert_eq!(h.service.state(), LifecycleState::Started);

    let firmware = h.stage(b"fw", b"image");
    assert!(!h.service.upload_program("bb", &firmware, &[]));
    assert_eq!(h.service.state(), LifecycleState::Started);
    assert!(h.service.match_checksum("aa"));
}

// ── Start / stop ──────────────────────────────────────────────

#[test]
fn start_with_acknowledging_device() {
    let h = Harness::start();
    h.install("aa");

    h.service.start_program().unwrap();

    let (state, counts) = h.service.query_status();
    assert_eq!(state, LifecycleState::Started);
    assert_eq!(counts, [0, 0, 0, 1]);
    assert_eq!(h.service.fetch_log_record(3, 0).unwrap().message, "PLC started");
    assert!(h.device.is_running());

    let ids = h.device.received_ids();
    let init = ids.iter().position(|&id| id == protocol::PLC_INIT).unwrap();
    let start = ids.iter().position(|&id| id == protocol::PLC_START).unwrap();
    assert!(init < start, "INIT must precede START");
}

#[test]
fn start_clears_previous_logs() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();
    assert_eq!(h.service.stop_program(), Ok(true));
    assert_eq!(h.service.query_status().1, [0, 0, 0, 2]);

    h.service.start_program().unwrap();
    assert_eq!(h.service.query_status().1, [0, 0, 0, 1]);
}

#[test]
fn stop_running_program() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();

    assert_eq!(h.service.stop_program(), Ok(true));
    assert_eq!(h.service.state(), LifecycleState::Stopped);
    assert_eq!(h.service.fetch_log_record(3, 1).unwrap().message, "PLC stopped");
    assert!(!h.device.is_running());
}

#[test]
fn stop_when_not_started_changes_nothing() {
    let h = Harness::start();
    h.install("aa");
    let before = h.service.query_status();
    let frames = h.device.count(protocol::PLC_STOP);

    assert_eq!(h.service.stop_program(), Ok(false));
    assert_eq!(h.service.query_status(), before);
    assert_eq!(h.device.count(protocol::PLC_STOP), frames);
}

#[test]
fn stop_dropped_while_link_down_fails() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();
    h.device.set_responsive(false);
    h.wait_link(false);
    let before = h.service.query_status();

    assert_eq!(h.service.stop_program(), Ok(false));
    assert_eq!(h.service.query_status(), before);
    assert_eq!(h.device.count(protocol::PLC_STOP), 0);
    assert!(h.device.is_running());
}

#[test]
fn start_dropped_while_link_down_reports_problem() {
    let h = Harness::start();
    h.install("aa");
    h.device.set_responsive(false);
    h.wait_link(false);

    h.service.start_program().unwrap();

    let (state, counts) = h.service.query_status();
    assert_eq!(state, LifecycleState::Stopped);
    assert_eq!(counts, [1, 0, 0, 0]);
    assert_eq!(
        h.service.fetch_log_record(0, 0).unwrap().message,
        "Problem starting PLC"
    );
    assert_eq!(h.device.count(protocol::PLC_START), 0);
}

#[test]
fn session_fault_releases_blocked_start() {
    let mut h = Harness::start();
    h.install("aa");
    h.device.set_ack_start(false);

    thread::scope(|s| {
        let waiter = s.spawn(|| h.service.start_program());
        eventually(|| (h.device.count(protocol::PLC_START) > 0).then_some(()));
        h.device.inject_fault();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    });

    assert_eq!(h.service.state(), LifecycleState::Stopped);
    assert_eq!(h.service.query_status().1[0], 1);
    assert!(matches!(
        h.join_session(),
        plcbridge::link::session::SessionOutcome::Faulted(_)
    ));
}

#[test]
fn shutdown_releases_blocked_start() {
    let h = Harness::start();
    h.install("aa");
    h.device.set_ack_start(false);

    thread::scope(|s| {
        let waiter = s.spawn(|| h.service.start_program());
        eventually(|| (h.device.count(protocol::PLC_START) > 0).then_some(()));
        h.relay.publish(plcbridge::app::events::Message::Shutdown);
        assert_eq!(waiter.join().unwrap(), Err(Error::ShuttingDown));
    });
    assert_eq!(h.service.start_program(), Err(Error::ShuttingDown));
}

// ── Tracing ───────────────────────────────────────────────────

#[test]
fn sweep_concatenates_samples_in_selection_order() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();

    let token = h
        .service
        .select_trace_variables(&[
            var(1, IecType::Bool, Some(IecValue::Bool(true))),
            var(2, IecType::Int, Some(IecValue::Int(0x1234))),
            var(3, IecType::Dint, Some(IecValue::Int(7))),
        ])
        .unwrap();
    assert_ne!(token, 0);

    let samples = eventually(|| {
        let (state, samples) = h.service.fetch_trace_samples(token);
        assert_eq!(state, LifecycleState::Started);
        (!samples.is_empty()).then_some(samples)
    });
    for (_, data) in &samples {
        assert_eq!(data, &[1, 0x34, 0x12, 7, 0, 0, 0]);
    }
    // Ticks advance one cycle per sweep.
    for pair in samples.windows(2) {
        assert_eq!(pair[1].0, pair[0].0 + 1);
    }
    // Steady ticks never warn.
    assert_eq!(h.service.query_status().1[1], 0);
}

#[test]
fn slow_sweeps_warn_once_per_streak() {
    let h = Harness::start();
    h.install("aa");
    h.device.set_trace_drift(1);
    h.service.start_program().unwrap();

    let token = h
        .service
        .select_trace_variables(&[
            var(1, IecType::Bool, None),
            var(2, IecType::Bool, None),
        ])
        .unwrap();

    let mut received = 0;
    eventually(|| {
        received += h.service.fetch_trace_samples(token).1.len();
        (received >= 6).then_some(())
    });

    let counts = h.service.query_status().1;
    assert_eq!(counts[1], 1);
    let record = h.service.fetch_log_record(1, 0).unwrap();
    assert_eq!(record.message, "Debug Trace Period too slow");
    assert_eq!(record.tick, 0);
}

#[test]
fn empty_selection_disables_tracing() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();

    let token = h
        .service
        .select_trace_variables(&[var(4, IecType::Word, None)])
        .unwrap();
    eventually(|| (!h.service.fetch_trace_samples(token).1.is_empty()).then_some(()));

    assert_eq!(h.service.select_trace_variables(&[]), Ok(0));
    assert_eq!(
        h.service.fetch_trace_samples(token),
        (LifecycleState::Broken, vec![])
    );
    eventually(|| (h.device.count(protocol::RESET_TRACE) > 0).then_some(()));

    // No sweep runs without a selection.
    thread::sleep(Duration::from_millis(50));
    let waits = h.device.count(protocol::WAIT_TRACE);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.device.count(protocol::WAIT_TRACE), waits);
}

#[test]
fn trace_requests_carry_selected_ids() {
    let h = Harness::start();
    h.install("aa");
    h.service.start_program().unwrap();
    let token = h
        .service
        .select_trace_variables(&[var(10, IecType::Bool, None), var(20, IecType::Bool, None)])
        .unwrap();
    eventually(|| (!h.service.fetch_trace_samples(token).1.is_empty()).then_some(()));

    let frames = h.device.received();
    let set: Vec<_> = frames
        .iter()
        .filter(|f| f.id == protocol::SET_TRACE)
        .map(|f| protocol::parse_set_trace(&f.payload).unwrap())
        .collect();
    assert_eq!(set.len(), 2);
    assert_eq!((set[0].id, set[0].width, set[0].forced), (10, 1, false));
    assert_eq!(set[0].value, vec![0]);

    let first_wait = frames.iter().find(|f| f.id == protocol::WAIT_TRACE).unwrap();
    assert_eq!(protocol::parse_trace_request(&first_wait.payload), Ok(10));
    let first_get = frames.iter().find(|f| f.id == protocol::GET_TRACE).unwrap();
    assert_eq!(protocol::parse_trace_request(&first_get.payload), Ok(20));
}
