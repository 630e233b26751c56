use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};

use scan_relay::dispatcher::StopReason;
use scan_relay::error::DaemonError;
use scan_relay::events::{self, DaemonEvent, ProducerSet, ScanEvent};
use scan_relay::session::DeviceMode;
use scan_relay::signal::ShutdownHandler;

use super::common::{file_names, Harness, ScanScript};

#[test]
fn test_starts_in_manual_mode() {
    let harness = Harness::new();
    let dispatcher = harness.dispatcher();
    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    assert!(dispatcher.session().is_none());
}

#[test]
fn test_single_page_session_end_to_end() {
    let harness = Harness::new();
    harness.set_counter(41);
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    assert_eq!(dispatcher.mode(), DeviceMode::AutoFeed);
    let session = dispatcher.session().unwrap();
    assert_eq!(file_names(session.pages()), vec!["page_1.png"]);
    assert!(session.pages()[0].exists());
    let session_dir = session.dir().to_path_buf();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    let assembled = harness.assembled();
    assert_eq!(assembled.len(), 1);
    assert_eq!(file_names(&assembled[0].0), vec!["page_1.png"]);
    assert_eq!(assembled[0].1, session_dir.join("invoice_42.pdf"));
    assert_eq!(harness.counter(), 42);
    assert!(harness.counter_dir().join("42.ctr").exists());
    assert!(!harness.counter_dir().join("41.ctr").exists());
    assert_eq!(harness.uploads(), vec![session_dir.join("invoice_42.pdf")]);
}

#[test]
fn test_multi_page_session_end_to_end() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    assert_eq!(dispatcher.mode(), DeviceMode::AutoFeed);
    dispatcher.handle(ScanEvent::PageFeed).unwrap();
    dispatcher.handle(ScanEvent::PageFeed).unwrap();
    assert_eq!(dispatcher.session().unwrap().page(), 3);
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    let assembled = harness.assembled();
    assert_eq!(assembled.len(), 1);
    assert_eq!(
        file_names(&assembled[0].0),
        vec!["page_1.png", "page_2.png", "page_3.png"]
    );
    assert_eq!(harness.trace.count("scan"), 3);
    assert!(harness.trace.handshake_is_paired());
}

#[test]
fn test_pages_stay_in_numeric_order_past_nine() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    for _ in 0..10 {
        dispatcher.handle(ScanEvent::PageFeed).unwrap();
    }
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    let pages = file_names(&harness.assembled()[0].0);
    let expected: Vec<String> = (1..=11).map(|n| format!("page_{}.png", n)).collect();
    assert_eq!(pages, expected);
}

#[test]
fn test_page_feed_in_manual_mode_is_ignored() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::PageFeed).unwrap();

    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    assert!(dispatcher.session().is_none());
    assert!(harness.trace.entries().is_empty());
    assert!(!harness.session_root().exists());
}

#[test]
fn test_scan_failure_is_contained() {
    let harness = Harness::new();
    harness
        .backend
        .script_scans(vec![ScanScript::Ok, ScanScript::Fail("paper jam")]);
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    dispatcher.handle(ScanEvent::PageFeed).unwrap();

    // Control went back after the failed scan and the device was closed.
    assert!(harness.trace.handshake_is_paired());
    assert!(!harness.arbiter.is_held());
    assert_eq!(harness.trace.count("close"), 2);
    assert!(!dispatcher.session().unwrap().dir().join("page_2.png").exists());

    // Still responsive: the next page is captured with the next number.
    dispatcher.handle(ScanEvent::PageFeed).unwrap();
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    assert_eq!(
        file_names(&harness.assembled()[0].0),
        vec!["page_1.png", "page_3.png"]
    );
}

#[test]
fn test_open_failure_is_contained() {
    let harness = Harness::new();
    *harness.backend.fail_open.lock().unwrap() = true;
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    assert_eq!(dispatcher.mode(), DeviceMode::AutoFeed);
    assert!(dispatcher.session().unwrap().is_empty());
    assert_eq!(
        harness.trace.entries(),
        vec!["acquire", "open", "release"]
    );
}

#[test]
fn test_empty_session_still_returns_to_manual() {
    let harness = Harness::new();
    harness.set_counter(5);
    harness.backend.script_scans(vec![ScanScript::Fail("no paper")]);
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    assert!(harness.assembled().is_empty());
    assert_eq!(harness.counter(), 5);
}

#[test]
fn test_assembly_failure_still_returns_to_manual() {
    let harness = Harness::new();
    *harness.assembler.fail.lock().unwrap() = true;
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    assert!(harness.uploads().is_empty());
}

#[test]
fn test_device_only_touched_under_control() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();

    for event in [
        ScanEvent::ManualTrigger,
        ScanEvent::PageFeed,
        ScanEvent::ManualTrigger,
        ScanEvent::PageFeed,
        ScanEvent::ManualTrigger,
    ] {
        dispatcher.handle(event).unwrap();
    }

    assert!(harness.trace.device_used_only_under_control());
    assert!(harness.trace.handshake_is_paired());
}

#[test]
fn test_separate_sessions_use_separate_directories() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    let first = dispatcher.session().unwrap().dir().to_path_buf();
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    let second = dispatcher.session().unwrap().dir().to_path_buf();

    assert_ne!(first, second);
}

fn fixed_clock() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
}

#[test]
fn test_session_directory_named_after_start_time() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher().with_clock(fixed_clock);

    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    assert_eq!(
        dispatcher.session().unwrap().dir(),
        harness.session_root().join("scan_session_20240305_140709")
    );
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();

    // Same second again: the first directory is not reused.
    dispatcher.handle(ScanEvent::ManualTrigger).unwrap();
    assert_eq!(
        dispatcher.session().unwrap().dir(),
        harness.session_root().join("scan_session_20240305_140709_2")
    );
}

#[test]
fn test_run_handles_events_until_shutdown_event() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();
    let (tx, rx) = events::channel();

    tx.send(ScanEvent::ManualTrigger.into()).unwrap();
    tx.send(ScanEvent::PageFeed.into()).unwrap();
    tx.send(ScanEvent::ManualTrigger.into()).unwrap();
    tx.send(DaemonEvent::Shutdown).unwrap();

    let reason = dispatcher.run(&rx, &ShutdownHandler::new()).unwrap();

    assert_eq!(reason, StopReason::ShutdownEvent);
    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    assert_eq!(harness.assembled().len(), 1);
}

#[test]
fn test_run_stops_on_shutdown_request_from_another_thread() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();
    let (tx, rx) = events::channel();
    let shutdown = ShutdownHandler::new();
    shutdown.attach(tx.clone());

    let remote = shutdown.clone();
    let requester = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.request_shutdown();
    });

    let reason = dispatcher.run(&rx, &shutdown).unwrap();
    requester.join().unwrap();

    assert_eq!(reason, StopReason::ShutdownEvent);
    drop(tx);
}

#[test]
fn test_run_checks_flag_before_waiting() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();
    let (_tx, rx) = events::channel();
    let shutdown = ShutdownHandler::new();
    shutdown.request_shutdown();

    let reason = dispatcher.run(&rx, &shutdown).unwrap();

    assert_eq!(reason, StopReason::ShutdownFlag);
}

#[test]
fn test_run_fails_when_event_source_closes() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();
    let (tx, rx) = events::channel();
    tx.send(ScanEvent::ManualTrigger.into()).unwrap();
    drop(tx);

    let result = dispatcher.run(&rx, &ShutdownHandler::new());

    assert!(matches!(result, Err(DaemonError::EventSourceClosed)));
    assert!(!harness.arbiter.is_held());
}

#[test]
fn test_run_fails_when_last_producer_stops_while_shutdown_sender_lives() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();
    let (tx, rx) = events::channel();
    let shutdown = ShutdownHandler::new();
    shutdown.attach(tx.clone());
    let producers = ProducerSet::new(tx);

    let watcher = producers.register("trigger-files");
    let producer_thread = thread::spawn(move || {
        watcher.send(ScanEvent::ManualTrigger);
        // Dropping the handle without a shutdown request.
    });
    producer_thread.join().unwrap();

    let result = dispatcher.run(&rx, &shutdown);

    assert!(matches!(result, Err(DaemonError::EventSourceClosed)));
    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
    assert_eq!(harness.trace.count("scan"), 1);
    assert!(!harness.arbiter.is_held());
}

#[test]
fn test_held_control_is_fatal() {
    let harness = Harness::new();
    let mut dispatcher = harness.dispatcher();

    let _control = harness.arbiter.acquire().unwrap();
    let result = dispatcher.handle(ScanEvent::ManualTrigger);

    assert!(matches!(result, Err(DaemonError::Capture(_))));
    assert_eq!(dispatcher.mode(), DeviceMode::Manual);
}
