use std::fs;
use std::path::PathBuf;

use scan_relay::finalize::{CounterError, CounterStore, FinalizeError, SessionFinalizer};
use scan_relay::session::ScanSession;

use super::common::{file_names, Harness};

/// A session directory holding `pages` captured pages.
fn session_with_pages(harness: &Harness, pages: u32) -> ScanSession {
    let dir = harness.session_root().join("scan_session_20240305_140709");
    fs::create_dir_all(&dir).unwrap();
    let mut session = ScanSession::new(dir.clone());
    for n in 1..=pages {
        if n > 1 {
            session.next_page();
        }
        let page = dir.join(format!("page_{}.png", n));
        fs::write(&page, b"png").unwrap();
        session.push_page(page);
    }
    session
}

#[test]
fn test_document_named_after_next_counter_value() {
    let harness = Harness::new();
    harness.set_counter(7);
    let session = session_with_pages(&harness, 2);
    let dir = session.dir().to_path_buf();

    let report = harness.finalizer().finalize(session).unwrap();

    assert_eq!(report.number, 8);
    assert_eq!(report.document, dir.join("invoice_8.pdf"));
    assert_eq!(report.pages, 2);
    assert!(report.assembled);
    assert!(report.counter_advanced);
    assert!(report.uploaded);
    assert!(report.document.exists());
    assert_eq!(harness.counter(), 8);
}

#[test]
fn test_missing_counter_starts_at_one() {
    let harness = Harness::new();
    let session = session_with_pages(&harness, 1);

    let report = harness.finalizer().finalize(session).unwrap();

    assert_eq!(report.number, 1);
    assert_eq!(file_names(&[report.document]), vec!["invoice_1.pdf"]);
    assert_eq!(harness.counter(), 1);
}

#[test]
fn test_consecutive_sessions_get_consecutive_numbers() {
    let harness = Harness::new();
    harness.set_counter(99);
    let finalizer = harness.finalizer();

    let first = finalizer.finalize(session_with_pages(&harness, 1)).unwrap();
    let second = finalizer.finalize(session_with_pages(&harness, 1)).unwrap();

    assert_eq!(first.number, 100);
    assert_eq!(second.number, 101);
    let markers: Vec<PathBuf> = fs::read_dir(harness.counter_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(file_names(&markers), vec!["101.ctr"]);
}

#[test]
fn test_custom_document_prefix() {
    let harness = Harness::new();
    let finalizer = harness.finalizer().with_document_prefix("receipt");

    let report = finalizer.finalize(session_with_pages(&harness, 1)).unwrap();

    assert_eq!(file_names(&[report.document]), vec!["receipt_1.pdf"]);
}

#[test]
fn test_counter_advances_even_when_assembly_fails() {
    let harness = Harness::new();
    harness.set_counter(3);
    *harness.assembler.fail.lock().unwrap() = true;

    let report = harness
        .finalizer()
        .finalize(session_with_pages(&harness, 1))
        .unwrap();

    assert!(!report.assembled);
    assert!(report.counter_advanced);
    assert!(!report.uploaded);
    assert_eq!(harness.counter(), 4);
    assert!(harness.uploads().is_empty());
}

#[test]
fn test_upload_failure_keeps_counter() {
    let harness = Harness::new();
    harness.set_counter(10);
    *harness.uploader.fail.lock().unwrap() = true;

    let report = harness
        .finalizer()
        .finalize(session_with_pages(&harness, 1))
        .unwrap();

    assert!(report.assembled);
    assert!(!report.uploaded);
    assert_eq!(harness.uploads().len(), 1);
    assert_eq!(harness.counter(), 11);
    assert!(report.document.exists());
}

#[test]
fn test_upload_disabled() {
    let harness = Harness::new();
    let finalizer = SessionFinalizer::new(
        CounterStore::new(harness.counter_dir()),
        Box::new(harness.assembler.clone()),
        None,
    );

    let report = finalizer.finalize(session_with_pages(&harness, 1)).unwrap();

    assert!(report.assembled);
    assert!(!report.uploaded);
    assert!(harness.uploads().is_empty());
}

#[test]
fn test_empty_session_is_rejected() {
    let harness = Harness::new();
    harness.set_counter(2);
    let session = session_with_pages(&harness, 0);

    let result = harness.finalizer().finalize(session);

    assert!(matches!(result, Err(FinalizeError::EmptySession(_))));
    assert!(harness.assembled().is_empty());
    assert_eq!(harness.counter(), 2);
}

#[test]
fn test_pages_passed_in_capture_order() {
    let harness = Harness::new();
    let session = session_with_pages(&harness, 12);

    harness.finalizer().finalize(session).unwrap();

    let expected: Vec<String> = (1..=12).map(|n| format!("page_{}.png", n)).collect();
    assert_eq!(file_names(&harness.assembled()[0].0), expected);
}

#[test]
fn test_exhausted_counter_produces_no_document() {
    let harness = Harness::new();
    harness.set_counter(u64::MAX);

    let result = harness.finalizer().finalize(session_with_pages(&harness, 1));

    assert!(matches!(
        result,
        Err(FinalizeError::Counter(CounterError::Exhausted { .. }))
    ));
    assert!(harness.assembled().is_empty());
    assert_eq!(harness.counter(), u64::MAX);
}
