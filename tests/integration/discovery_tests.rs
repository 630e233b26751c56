use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scan_relay::device::discovery::enumerate_once;
use scan_relay::device::{
    discover_device, ArbitrationError, DeviceArbiter, DiscoveryConfig, DiscoveryError,
};

use super::common::{test_device, FakeBackend, RecordingLink, Trace};

fn arbiter(trace: &Trace) -> DeviceArbiter {
    DeviceArbiter::new(Box::new(RecordingLink {
        trace: trace.clone(),
    }))
}

#[test]
fn test_discovery_retries_until_a_scanner_appears() {
    let trace = Trace::default();
    let backend = FakeBackend::with_device_lists(
        trace.clone(),
        vec![Vec::new(), Vec::new(), vec![test_device()]],
    );
    let arbiter = arbiter(&trace);
    let config = DiscoveryConfig::default().with_backoff(Duration::ZERO);

    let device = discover_device(&arbiter, &backend, &config).unwrap();

    assert_eq!(device, test_device());
    assert_eq!(trace.count("list"), 3);
    assert_eq!(trace.count("acquire"), 3);
    assert_eq!(trace.count("release"), 3);
    assert_eq!(
        trace.entries(),
        vec![
            "acquire", "list", "release", "acquire", "list", "release", "acquire", "list",
            "release"
        ]
    );
    assert!(!arbiter.is_held());
}

#[test]
fn test_discovery_returns_first_device() {
    let trace = Trace::default();
    let second = scan_relay::device::DeviceHandle::new("test:1", "Second scanner");
    let backend =
        FakeBackend::with_device_lists(trace.clone(), vec![vec![test_device(), second]]);
    let arbiter = arbiter(&trace);

    let device = discover_device(&arbiter, &backend, &DiscoveryConfig::default()).unwrap();

    assert_eq!(device.name, "test:0");
    assert_eq!(trace.count("list"), 1);
}

#[test]
fn test_discovery_interrupted_before_first_attempt() {
    let trace = Trace::default();
    let backend = FakeBackend::with_device_lists(trace.clone(), vec![Vec::new()]);
    let arbiter = arbiter(&trace);
    let flag = Arc::new(AtomicBool::new(true));
    let config = DiscoveryConfig::default().with_shutdown_flag(flag);

    let result = discover_device(&arbiter, &backend, &config);

    assert!(matches!(
        result,
        Err(DiscoveryError::Interrupted { attempts: 0 })
    ));
    assert!(trace.entries().is_empty());
}

#[test]
fn test_discovery_interrupted_during_backoff() {
    let trace = Trace::default();
    let backend = FakeBackend::with_device_lists(trace.clone(), vec![Vec::new()]);
    let arbiter = arbiter(&trace);
    let flag = Arc::new(AtomicBool::new(false));
    let config = DiscoveryConfig::default()
        .with_backoff(Duration::from_secs(60))
        .with_shutdown_flag(Arc::clone(&flag));

    let setter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        flag.store(true, Ordering::SeqCst);
    });

    let result = discover_device(&arbiter, &backend, &config);
    setter.join().unwrap();

    assert!(matches!(
        result,
        Err(DiscoveryError::Interrupted { attempts: 1 })
    ));
    assert!(trace.handshake_is_paired());
}

#[test]
fn test_enumerate_once_refuses_nested_control() {
    let trace = Trace::default();
    let backend = FakeBackend::with_device_lists(trace.clone(), vec![vec![test_device()]]);
    let arbiter = arbiter(&trace);

    let _control = arbiter.acquire().unwrap();
    let result = enumerate_once(&arbiter, &backend);

    assert!(matches!(result, Err(ArbitrationError::AlreadyHeld)));
    assert_eq!(trace.count("list"), 0);
}
