//! Blocking scanner discovery.
//!
//! The daemon has nothing to do without a scanner, so discovery does not give
//! up: it keeps enumerating, with a fixed pause between attempts, until a
//! device shows up. Each attempt runs under the ownership handshake. The only
//! way out without a device is a shutdown request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::{ArbitrationError, DeviceArbiter, DeviceHandle, ScannerBackend};

/// Granularity of the shutdown check while waiting between attempts.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Configuration for the discovery loop.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Pause between two enumeration attempts.
    pub backoff: Duration,
    /// Optional shutdown flag checked between attempts.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
            shutdown_flag: None,
        }
    }
}

impl DiscoveryConfig {
    /// Set the pause between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Error type for discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Shutdown was requested before a scanner was found.
    #[error("discovery interrupted after {attempts} attempt(s)")]
    Interrupted { attempts: u32 },

    /// The handshake was misused.
    #[error(transparent)]
    Arbitration(#[from] ArbitrationError),
}

/// Run a single enumeration attempt under the handshake.
///
/// Enumeration errors are logged and reported as "no devices".
///
/// # Errors
///
/// Returns [`ArbitrationError::AlreadyHeld`] if control is already taken.
pub fn enumerate_once(
    arbiter: &DeviceArbiter,
    backend: &dyn ScannerBackend,
) -> Result<Vec<DeviceHandle>, ArbitrationError> {
    let _control = arbiter.acquire()?;
    match backend.list_devices() {
        Ok(devices) => Ok(devices),
        Err(e) => {
            log::warn!("Scanner enumeration failed: {}", e);
            Ok(Vec::new())
        }
    }
}

/// Wait until at least one scanner is available and return the first one.
///
/// # Errors
///
/// Returns [`DiscoveryError::Interrupted`] if shutdown was requested, or
/// [`DiscoveryError::Arbitration`] if control was already held.
pub fn discover_device(
    arbiter: &DeviceArbiter,
    backend: &dyn ScannerBackend,
    config: &DiscoveryConfig,
) -> Result<DeviceHandle, DiscoveryError> {
    log::info!("Looking for scanners");
    let mut attempts = 0u32;

    loop {
        if config.is_shutdown_requested() {
            return Err(DiscoveryError::Interrupted { attempts });
        }

        attempts += 1;
        let devices = enumerate_once(arbiter, backend)?;

        if let Some(device) = devices.into_iter().next() {
            log::info!("Found scanner: {} (attempt {})", device, attempts);
            return Ok(device);
        }

        log::info!(
            "No scanners found, retrying in {}s",
            config.backoff.as_secs_f32()
        );
        wait_for_retry(config);
    }
}

fn wait_for_retry(config: &DiscoveryConfig) {
    let deadline = Instant::now() + config.backoff;
    loop {
        let now = Instant::now();
        if now >= deadline || config.is_shutdown_requested() {
            return;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
