//! Scanner hardware access and ownership arbitration.
//!
//! This module owns everything that touches the physical scanner:
//!
//! - [`arbiter`]: the take/release handshake with the process that owns the
//!   scanner by default (normally `scanbd`)
//! - [`discovery`]: blocking enumeration loop that waits until a scanner appears
//! - [`scanimage`]: production [`ScannerBackend`] driving the SANE command-line
//!   front-end
//!
//! # Architecture
//!
//! The scanner itself is reached through two traits. [`ScannerBackend`]
//! enumerates devices and opens them; the opened [`ScannerDevice`] performs a
//! single synchronous scan and is closed explicitly. Neither trait knows about
//! the handshake: callers must hold a [`ControlGuard`] while using them.

pub mod arbiter;
pub mod discovery;
pub mod scanimage;

use std::fmt;

use image::DynamicImage;
use thiserror::Error;

pub use arbiter::{
    canonical_signal_name, ArbitrationError, ControlGuard, DeviceArbiter, OwnerLink, OwnershipMessage, ProcessSignalLink,
};
pub use discovery::{discover_device, DiscoveryConfig, DiscoveryError};
pub use scanimage::ScanimageBackend;

/// Identifies one scanner reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Backend device name (e.g. `epson2:libusb:001:004`).
    pub name: String,
    /// Human readable vendor/model description.
    pub description: String,
}

impl DeviceHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.description)
        }
    }
}

/// Error type for scanner operations.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Device enumeration failed.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// The device could not be opened.
    #[error("failed to open device {device}: {message}")]
    Open { device: String, message: String },

    /// The scan operation itself failed (jam, no paper, timeout).
    #[error("scan failed on {device}: {message}")]
    Scan { device: String, message: String },

    /// The backend returned data that is not a decodable image.
    #[error("scanner returned an undecodable image: {0}")]
    Decode(#[from] image::ImageError),

    /// General I/O error, usually while spawning the backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Enumerates and opens scanners.
pub trait ScannerBackend {
    /// List the scanners currently visible to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Enumeration`] when the backend cannot be queried.
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, ScanError>;

    /// Open a scanner for a single scan.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Open`] if the device is unavailable.
    fn open(&self, device: &DeviceHandle) -> Result<Box<dyn ScannerDevice>, ScanError>;
}

/// An opened scanner.
pub trait ScannerDevice {
    /// Perform one synchronous scan and return the page image.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Scan`] or [`ScanError::Decode`] on failure.
    fn scan(&mut self) -> Result<DynamicImage, ScanError>;

    /// Close the device.
    ///
    /// # Errors
    ///
    /// Returns a [`ScanError`] if the device reports a failure while closing.
    fn close(self: Box<Self>) -> Result<(), ScanError>;
}
