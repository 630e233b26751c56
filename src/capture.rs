//! Single-page capture under exclusive device control.
//!
//! [`ScanExecutor::capture_page`] is the only code path that opens the
//! scanner. It takes control from the owning process, opens the device, scans
//! one page, writes it as `page_<n>.png`, closes the device and hands control
//! back. Failures of the device or of the write are returned to the caller as
//! non-fatal [`CaptureError`]s; only a misuse of the handshake is fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;
use thiserror::Error;

use crate::device::{ArbitrationError, DeviceArbiter, DeviceHandle, ScanError, ScannerBackend};

/// File name of a captured page.
#[must_use]
pub fn page_file_name(page: u32) -> String {
    format!("page_{}.png", page)
}

/// Error type for a capture attempt.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Control could not be taken. This indicates overlapping device
    /// operations and is never expected at runtime.
    #[error(transparent)]
    Arbitration(#[from] ArbitrationError),

    /// The session directory could not be created.
    #[error("cannot create session directory {path}: {source}")]
    SessionDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The device failed to open.
    #[error("cannot open scanner: {0}")]
    Open(#[source] ScanError),

    /// The scan itself failed.
    #[error("scan failed: {0}")]
    Scan(#[source] ScanError),

    /// The scanned image could not be written.
    #[error("cannot save page to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl CaptureError {
    /// Whether this failure must stop the daemon.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::Arbitration(_))
    }
}

/// Performs one exclusive scan-and-save per call.
pub struct ScanExecutor {
    arbiter: Arc<DeviceArbiter>,
    backend: Box<dyn ScannerBackend>,
    device: DeviceHandle,
}

impl std::fmt::Debug for ScanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanExecutor")
            .field("arbiter", &self.arbiter)
            .field("backend", &"<backend>")
            .field("device", &self.device)
            .finish()
    }
}

impl ScanExecutor {
    /// Create an executor for `device`.
    #[must_use]
    pub fn new(
        arbiter: Arc<DeviceArbiter>,
        backend: Box<dyn ScannerBackend>,
        device: DeviceHandle,
    ) -> Self {
        Self {
            arbiter,
            backend,
            device,
        }
    }

    /// The scanner this executor drives.
    #[must_use]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Capture page `page` into `session_dir`.
    ///
    /// Control is released before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`]; check [`CaptureError::is_fatal`] to decide
    /// whether the daemon can continue.
    pub fn capture_page(&self, session_dir: &Path, page: u32) -> Result<PathBuf, CaptureError> {
        let _control = self.arbiter.acquire()?;

        std::fs::create_dir_all(session_dir).map_err(|source| CaptureError::SessionDir {
            path: session_dir.to_path_buf(),
            source,
        })?;

        let mut scanner = self.backend.open(&self.device).map_err(CaptureError::Open)?;
        log::debug!("Device {} opened", self.device);

        let output = session_dir.join(page_file_name(page));
        log::info!("Scanning page {}", page);
        let result = scanner
            .scan()
            .map_err(CaptureError::Scan)
            .and_then(|image| {
                image
                    .save_with_format(&output, ImageFormat::Png)
                    .map_err(|source| {
                        // A partial page must not reach the assembler.
                        let _ = std::fs::remove_file(&output);
                        CaptureError::Save {
                            path: output.clone(),
                            source,
                        }
                    })
            });

        match scanner.close() {
            Ok(()) => log::debug!("Device {} closed", self.device),
            Err(e) => log::error!("Failed to close scanner: {:?}", e),
        }

        result.map(|()| {
            log::info!("Page {} saved to {}", page, output.display());
            output
        })
    }
}
