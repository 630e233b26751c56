//! Daemon-level errors and exit codes.

use serde::Serialize;
use thiserror::Error;

use crate::capture::CaptureError;
use crate::device::DiscoveryError;

/// Failures that end the daemon.
///
/// Everything else (scan failures, assembly or upload failures) is logged
/// inside the handler that hit it.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// All event producers have gone away.
    #[error("event source closed unexpectedly")]
    EventSourceClosed,

    /// A capture failed in a way the daemon cannot recover from.
    #[error("fatal capture failure: {0}")]
    Capture(#[from] CaptureError),

    /// Discovery could not complete.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Exit codes for the scan-relay process.
///
/// - 0: Orderly shutdown
/// - 1: Unanticipated failure
/// - 2: Invalid configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Orderly shutdown.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// The configuration could not be loaded or failed validation.
    ConfigError = 2,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "SR000",
            Self::GeneralError => "SR001",
            Self::ConfigError => "SR002",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "SR001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Underlying causes, outermost first
    pub causes: Vec<String>,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }
}
