//! Device ownership handshake with the competing hardware-owning process.
//!
//! The scanner is owned by a separate daemon (normally `scanbd`) which polls
//! its buttons. Before this process may open the device it has to ask that
//! daemon to let go, and it must hand the device back afterwards on every
//! path. Exclusivity depends entirely on the other daemon honouring these
//! messages; this module only guarantees that the messages are strictly
//! paired and never interleaved.
//!
//! # Example
//!
//! ```rust,no_run
//! use scan_relay::device::{DeviceArbiter, ProcessSignalLink};
//!
//! let arbiter = DeviceArbiter::new(Box::new(ProcessSignalLink::new("scanbd", "SIGUSR1", "SIGUSR2")));
//! {
//!     let _control = arbiter.acquire().expect("control already held");
//!     // ... use the scanner ...
//! } // release is sent here, even on early return or panic
//! ```

use std::process::Command;
use std::sync::{Mutex, MutexGuard, TryLockError};

use thiserror::Error;

/// Signals accepted for the handshake, without the `SIG` prefix.
const SIGNAL_NAMES: &[&str] = &[
    "HUP", "INT", "QUIT", "USR1", "USR2", "ALRM", "TERM", "CONT", "STOP", "TSTP",
];

/// Canonical `SIG<NAME>` form of a signal name, as `killall -s` expects it.
///
/// Accepts `SIGUSR1`, `USR1` and their lowercase forms. Returns `None` for
/// names outside the supported set.
#[must_use]
pub fn canonical_signal_name(name: &str) -> Option<String> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    SIGNAL_NAMES
        .contains(&bare)
        .then(|| format!("SIG{}", bare))
}

/// Messages of the ownership protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipMessage {
    /// Ask the owning process to suspend its use of the scanner.
    Acquire,
    /// Give the scanner back to the owning process.
    Release,
}

impl std::fmt::Display for OwnershipMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnershipMessage::Acquire => write!(f, "acquire"),
            OwnershipMessage::Release => write!(f, "release"),
        }
    }
}

/// Error type for the ownership handshake.
#[derive(Debug, Error)]
pub enum ArbitrationError {
    /// `acquire` was called while a [`ControlGuard`] is still alive.
    #[error("device control is already held")]
    AlreadyHeld,

    /// The owning process could not be notified.
    #[error("failed to send {message} to {process}: {reason}")]
    Notify {
        message: OwnershipMessage,
        process: String,
        reason: String,
    },
}

/// Transport for ownership messages.
pub trait OwnerLink: Send + Sync {
    /// Deliver one message to the owning process.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Notify`] if delivery failed.
    fn notify(&self, message: OwnershipMessage) -> Result<(), ArbitrationError>;
}

/// Signals the owning process by name with `killall`.
#[derive(Debug, Clone)]
pub struct ProcessSignalLink {
    process: String,
    acquire_signal: String,
    release_signal: String,
}

impl ProcessSignalLink {
    /// Create a link that sends `acquire_signal`/`release_signal` to `process`.
    ///
    /// Signal names are stored in canonical form; unknown names are kept
    /// as given.
    #[must_use]
    pub fn new(
        process: impl Into<String>,
        acquire_signal: impl Into<String>,
        release_signal: impl Into<String>,
    ) -> Self {
        let canonical = |name: String| canonical_signal_name(&name).unwrap_or(name);
        Self {
            process: process.into(),
            acquire_signal: canonical(acquire_signal.into()),
            release_signal: canonical(release_signal.into()),
        }
    }

    fn command(&self, message: OwnershipMessage) -> Command {
        let mut command = Command::new("killall");
        command.args(["-s", self.signal_for(message), &self.process]);
        command
    }

    fn signal_for(&self, message: OwnershipMessage) -> &str {
        match message {
            OwnershipMessage::Acquire => &self.acquire_signal,
            OwnershipMessage::Release => &self.release_signal,
        }
    }
}

impl OwnerLink for ProcessSignalLink {
    fn notify(&self, message: OwnershipMessage) -> Result<(), ArbitrationError> {
        let output = self
            .command(message)
            .output()
            .map_err(|e| ArbitrationError::Notify {
                message,
                process: self.process.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ArbitrationError::Notify {
                message,
                process: self.process.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Serializes access to the scanner and pairs every acquire with a release.
pub struct DeviceArbiter {
    link: Box<dyn OwnerLink>,
    lock: Mutex<()>,
}

impl std::fmt::Debug for DeviceArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceArbiter")
            .field("link", &"<owner link>")
            .field("held", &self.is_held())
            .finish()
    }
}

impl DeviceArbiter {
    /// Create an arbiter sending messages over `link`.
    #[must_use]
    pub fn new(link: Box<dyn OwnerLink>) -> Self {
        Self {
            link,
            lock: Mutex::new(()),
        }
    }

    /// Take control of the scanner.
    ///
    /// Sends [`OwnershipMessage::Acquire`] and returns a guard that sends
    /// [`OwnershipMessage::Release`] when dropped. A failed notification is
    /// logged but still yields a guard, so the paired release always goes out.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::AlreadyHeld`] if a guard is alive. Nothing
    /// is sent in that case.
    pub fn acquire(&self) -> Result<ControlGuard<'_>, ArbitrationError> {
        let lock = match self.lock.try_lock() {
            Ok(lock) => lock,
            // A panic while holding control has already released it in Drop.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(ArbitrationError::AlreadyHeld),
        };

        log::info!("Taking scanner control");
        self.send(OwnershipMessage::Acquire);
        Ok(ControlGuard {
            arbiter: self,
            _lock: lock,
        })
    }

    /// Whether a [`ControlGuard`] is currently alive.
    #[must_use]
    pub fn is_held(&self) -> bool {
        matches!(self.lock.try_lock(), Err(TryLockError::WouldBlock))
    }

    /// Send a release if control is still held.
    ///
    /// Used by the shutdown path. Returns `true` if a release was sent.
    pub fn release_if_held(&self) -> bool {
        if self.is_held() {
            log::warn!("Scanner control still held at shutdown, releasing");
            self.send(OwnershipMessage::Release);
            true
        } else {
            false
        }
    }

    fn send(&self, message: OwnershipMessage) {
        match self.link.notify(message) {
            Ok(()) => log::debug!("Sent {} to scanner owner", message),
            Err(e) => log::warn!("{}", e),
        }
    }
}

/// Proof of exclusive scanner control. Dropping it hands control back.
#[must_use = "control is released as soon as the guard is dropped"]
pub struct ControlGuard<'a> {
    arbiter: &'a DeviceArbiter,
    _lock: MutexGuard<'a, ()>,
}

impl std::fmt::Debug for ControlGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlGuard").finish_non_exhaustive()
    }
}

impl Drop for ControlGuard<'_> {
    fn drop(&mut self) {
        self.arbiter.send(OwnershipMessage::Release);
        log::info!("Scanner control returned");
    }
}
