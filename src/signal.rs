//! Termination requests (SIGINT, SIGTERM, SIGHUP).
//!
//! A termination request sets a shared flag for the polling threads and, once
//! an event channel is attached, pushes [`DaemonEvent::Shutdown`] so the
//! dispatcher leaves its blocking `recv()`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use scan_relay::events;
//! use scan_relay::signal::install_handler;
//!
//! let (tx, rx) = events::channel();
//! let handler = install_handler().expect("Failed to install signal handler");
//! handler.attach(tx);
//!
//! // Discovery and the trigger watcher poll this flag
//! let shutdown_flag = handler.get_flag();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::events::{DaemonEvent, EventSender};

/// Shared termination state. Clones see the same flag and channel.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
    /// Dispatcher channel to wake, once attached.
    notify: Arc<Mutex<Option<EventSender>>>,
}

impl ShutdownHandler {
    /// Create a handler with no request pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether termination was requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wake `sender` with [`DaemonEvent::Shutdown`] on shutdown.
    ///
    /// If shutdown was already requested the event is sent immediately.
    pub fn attach(&self, sender: EventSender) {
        if self.is_shutdown_requested() {
            let _ = sender.send(DaemonEvent::Shutdown);
        }
        if let Ok(mut notify) = self.notify.lock() {
            *notify = Some(sender);
        }
    }

    /// Stop waking the attached channel. The flag is left as is.
    pub fn detach(&self) {
        if let Ok(mut notify) = self.notify.lock() {
            *notify = None;
        }
    }

    /// Request a shutdown.
    ///
    /// Sets the flag and wakes the attached channel, if any.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Ok(notify) = self.notify.lock() {
            if let Some(sender) = notify.as_ref() {
                let _ = sender.send(DaemonEvent::Shutdown);
            }
        }
    }

    /// The raw flag, for threads that poll instead of receiving events.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the request and detach the channel.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.detach();
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the termination handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install a handler for SIGINT, SIGTERM and SIGHUP.
///
/// Should be called once, early in startup. A second call returns the
/// already installed handler, reset.
///
/// # Errors
///
/// Returns [`SignalError::InstallFailed`] if another handler was registered
/// outside this module.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let hooked = handler.clone();
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received");
        hooked.request_shutdown();
    })?;

    let _ = GLOBAL_HANDLER.set(handler.clone());
    Ok(handler)
}
