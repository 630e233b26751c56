//! Event dispatcher and scan mode state machine.
//!
//! | State    | Event          | Action                              | Next     |
//! |----------|----------------|-------------------------------------|----------|
//! | Manual   | scan button    | open session, capture page 1        | AutoFeed |
//! | AutoFeed | scan button    | finalize session                    | Manual   |
//! | AutoFeed | page loaded    | next page number, capture it        | AutoFeed |
//! | Manual   | page loaded    | ignored                             | Manual   |
//!
//! Handlers run to completion on the calling thread. Failures inside a
//! handler are logged and contained; only a [`DaemonError`] leaves
//! [`Dispatcher::run`].

use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::capture::ScanExecutor;
use crate::error::DaemonError;
use crate::events::{DaemonEvent, EventReceiver, ScanEvent};
use crate::finalize::SessionFinalizer;
use crate::session::{DeviceMode, ScanSession};
use crate::signal::ShutdownHandler;

#[derive(Debug)]
enum State {
    Idle,
    Open(ScanSession),
}

/// Why [`Dispatcher::run`] returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A [`DaemonEvent::Shutdown`] was received.
    ShutdownEvent,
    /// The shutdown flag was set.
    ShutdownFlag,
}

/// Owns the session state and routes events to capture and finalization.
pub struct Dispatcher {
    executor: ScanExecutor,
    finalizer: SessionFinalizer,
    session_root: PathBuf,
    clock: fn() -> DateTime<Local>,
    state: State,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("executor", &self.executor)
            .field("finalizer", &self.finalizer)
            .field("session_root", &self.session_root)
            .field("state", &self.state)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher in manual mode.
    #[must_use]
    pub fn new(
        executor: ScanExecutor,
        finalizer: SessionFinalizer,
        session_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            finalizer,
            session_root: session_root.into(),
            clock: Local::now,
            state: State::Idle,
        }
    }

    /// Replace the clock used to name session directories.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> DeviceMode {
        match self.state {
            State::Idle => DeviceMode::Manual,
            State::Open(_) => DeviceMode::AutoFeed,
        }
    }

    /// The open session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&ScanSession> {
        match &self.state {
            State::Idle => None,
            State::Open(session) => Some(session),
        }
    }

    /// Handle events until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::EventSourceClosed`] if every producer is gone
    /// (reported by [`DaemonEvent::SourcesClosed`] or a disconnected channel),
    /// or any fatal error raised by a handler.
    pub fn run(
        &mut self,
        events: &EventReceiver,
        shutdown: &ShutdownHandler,
    ) -> Result<StopReason, DaemonError> {
        log::info!("Waiting for scanner events in {} mode", self.mode());
        loop {
            if shutdown.is_shutdown_requested() {
                self.abandon_session();
                return Ok(StopReason::ShutdownFlag);
            }

            match events.recv() {
                Ok(DaemonEvent::Scan(event)) => self.handle(event)?,
                Ok(DaemonEvent::Shutdown) => {
                    self.abandon_session();
                    return Ok(StopReason::ShutdownEvent);
                }
                Ok(DaemonEvent::SourcesClosed) if shutdown.is_shutdown_requested() => {
                    self.abandon_session();
                    return Ok(StopReason::ShutdownFlag);
                }
                Ok(DaemonEvent::SourcesClosed) | Err(_) => {
                    self.abandon_session();
                    return Err(DaemonError::EventSourceClosed);
                }
            }
        }
    }

    /// Handle one hardware event.
    ///
    /// # Errors
    ///
    /// Returns a [`DaemonError`] only for failures that must stop the daemon.
    pub fn handle(&mut self, event: ScanEvent) -> Result<(), DaemonError> {
        log::debug!("Event: {} in {} mode", event, self.mode());

        match (std::mem::replace(&mut self.state, State::Idle), event) {
            (State::Idle, ScanEvent::ManualTrigger) => {
                let mut session = ScanSession::start_at(&self.session_root, (self.clock)());
                log::info!("Starting scan session in {}", session.dir().display());
                let page = session.page();
                self.capture(&mut session, page)?;
                self.state = State::Open(session);
            }
            (State::Open(session), ScanEvent::ManualTrigger) => {
                log::info!(
                    "Finalizing scan session with {} page(s)",
                    session.pages().len()
                );
                match self.finalizer.finalize(session) {
                    Ok(report) => log::info!(
                        "Scan session complete: {} (uploaded: {})",
                        report.document.display(),
                        report.uploaded
                    ),
                    Err(e) => log::warn!("Scan session finished without a document: {}", e),
                }
            }
            (State::Open(mut session), ScanEvent::PageFeed) => {
                let page = session.next_page();
                let result = self.capture(&mut session, page);
                self.state = State::Open(session);
                result?;
                return Ok(());
            }
            (State::Idle, ScanEvent::PageFeed) => {
                log::debug!("Page loaded outside a session, ignoring");
                return Ok(());
            }
        }

        log::info!("Scanner is now in {} mode", self.mode());
        Ok(())
    }

    fn capture(&self, session: &mut ScanSession, page: u32) -> Result<(), DaemonError> {
        match self.executor.capture_page(session.dir(), page) {
            Ok(path) => {
                session.push_page(path);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                log::error!("Page {} not captured: {:?}", page, anyhow::Error::new(e));
                Ok(())
            }
        }
    }

    fn abandon_session(&mut self) {
        if let State::Open(session) = std::mem::replace(&mut self.state, State::Idle) {
            log::warn!(
                "Shutting down with an open session, {} page(s) left in {}",
                session.pages().len(),
                session.dir().display()
            );
        }
    }
}
