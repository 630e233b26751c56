//! Hardware event delivery.
//!
//! Every producer pushes [`DaemonEvent`]s into one `mpsc` channel and the
//! dispatcher blocks on the receiving end, so events are handled one at a
//! time in arrival order.
//!
//! Producers:
//! - [`trigger_files`]: polls the flag files written by the button daemon's
//!   action scripts (fallback, always available)
//! - [`signals`]: `SIGUSR1`/`SIGUSR2` sent to this process (blocking, no
//!   polling)
//! - [`crate::signal`]: termination signals become [`DaemonEvent::Shutdown`]
//!
//! Hardware producers are registered in a [`ProducerSet`]. When the last one
//! stops, [`DaemonEvent::SourcesClosed`] is sent. The shutdown handler keeps
//! its own sender for the life of the process, so a disconnected channel
//! alone cannot report dead producers.

pub mod signals;
pub mod trigger_files;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

pub use signals::{spawn_signal_listener, SignalListener};
pub use trigger_files::{spawn_trigger_watcher, TriggerFiles};

/// A hardware event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanEvent {
    /// The scan button was pressed.
    ManualTrigger,
    /// A page was loaded into the document feeder.
    PageFeed,
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanEvent::ManualTrigger => write!(f, "scan button"),
            ScanEvent::PageFeed => write!(f, "page loaded"),
        }
    }
}

/// Anything the dispatcher loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonEvent {
    /// A hardware event.
    Scan(ScanEvent),
    /// Orderly shutdown was requested.
    Shutdown,
    /// Every registered hardware event producer has stopped.
    SourcesClosed,
}

impl From<ScanEvent> for DaemonEvent {
    fn from(event: ScanEvent) -> Self {
        DaemonEvent::Scan(event)
    }
}

/// Sending half handed to producers.
pub type EventSender = mpsc::Sender<DaemonEvent>;

/// Receiving half owned by the dispatcher.
pub type EventReceiver = mpsc::Receiver<DaemonEvent>;

/// Create the event channel.
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}

/// Registry of running hardware event producers.
#[derive(Debug, Clone)]
pub struct ProducerSet {
    live: Arc<AtomicUsize>,
    sender: EventSender,
}

impl ProducerSet {
    /// Create an empty set sending into `sender`.
    #[must_use]
    pub fn new(sender: EventSender) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            sender,
        }
    }

    /// Register a producer. It counts as live until the returned handle is
    /// dropped, including by a panic unwinding its thread.
    #[must_use]
    pub fn register(&self, name: &'static str) -> Producer {
        self.live.fetch_add(1, Ordering::SeqCst);
        Producer {
            name,
            live: Arc::clone(&self.live),
            sender: self.sender.clone(),
        }
    }

    /// Number of producers still running.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Sending handle owned by one producer thread.
#[derive(Debug)]
pub struct Producer {
    name: &'static str,
    live: Arc<AtomicUsize>,
    sender: EventSender,
}

impl Producer {
    /// Producer name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Send `event`; `false` once the dispatcher is gone.
    pub fn send(&self, event: impl Into<DaemonEvent>) -> bool {
        self.sender.send(event.into()).is_ok()
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        log::debug!("Event producer {} stopped", self.name);
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.sender.send(DaemonEvent::SourcesClosed);
        }
    }
}
