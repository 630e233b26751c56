//! Signal event source.
//!
//! `SIGUSR1` is a scan-button press and `SIGUSR2` a page load. The listener
//! thread blocks in `signal-hook` until a signal arrives. Signals of the same
//! kind that arrive before the previous one is read are coalesced.

use std::thread::{self, JoinHandle};

use signal_hook::consts::{SIGUSR1, SIGUSR2};
use signal_hook::iterator::{Handle, Signals};

use super::{Producer, ScanEvent};

/// Map a signal number to the event it stands for.
#[must_use]
pub fn event_for_signal(signal: i32) -> Option<ScanEvent> {
    match signal {
        SIGUSR1 => Some(ScanEvent::ManualTrigger),
        SIGUSR2 => Some(ScanEvent::PageFeed),
        _ => None,
    }
}

/// Running signal listener.
#[derive(Debug)]
pub struct SignalListener {
    handle: Handle,
    thread: JoinHandle<()>,
}

impl SignalListener {
    /// Stop listening and wait for the thread to finish.
    pub fn stop(self) {
        self.handle.close();
        if self.thread.join().is_err() {
            log::warn!("Signal listener thread panicked");
        }
    }
}

/// Register for `SIGUSR1`/`SIGUSR2` and forward them as events.
///
/// # Errors
///
/// Returns an I/O error if the signals cannot be registered or the thread
/// cannot be spawned.
pub fn spawn_signal_listener(producer: Producer) -> std::io::Result<SignalListener> {
    let mut signals = Signals::new([SIGUSR1, SIGUSR2])?;
    let handle = signals.handle();

    let thread = thread::Builder::new()
        .name("event-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                let Some(event) = event_for_signal(signal) else {
                    continue;
                };
                log::debug!("Signal {}: {}", signal, event);
                if !producer.send(event) {
                    break;
                }
            }
        })?;

    log::info!("Listening for SIGUSR1 (scan button) and SIGUSR2 (page loaded)");
    Ok(SignalListener { handle, thread })
}
