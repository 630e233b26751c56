//! Flag-file event source.
//!
//! The button daemon's action scripts `touch` a file per event. Each poll
//! round consumes the scan-button file first, then the page-loaded file; a
//! file that was touched several times between two rounds yields one event.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Producer, ScanEvent};

/// Locations of the two flag files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFiles {
    /// Touched when the scan button is pressed.
    pub manual: PathBuf,
    /// Touched when a page is loaded into the feeder.
    pub page_feed: PathBuf,
}

impl Default for TriggerFiles {
    fn default() -> Self {
        Self {
            manual: PathBuf::from("/tmp/scan"),
            page_feed: PathBuf::from("/tmp/page-loaded"),
        }
    }
}

impl TriggerFiles {
    fn in_order(&self) -> [(&Path, ScanEvent); 2] {
        [
            (self.manual.as_path(), ScanEvent::ManualTrigger),
            (self.page_feed.as_path(), ScanEvent::PageFeed),
        ]
    }

    /// Consume whichever flag files exist, in fixed order.
    #[must_use]
    pub fn take_pending(&self) -> Vec<ScanEvent> {
        self.in_order()
            .into_iter()
            .filter(|(path, _)| consume(path))
            .map(|(_, event)| event)
            .collect()
    }

    /// Remove flag files left over from before startup.
    pub fn clear_stale(&self) {
        for (path, event) in self.in_order() {
            if consume(path) {
                log::info!("Discarded stale {} trigger {}", event, path.display());
            }
        }
    }
}

/// Remove `path`; `true` if it existed.
fn consume(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("Cannot consume trigger {}: {}", path.display(), e);
            false
        }
    }
}

/// Start a thread polling `files` every `interval`.
///
/// The thread exits when `shutdown` is set or the receiver is dropped;
/// `producer` is released when it does.
///
/// # Errors
///
/// Returns an I/O error if the thread cannot be spawned.
pub fn spawn_trigger_watcher(
    files: TriggerFiles,
    interval: Duration,
    producer: Producer,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    log::info!(
        "Watching {} and {} every {}ms",
        files.manual.display(),
        files.page_feed.display(),
        interval.as_millis()
    );
    thread::Builder::new()
        .name("trigger-files".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                for event in files.take_pending() {
                    log::debug!("Trigger file: {}", event);
                    if !producer.send(event) {
                        return;
                    }
                }
                thread::sleep(interval);
            }
        })
}
