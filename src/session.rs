//! Scan session state.
//!
//! A [`ScanSession`] is one logical document: the pages captured between the
//! manual trigger that opened it and the manual trigger that finalizes it.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Prefix of every session directory name.
pub const SESSION_DIR_PREFIX: &str = "scan_session_";

/// How hardware events are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    /// Idle. A manual trigger opens a session and captures page 1.
    #[default]
    Manual,
    /// A session is open. Page-feed events capture pages; a manual trigger
    /// finalizes.
    AutoFeed,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Manual => write!(f, "MANUAL"),
            DeviceMode::AutoFeed => write!(f, "ADF"),
        }
    }
}

/// Pages captured for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    dir: PathBuf,
    page: u32,
    pages: Vec<PathBuf>,
}

impl ScanSession {
    /// Open a session in `dir` with the page counter at 1.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            page: 1,
            pages: Vec::new(),
        }
    }

    /// Open a session under `root`, named after `started` (second precision).
    ///
    /// If a directory with the same timestamp already exists, a numeric
    /// suffix keeps the new session separate.
    #[must_use]
    pub fn start_at(root: &Path, started: DateTime<Local>) -> Self {
        let base = format!(
            "{}{}",
            SESSION_DIR_PREFIX,
            started.format("%Y%m%d_%H%M%S")
        );
        let mut dir = root.join(&base);
        let mut suffix = 1;
        while dir.exists() {
            suffix += 1;
            dir = root.join(format!("{}_{}", base, suffix));
        }
        Self::new(dir)
    }

    /// Session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current page number.
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Advance the page counter and return the new page number.
    pub fn next_page(&mut self) -> u32 {
        self.page += 1;
        self.page
    }

    /// Record a successfully captured page.
    pub fn push_page(&mut self, path: PathBuf) {
        self.pages.push(path);
    }

    /// Captured pages in capture order.
    #[must_use]
    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    /// Whether no page was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
