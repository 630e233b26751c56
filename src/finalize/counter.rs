//! Durable document counter.
//!
//! The counter lives in the file system as a single empty marker file whose
//! name is the value, e.g. `41.ctr`. Advancing removes the old marker and
//! creates the new one. There is no locking: only one daemon instance may use
//! a counter directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Extension of counter marker files.
pub const COUNTER_EXTENSION: &str = "ctr";

/// Error type for counter store operations.
#[derive(Debug, Error)]
pub enum CounterError {
    /// I/O error on the counter directory or a marker.
    #[error("counter I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored value is already the largest representable one.
    #[error("counter in {dir} is exhausted at {value}")]
    Exhausted { dir: PathBuf, value: u64 },
}

/// Marker-file counter in a directory.
#[derive(Debug, Clone)]
pub struct CounterStore {
    dir: PathBuf,
}

impl CounterStore {
    /// Create a store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the marker.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the current value. No marker (or no directory) reads as 0.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Io`] if the directory cannot be listed.
    pub fn read(&self) -> Result<u64, CounterError> {
        let markers = self.markers()?;
        if markers.len() > 1 {
            log::warn!(
                "Found {} counter markers in {}, using the highest",
                markers.len(),
                self.dir.display()
            );
        }
        Ok(markers.iter().map(|(value, _)| *value).max().unwrap_or(0))
    }

    /// The value following the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Io`] if the directory cannot be listed, or
    /// [`CounterError::Exhausted`] if the stored value is `u64::MAX`.
    pub fn next_value(&self) -> Result<u64, CounterError> {
        let value = self.read()?;
        value.checked_add(1).ok_or_else(|| CounterError::Exhausted {
            dir: self.dir.clone(),
            value,
        })
    }

    /// Replace the stored value with `value`.
    ///
    /// All existing markers are removed first, then `<value>.ctr` is created.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Io`] if a marker cannot be removed or created.
    pub fn advance_to(&self, value: u64) -> Result<(), CounterError> {
        fs::create_dir_all(&self.dir).map_err(|source| CounterError::Io {
            path: self.dir.clone(),
            source,
        })?;

        for (_, path) in self.markers()? {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(CounterError::Io { path, source }),
            }
        }

        let marker = self.marker_path(value);
        fs::File::create(&marker).map_err(|source| CounterError::Io {
            path: marker.clone(),
            source,
        })?;
        log::debug!("Counter advanced to {}", value);
        Ok(())
    }

    fn marker_path(&self, value: u64) -> PathBuf {
        self.dir.join(format!("{}.{}", value, COUNTER_EXTENSION))
    }

    fn markers(&self) -> Result<Vec<(u64, PathBuf)>, CounterError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CounterError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut markers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CounterError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COUNTER_EXTENSION) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(value) => markers.push((value, path)),
                None => log::warn!("Ignoring malformed counter marker {}", path.display()),
            }
        }
        Ok(markers)
    }
}
