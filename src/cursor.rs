//! Persisted per-thread activity counters.
//!
//! The cursor maps `board_thread` keys to the last activity counter observed
//! for that thread. A thread is fetched again only when the remote counter
//! moves past the stored value. The whole map is read once at startup and
//! written back wholesale at the end of every cycle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default cursor file name.
pub const DEFAULT_CURSOR_PATH: &str = "lasthits.json";

/// Errors that can occur while loading or saving the cursor.
#[derive(Debug, Error)]
pub enum CursorError {
    /// Reading or writing the cursor file failed.
    #[error("cursor file {path}: {source}")]
    Io {
        /// Cursor file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The cursor file does not hold a JSON object of integer counters.
    #[error("malformed cursor file {path}: {source}")]
    Malformed {
        /// Cursor file path.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl CursorError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// In-memory crawl cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlCursor {
    entries: BTreeMap<String, i64>,
}

impl CrawlCursor {
    /// Creates an empty cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map key for a thread.
    #[must_use]
    pub fn key(board_id: &str, thread_num: &str) -> String {
        format!("{board_id}_{thread_num}")
    }

    /// Loads the cursor from `path`. A missing file yields an empty cursor.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Io`] if the file exists but cannot be read and
    /// [`CursorError::Malformed`] if it cannot be decoded.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, CursorError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no cursor file yet, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(CursorError::io(path, e)),
        };

        let entries: BTreeMap<String, i64> =
            serde_json::from_slice(&bytes).map_err(|source| CursorError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        info!(threads = entries.len(), "loaded crawl cursor");
        Ok(Self { entries })
    }

    /// Loads the cursor, falling back to an empty one on any fault.
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::load(path).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %e, "could not load crawl cursor, starting empty");
                Self::new()
            }
        }
    }

    /// Writes the cursor to `path` through a sibling temp file and a rename,
    /// so an interrupted save never leaves a truncated file behind.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Io`] if the temp file cannot be written or
    /// renamed.
    #[instrument(skip_all, fields(path = %path.display(), threads = self.entries.len()))]
    pub async fn save(&self, path: &Path) -> Result<(), CursorError> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let bytes = serde_json::to_vec(&self.entries).map_err(|e| {
            CursorError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| CursorError::io(&temp, e))?;
        tokio::fs::rename(&temp, path)
            .await
            .map_err(|e| CursorError::io(path, e))?;

        debug!("saved crawl cursor");
        Ok(())
    }

    /// Returns the stored counter for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<i64> {
        self.entries.get(key).copied()
    }

    /// Returns whether a thread with counter `current` has new activity.
    ///
    /// True when nothing is stored for `key` or `current` is strictly greater
    /// than the stored value.
    #[must_use]
    pub fn should_fetch(&self, key: &str, current: i64) -> bool {
        self.get(key).is_none_or(|stored| current > stored)
    }

    /// Stores `counter` for `key`.
    pub fn record(&mut self, key: String, counter: i64) {
        self.entries.insert(key, counter);
    }

    /// Number of tracked threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no thread is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, i64)> for CrawlCursor {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
