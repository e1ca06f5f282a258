//! Fingerprint index of files already present in a board's directory.
//!
//! Downloaded files are named `fingerprint_displayName`, where the
//! fingerprint is the 32-character content hash reported by the source.
//! Scanning the destination tree and taking each name's 32-character prefix
//! therefore recovers the set of files already on disk, without a separate
//! database.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::download::STAGING_SUFFIX;

/// Length of a file fingerprint (an MD5 hex digest).
pub const FINGERPRINT_LEN: usize = 32;

/// Set of fingerprints consulted before submitting a download.
///
/// The orchestration path owns the store exclusively, so implementations
/// need no internal locking.
pub trait FingerprintStore: Send + Sync {
    /// Returns whether `fingerprint` is already known.
    fn contains(&self, fingerprint: &str) -> bool;

    /// Records `fingerprint`. Returns `false` if it was already present.
    fn insert(&mut self, fingerprint: &str) -> bool;

    /// Number of known fingerprints.
    fn len(&self) -> usize;

    /// Returns whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory fingerprint set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintSet {
    fingerprints: HashSet<String>,
}

impl FingerprintSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the set from every completed file under `dir`.
    ///
    /// Missing or unreadable directories yield an empty set; unreadable
    /// entries are logged and skipped. Staging files are never counted.
    #[must_use]
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn scan(dir: &Path) -> Self {
        let mut set = Self::new();

        if !dir.is_dir() {
            debug!("directory does not exist yet, nothing downloaded");
            return set;
        }

        for entry in WalkDir::new(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during fingerprint scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if let Some(fingerprint) = fingerprint_of(name) {
                set.fingerprints.insert(fingerprint.to_owned());
            }
        }

        debug!(fingerprints = set.len(), "fingerprint scan complete");
        set
    }
}

impl FingerprintStore for FingerprintSet {
    fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    fn insert(&mut self, fingerprint: &str) -> bool {
        self.fingerprints.insert(fingerprint.to_owned())
    }

    fn len(&self) -> usize {
        self.fingerprints.len()
    }
}

impl<S: Into<String>> FromIterator<S> for FingerprintSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            fingerprints: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Extracts the fingerprint prefix of a completed file name.
///
/// Returns `None` for names shorter than [`FINGERPRINT_LEN`] and for
/// staging files.
#[must_use]
pub fn fingerprint_of(file_name: &str) -> Option<&str> {
    if file_name.ends_with(STAGING_SUFFIX) {
        return None;
    }
    file_name.get(..FINGERPRINT_LEN)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    const MD5_A: &str = "0123456789abcdef0123456789abcdef";
    const MD5_B: &str = "fedcba9876543210fedcba9876543210";

    #[test]
    fn test_fingerprint_of_takes_prefix() {
        assert_eq!(fingerprint_of(&format!("{MD5_A}_cat.jpg")), Some(MD5_A));
        assert_eq!(fingerprint_of(MD5_A), Some(MD5_A));
    }

    #[test]
    fn test_fingerprint_of_short_name_is_none() {
        assert_eq!(fingerprint_of("short.jpg"), None);
    }

    #[test]
    fn test_fingerprint_of_staging_file_is_none() {
        assert_eq!(fingerprint_of(&format!("{MD5_A}_cat.jpg.tmp")), None);
    }

    #[test]
    fn test_scan_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let set = FingerprintSet::scan(&dir.path().join("never-created"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_scan_collects_nested_files_and_skips_staging() {
        let dir = TempDir::new().unwrap();
        let thread_dir = dir.path().join("100");
        fs::create_dir_all(&thread_dir).unwrap();
        fs::write(thread_dir.join(format!("{MD5_A}_a.jpg")), b"a").unwrap();
        fs::write(thread_dir.join(format!("{MD5_B}_b.webm.tmp")), b"partial").unwrap();
        fs::write(thread_dir.join("notes.txt"), b"x").unwrap();

        let set = FingerprintSet::scan(dir.path());

        assert_eq!(set.len(), 1);
        assert!(set.contains(MD5_A));
        assert!(!set.contains(MD5_B));
    }

    #[test]
    fn test_insert_reports_duplicates() {
        let mut set = FingerprintSet::new();
        assert!(set.insert(MD5_A));
        assert!(!set.insert(MD5_A));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_from_iterator() {
        let set: FingerprintSet = [MD5_A, MD5_B].into_iter().collect();
        assert!(set.contains(MD5_B));
        assert_eq!(set.len(), 2);
    }
}
