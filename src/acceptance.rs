//! Per-file acceptance policy for fetched threads.
//!
//! Every file referenced by a fetched thread goes through [`AcceptancePolicy`]:
//! known fingerprints, unrecognized extensions and decorative URLs are
//! skipped, everything else gets an on-disk name and is handed to the
//! download engine. The fingerprint is recorded as soon as the job is
//! submitted, so a file appearing twice in one pass is fetched once.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::dedup::{FINGERPRINT_LEN, FingerprintStore};
use crate::download::{DownloadEngine, DownloadJob, EngineError};
use crate::source::PostFile;

/// Display names longer than this are cut down before composing a file name.
pub const MAX_DISPLAY_NAME_LEN: usize = 128;

/// Number of trailing characters kept from an over-long display name.
pub const TRUNCATED_DISPLAY_NAME_LEN: usize = 32;

/// Characters stripped from file names.
const INVALID_CHARS: [char; 7] = [':', '*', '?', '<', '>', '|', '"'];

/// What happened to one referenced file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Submitted for download under `destination`.
    Accepted {
        /// Final path of the file.
        destination: PathBuf,
    },
    /// Fingerprint already on disk or already submitted.
    Duplicate,
    /// Path has no extension at all.
    NoExtension,
    /// Extension not in the board's allow-list.
    UnknownExtension {
        /// The extension, without the dot.
        extension: String,
    },
    /// URL matched a skip pattern.
    SkippedPattern,
    /// The file carries no usable fingerprint.
    MissingFingerprint,
}

/// Append-only log of extensions seen but not allowed, one per line.
#[derive(Debug, Clone)]
pub struct UnknownExtensionLog {
    path: PathBuf,
}

impl UnknownExtensionLog {
    /// Creates a log writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `extension` as one line. Failures are logged, not returned.
    pub async fn record(&self, extension: &str) {
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(format!("{extension}\n").as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %self.path.display(), extension, error = %e, "failed to record unknown extension");
        }
    }
}

/// Per-board file acceptance rules.
#[derive(Debug, Clone)]
pub struct AcceptancePolicy {
    extensions: Vec<String>,
    skip_patterns: Vec<String>,
    unknown_log: Option<UnknownExtensionLog>,
}

impl AcceptancePolicy {
    /// Creates a policy allowing `extensions` (case-insensitive, with or
    /// without a leading dot) and skipping URLs containing any of
    /// `skip_patterns`.
    pub fn new<E, P>(extensions: E, skip_patterns: P) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            skip_patterns: skip_patterns.into_iter().map(Into::into).collect(),
            unknown_log: None,
        }
    }

    /// Records rejected extensions in `log`.
    #[must_use]
    pub fn with_unknown_log(mut self, log: UnknownExtensionLog) -> Self {
        self.unknown_log = Some(log);
        self
    }

    /// Returns whether `extension` is on the allow-list.
    #[must_use]
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }

    /// Decides what to do with `file` without side effects.
    ///
    /// Checks run in order: fingerprint known, extension allowed, URL skip
    /// patterns.
    #[must_use]
    pub fn evaluate(
        &self,
        file: &PostFile,
        url: &str,
        thread_dir: &Path,
        store: &dyn FingerprintStore,
    ) -> Verdict {
        let Some(fingerprint) = file.md5.get(..FINGERPRINT_LEN) else {
            return Verdict::MissingFingerprint;
        };
        if store.contains(fingerprint) {
            return Verdict::Duplicate;
        }

        match file_extension(&file.path) {
            None => return Verdict::NoExtension,
            Some(ext) if !self.allows_extension(ext) => {
                return Verdict::UnknownExtension {
                    extension: ext.to_string(),
                };
            }
            Some(_) => {}
        }

        if self.skip_patterns.iter().any(|p| url.contains(p.as_str())) {
            return Verdict::SkippedPattern;
        }

        Verdict::Accepted {
            destination: thread_dir.join(compose_file_name(&file.md5, &file.fullname, &file.path)),
        }
    }

    /// Evaluates `file` and carries out the verdict: submits accepted files
    /// to `engine` and records their fingerprint in `store` right away, and
    /// appends unknown extensions to the log.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] once the engine stops admitting
    /// jobs; the fingerprint is not recorded in that case.
    #[instrument(skip_all, fields(url = %url, fingerprint = %file.md5))]
    pub async fn admit(
        &self,
        file: &PostFile,
        url: &str,
        thread_dir: &Path,
        store: &mut dyn FingerprintStore,
        engine: &DownloadEngine,
    ) -> Result<Verdict, EngineError> {
        let verdict = self.evaluate(file, url, thread_dir, &*store);
        match &verdict {
            Verdict::Accepted { destination } => {
                engine
                    .submit(DownloadJob::new(url, destination.clone()))
                    .await?;
                store.insert(&file.md5[..FINGERPRINT_LEN]);
            }
            Verdict::Duplicate => debug!("already downloaded"),
            Verdict::NoExtension => debug!(path = %file.path, "file path has no extension"),
            Verdict::UnknownExtension { extension } => {
                info!(path = %file.path, extension, "unknown file format");
                if let Some(log) = &self.unknown_log {
                    log.record(extension).await;
                }
            }
            Verdict::SkippedPattern => debug!("url matches a skip pattern"),
            Verdict::MissingFingerprint => warn!(path = %file.path, "file has no usable fingerprint"),
        }
        Ok(verdict)
    }
}

/// Returns the extension of the last segment of `path`, without the dot.
#[must_use]
pub fn file_extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}

/// Strips characters that are invalid in file names on common platforms.
/// Path separators are replaced so a name can never leave its directory.
#[must_use]
pub fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| !INVALID_CHARS.contains(c) && *c != '\0')
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// Builds `fingerprint_displayName[.ext]`.
///
/// Display names over [`MAX_DISPLAY_NAME_LEN`] characters keep only their
/// last [`TRUNCATED_DISPLAY_NAME_LEN`] characters. A display name without a
/// dot gets the extension of `path` appended.
#[must_use]
pub fn compose_file_name(fingerprint: &str, display_name: &str, path: &str) -> String {
    let char_count = display_name.chars().count();
    let display_name: String = if char_count > MAX_DISPLAY_NAME_LEN {
        display_name
            .chars()
            .skip(char_count - TRUNCATED_DISPLAY_NAME_LEN)
            .collect()
    } else {
        display_name.to_string()
    };

    let name = if display_name.contains('.') {
        format!("{fingerprint}_{display_name}")
    } else {
        match file_extension(path) {
            Some(ext) => format!("{fingerprint}_{display_name}.{ext}"),
            None => format!("{fingerprint}_{display_name}"),
        }
    };
    sanitize(&name)
}
