//! JSON configuration: boards to watch, filters, and download tuning.
//!
//! Per-board lists left empty inherit the corresponding `defaults` list once
//! the file is loaded, so the rest of the crate only ever sees
//! [`BoardConfig`] values with their effective settings. Thread filters fall
//! back one step further, to the top-level `tags` and `ignored_tags`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cursor::DEFAULT_CURSOR_PATH;
use crate::download::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_BURST,
    DEFAULT_RATE_INTERVAL, READ_TIMEOUT_SECS,
};

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default source base URL.
pub const DEFAULT_BASE_URL: &str = "https://2ch.su";

/// Default pause between cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 180;

/// Default unknown-extension log file name.
pub const DEFAULT_UNKNOWN_EXTENSIONS_PATH: &str = "unknown.txt";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its accepted range.
    #[error("Invalid config value for `{field}`: {value}. Expected {expected}")]
    InvalidValue {
        /// Offending key.
        field: String,
        /// Offending value, rendered.
        value: String,
        /// Accepted range or shape.
        expected: &'static str,
    },

    /// No boards are configured.
    #[error("config lists no boards to watch")]
    NoBoards,
}

impl ConfigError {
    fn invalid(field: impl Into<String>, value: impl ToString, expected: &'static str) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            expected,
        }
    }
}

/// Filter lists applied to boards that leave their own lists empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterDefaults {
    /// Substrings marking a thread as interesting.
    pub thread_subj_substrings: Vec<String>,
    /// Allowed file extensions.
    pub file_extensions: Vec<String>,
    /// Substrings excluding a thread.
    pub ignored_substrings: Vec<String>,
}

/// One board to watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Board identifier used in URLs.
    pub board: String,
    /// Destination directory for this board's files.
    pub dir_name: PathBuf,
    /// Substrings marking a thread as interesting.
    pub thread_subj_substrings: Vec<String>,
    /// Allowed file extensions.
    pub file_extensions: Vec<String>,
    /// Substrings excluding a thread.
    pub ignored_substrings: Vec<String>,
}

impl BoardConfig {
    /// Fills empty lists from `defaults`, then the thread filters from the
    /// global `tags` / `ignored_tags`.
    fn inherit(&mut self, defaults: &FilterDefaults, tags: &[String], ignored_tags: &[String]) {
        fill_first(
            &mut self.thread_subj_substrings,
            [defaults.thread_subj_substrings.as_slice(), tags],
        );
        fill_first(&mut self.file_extensions, [defaults.file_extensions.as_slice()]);
        fill_first(
            &mut self.ignored_substrings,
            [defaults.ignored_substrings.as_slice(), ignored_tags],
        );
    }
}

/// Replaces an empty `list` with the first non-empty fallback.
fn fill_first<const N: usize>(list: &mut Vec<String>, fallbacks: [&[String]; N]) {
    if !list.is_empty() {
        return;
    }
    if let Some(fallback) = fallbacks.into_iter().find(|f| !f.is_empty()) {
        *list = fallback.to_vec();
    }
}

/// Download tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Maximum in-flight downloads.
    pub concurrency: usize,
    /// Attempts per file, including the first.
    pub max_attempts: u32,
    /// Milliseconds per rate limiter token; 0 disables rate limiting.
    pub rate_interval_ms: u64,
    /// Rate limiter bucket capacity.
    pub rate_burst: u32,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_interval_ms: u64::try_from(DEFAULT_RATE_INTERVAL.as_millis()).unwrap_or(200),
            rate_burst: DEFAULT_RATE_BURST,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl DownloadSettings {
    /// Interval between rate limiter tokens.
    #[must_use]
    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }

    /// Connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Source base URL.
    pub base_url: String,
    /// Authentication cookie value; empty for anonymous access.
    pub usercode_auth: String,
    /// Lists inherited by boards that leave theirs empty.
    pub defaults: FilterDefaults,
    /// Thread substrings for boards with no list of their own and no default.
    pub tags: Vec<String>,
    /// Exclusion substrings for boards with no list of their own and no
    /// default.
    pub ignored_tags: Vec<String>,
    /// Boards to watch, processed in order.
    pub boards: Vec<BoardConfig>,
    /// Download tuning.
    pub download: DownloadSettings,
    /// Pause between cycles, in seconds.
    pub poll_interval_secs: u64,
    /// Crawl cursor file.
    pub cursor_path: PathBuf,
    /// Unknown-extension log file.
    pub unknown_extensions_path: PathBuf,
    /// URL substrings that are never downloaded.
    pub skip_url_patterns: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            usercode_auth: String::new(),
            defaults: FilterDefaults::default(),
            tags: Vec::new(),
            ignored_tags: Vec::new(),
            boards: Vec::new(),
            download: DownloadSettings::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            cursor_path: PathBuf::from(DEFAULT_CURSOR_PATH),
            unknown_extensions_path: PathBuf::from(DEFAULT_UNKNOWN_EXTENSIONS_PATH),
            skip_url_patterns: vec!["stickers".to_string()],
        }
    }
}

impl AppConfig {
    /// Reads, defaults and validates the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable, malformed or holds
    /// out-of-range values.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(boards = config.boards.len(), "loaded configuration");
        Ok(config)
    }

    /// Parses, defaults and validates configuration JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the JSON is malformed or holds out-of-range
    /// values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fills empty per-board lists from `defaults`, then from the global tag
    /// lists.
    pub fn apply_defaults(&mut self) {
        for board in &mut self.boards {
            board.inherit(&self.defaults, &self.tags, &self.ignored_tags);
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.boards.is_empty() {
            return Err(ConfigError::NoBoards);
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::invalid("base_url", &self.base_url, "an absolute URL"));
        }
        for (index, board) in self.boards.iter().enumerate() {
            if board.board.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("boards[{index}].board"),
                    "\"\"",
                    "a non-empty board id",
                ));
            }
            if board.dir_name.as_os_str().is_empty() {
                return Err(ConfigError::invalid(
                    format!("boards[{index}].dir_name"),
                    "\"\"",
                    "a non-empty directory",
                ));
            }
        }

        let download = &self.download;
        if !(1..=100).contains(&download.concurrency) {
            return Err(ConfigError::invalid(
                "download.concurrency",
                download.concurrency,
                "range: 1..=100",
            ));
        }
        if !(1..=20).contains(&download.max_attempts) {
            return Err(ConfigError::invalid(
                "download.max_attempts",
                download.max_attempts,
                "range: 1..=20",
            ));
        }
        if !(1..=100).contains(&download.rate_burst) {
            return Err(ConfigError::invalid(
                "download.rate_burst",
                download.rate_burst,
                "range: 1..=100",
            ));
        }
        if download.rate_interval_ms > 60_000 {
            return Err(ConfigError::invalid(
                "download.rate_interval_ms",
                download.rate_interval_ms,
                "range: 0..=60000",
            ));
        }
        validate_timeout_secs("download.connect_timeout_secs", download.connect_timeout_secs)?;
        validate_timeout_secs("download.read_timeout_secs", download.read_timeout_secs)?;

        Ok(())
    }

    /// Pause between cycles.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Authentication cookie value, if configured.
    #[must_use]
    pub fn usercode_auth(&self) -> Option<&str> {
        Some(self.usercode_auth.as_str()).filter(|code| !code.is_empty())
    }
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(field, value, "range: 1..=3600"));
    }
    Ok(())
}
