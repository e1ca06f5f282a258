//! Error types for the download module.
//!
//! This module defines structured errors for single transfer attempts,
//! providing context-rich error messages for the engine's retry decisions
//! and for the log trail left behind by abandoned jobs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during a single transfer attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The origin answered with a status other than 200 or 206.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an unexpected status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while staging or finalizing a download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The staging file accepted fewer bytes than were handed to it.
    #[error("short write to {path}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Staging file path.
        path: PathBuf,
        /// Bytes handed to the writer.
        expected: usize,
        /// Bytes the writer reported as written.
        written: usize,
    },

    /// The response body ended before the advertised length was received.
    #[error("incomplete body from {url}: received {received} of {expected} bytes")]
    Incomplete {
        /// The URL whose body was cut short.
        url: String,
        /// Bytes advertised by Content-Length.
        expected: u64,
        /// Bytes actually streamed.
        received: u64,
    },

    /// A partial response did not start where the staging file ends.
    #[error("range mismatch from {url}: expected bytes {expected}-, got {received}")]
    RangeMismatch {
        /// The URL that answered with the wrong range.
        url: String,
        /// Offset requested (size of the staging file).
        expected: u64,
        /// `Content-Range` header as received, or `none`.
        received: String,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The transfer observed a shutdown request.
    #[error("download of {url} cancelled")]
    Cancelled {
        /// The URL whose transfer was interrupted.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a short-write error.
    pub fn short_write(path: impl Into<PathBuf>, expected: usize, written: usize) -> Self {
        Self::ShortWrite {
            path: path.into(),
            expected,
            written,
        }
    }

    /// Creates an incomplete-body error.
    pub fn incomplete(url: impl Into<String>, expected: u64, received: u64) -> Self {
        Self::Incomplete {
            url: url.into(),
            expected,
            received,
        }
    }

    /// Creates a range-mismatch error.
    pub fn range_mismatch(
        url: impl Into<String>,
        expected: u64,
        received: impl Into<String>,
    ) -> Self {
        Self::RangeMismatch {
            url: url.into(),
            expected,
            received: received.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Converts a reqwest error into a timeout or network error.
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }
}

/// Returned when a blocking acquisition is abandoned because shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled while waiting for {resource}")]
pub struct Cancelled {
    /// What the caller was waiting for ("rate limit token", "download slot").
    pub resource: &'static str,
}
