//! Error types for the board source client.

use thiserror::Error;

/// Errors that can occur while talking to the board source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The base URL could not be parsed.
    #[error("invalid base URL {url}")]
    InvalidBaseUrl {
        /// The rejected URL.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// Request failed before a response arrived.
    #[error("request to {url} failed: {source}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The source answered with something other than 200.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The response body is not the expected JSON.
    #[error("unexpected JSON from {url}: {source}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl SourceError {
    /// Creates a network error.
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

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }
}
