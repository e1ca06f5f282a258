//! Boardsync Core Library
//!
//! This library watches imageboard boards for threads of interest and
//! mirrors their media files to disk, skipping files already downloaded
//! and threads without new activity.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Rate-limited, bounded, resumable download engine
//! - [`dedup`] - Fingerprint index rebuilt from the destination tree
//! - [`cursor`] - Persisted per-thread activity counters
//! - [`source`] - Catalog and thread API client
//! - [`selector`] - Thread filtering against text predicates and the cursor
//! - [`acceptance`] - Per-file acceptance policy and file naming
//! - [`config`] - JSON configuration loading and validation
//! - [`harvest`] - Board pass and polling cycle orchestration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acceptance;
pub mod config;
pub mod cursor;
pub mod dedup;
pub mod download;
pub mod harvest;
pub mod selector;
pub mod source;
mod user_agent;

// Re-export commonly used types
pub use config::{AppConfig, BoardConfig, ConfigError};
pub use cursor::{CrawlCursor, CursorError};
pub use dedup::{FingerprintSet, FingerprintStore};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DownloadEngine, DownloadError, DownloadJob,
    DownloadStats, EngineError, FailureType, Fetcher, RateLimiter, ResumableTransfer,
    RetryDecision, RetryPolicy, StatsSnapshot, classify_error,
};
pub use harvest::{HarvestError, Harvester};
pub use selector::ThreadSelector;
pub use source::{BoardSource, SourceClient, SourceError};
