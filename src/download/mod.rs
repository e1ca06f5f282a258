//! Bounded, rate-limited, resumable download pipeline.
//!
//! This module provides the pieces the harvester uses to move remote files
//! onto disk:
//!
//! - [`RateLimiter`] - token bucket shared by every job
//! - [`ConcurrencyGate`] - bounds the number of in-flight jobs
//! - [`ResumableTransfer`] - one HTTP attempt resuming from a staging file
//! - [`DownloadEngine`] - submit/wait/stop over background jobs with retries
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use boardsync_core::download::{
//!     DEFAULT_RATE_BURST, DEFAULT_RATE_INTERVAL, DownloadEngine, DownloadJob, RateLimiter,
//!     ResumableTransfer, RetryPolicy,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(
//!     5,
//!     RetryPolicy::default(),
//!     Arc::new(RateLimiter::new(DEFAULT_RATE_INTERVAL, DEFAULT_RATE_BURST)),
//!     Arc::new(ResumableTransfer::new(reqwest::Client::new())),
//!     &CancellationToken::new(),
//! )?;
//! engine
//!     .submit(DownloadJob::new("https://example.com/b/src/1/2.png", "./b/1/abc_2.png"))
//!     .await?;
//! engine.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod engine;
mod error;
mod gate;
pub mod rate_limiter;
mod retry;
mod transfer;

pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CONCURRENCY, DEFAULT_RATE_BURST, DEFAULT_RATE_INTERVAL,
    READ_TIMEOUT_SECS, STAGING_SUFFIX,
};
pub use engine::{
    DownloadEngine, DownloadJob, DownloadStats, EngineError, JobOutcome, StatsSnapshot,
    staging_path_for,
};
pub use error::{Cancelled, DownloadError};
pub use gate::{ConcurrencyGate, GatePermit};
pub use rate_limiter::RateLimiter;
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use transfer::{Fetcher, ResumableTransfer, TransferOutcome};
