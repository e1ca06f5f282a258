//! Download engine for concurrent, resumable, cancellable file downloads.
//!
//! This module provides the [`DownloadEngine`] which coordinates background
//! downloads using a bounded [`ConcurrencyGate`], a shared token-bucket
//! [`RateLimiter`], and a [`Fetcher`] performing single resumable attempts,
//! with automatic retry on transient failures using exponential backoff.
//!
//! # Overview
//!
//! Callers hand jobs to [`DownloadEngine::submit`], which only waits for a
//! free slot before dispatching the job to a tracked Tokio task. Outcomes
//! are logged and counted in [`DownloadStats`]; they never flow back to the
//! caller. [`DownloadEngine::wait`] drains all dispatched jobs and
//! [`DownloadEngine::stop`] cancels them first.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use boardsync_core::download::{
//!     DownloadEngine, DownloadJob, RateLimiter, ResumableTransfer, RetryPolicy,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let shutdown = CancellationToken::new();
//! let engine = DownloadEngine::new(
//!     5,
//!     RetryPolicy::default(),
//!     Arc::new(RateLimiter::new(Duration::from_millis(200), 10)),
//!     Arc::new(ResumableTransfer::new(reqwest::Client::new())),
//!     &shutdown,
//! )?;
//! engine
//!     .submit(DownloadJob::new(
//!         "https://example.com/b/src/100/1.jpg",
//!         PathBuf::from("./b/100/0123_1.jpg"),
//!     ))
//!     .await?;
//! engine.wait().await;
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::constants::STAGING_SUFFIX;
use super::gate::ConcurrencyGate;
use super::rate_limiter::RateLimiter;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::transfer::{Fetcher, TransferOutcome, remove_staging};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The engine no longer admits jobs because shutdown was requested.
    #[error("download engine is shutting down")]
    ShuttingDown,
}

/// One file to fetch: where it comes from and where it must end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Absolute URL of the remote file.
    pub url: String,
    /// Final destination path on disk.
    pub destination: PathBuf,
}

impl DownloadJob {
    /// Creates a job.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
        }
    }

    /// Path of the in-progress staging file (`destination + ".tmp"`).
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        staging_path_for(&self.destination)
    }
}

/// Returns `destination` with the staging suffix appended.
#[must_use]
pub fn staging_path_for(destination: &Path) -> PathBuf {
    let mut staging = OsString::from(destination.as_os_str());
    staging.push(STAGING_SUFFIX);
    PathBuf::from(staging)
}

/// How a dispatched job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// File renamed into place.
    Completed,
    /// Origin reported the content as gone; abandoned without retrying.
    Ignored,
    /// Shutdown interrupted the job.
    Cancelled,
    /// Retries exhausted or the file could not be finalized.
    Failed,
}

/// Counters describing everything the engine has processed so far.
///
/// Uses atomic counters for thread-safe updates from concurrent download tasks.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    ignored: AtomicUsize,
    cancelled: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    attempts: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of successfully completed downloads.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs abandoned because the content was gone.
    #[must_use]
    pub fn ignored(&self) -> usize {
        self.ignored.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs interrupted by shutdown.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the number of failed downloads.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of retries scheduled.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of transfer attempts started.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs that reached a terminal state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.ignored() + self.cancelled() + self.failed()
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            completed: self.completed(),
            ignored: self.ignored(),
            cancelled: self.cancelled(),
            failed: self.failed(),
            retried: self.retried(),
            attempts: self.attempts(),
        }
    }

    fn record(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.completed,
            JobOutcome::Ignored => &self.ignored,
            JobOutcome::Cancelled => &self.cancelled,
            JobOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Point-in-time copy of [`DownloadStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Files renamed into place.
    pub completed: usize,
    /// Jobs abandoned because the content was gone.
    pub ignored: usize,
    /// Jobs interrupted by shutdown.
    pub cancelled: usize,
    /// Jobs that exhausted retries or could not be finalized.
    pub failed: usize,
    /// Retries scheduled.
    pub retried: usize,
    /// Transfer attempts started.
    pub attempts: usize,
}

impl StatsSnapshot {
    /// Counts accumulated between `earlier` and `self`.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            completed: self.completed.saturating_sub(earlier.completed),
            ignored: self.ignored.saturating_sub(earlier.ignored),
            cancelled: self.cancelled.saturating_sub(earlier.cancelled),
            failed: self.failed.saturating_sub(earlier.failed),
            retried: self.retried.saturating_sub(earlier.retried),
            attempts: self.attempts.saturating_sub(earlier.attempts),
        }
    }
}

/// Download engine for background file downloads with retry support.
///
/// # Concurrency Model
///
/// - Each job runs in its own Tokio task registered with a [`TaskTracker`]
/// - A gate slot is acquired on the caller's path before the task is spawned
/// - Slots are released automatically when the task ends (RAII), even on panic
/// - One rate limiter token is taken per job before its first attempt
///
/// # Retry Behavior
///
/// - Transient errors (network, I/O, 5xx) are retried with exponential backoff
/// - 404/410 abandon the job immediately without alarm
/// - Cancellation abandons the job immediately and removes the staging file
/// - Exhausted retries remove the staging file and log the fault
#[derive(Debug)]
pub struct DownloadEngine {
    gate: ConcurrencyGate,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: Arc<DownloadStats>,
}

/// Everything a spawned job needs, cloned out of the engine.
struct JobContext {
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
    stats: Arc<DownloadStats>,
}

impl DownloadEngine {
    /// Creates a download engine.
    ///
    /// The engine cancels itself when `shutdown` is cancelled; [`stop`](Self::stop)
    /// cancels only the engine.
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Maximum number of in-flight downloads (1-100)
    /// * `retry_policy` - Policy for retrying failed attempts
    /// * `rate_limiter` - Token bucket shared by all jobs
    /// * `fetcher` - Performs single transfer attempts
    /// * `shutdown` - Process-wide cancellation signal
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(retry_policy, rate_limiter, fetcher, shutdown))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        rate_limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn Fetcher>,
        shutdown: &CancellationToken,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            rate_interval_ms = rate_limiter.interval().as_millis(),
            rate_burst = rate_limiter.burst(),
            rate_limit_disabled = rate_limiter.is_disabled(),
            "creating download engine"
        );

        Ok(Self {
            gate: ConcurrencyGate::new(concurrency),
            retry_policy,
            rate_limiter,
            fetcher,
            cancel: shutdown.child_token(),
            tracker: TaskTracker::new(),
            stats: Arc::new(DownloadStats::new()),
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.gate.capacity()
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the running counters.
    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Returns the number of dispatched jobs that have not finished yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Returns whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Dispatches a job for background execution.
    ///
    /// Blocks only while every gate slot is taken.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] if shutdown was requested before
    /// or while waiting for a slot. The job is not started in that case.
    #[instrument(skip(self, job), fields(url = %job.url))]
    pub async fn submit(&self, job: DownloadJob) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let permit = self
            .gate
            .acquire(&self.cancel)
            .await
            .map_err(|_| EngineError::ShuttingDown)?;

        let ctx = JobContext {
            retry_policy: self.retry_policy.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            fetcher: Arc::clone(&self.fetcher),
            cancel: self.cancel.clone(),
            stats: Arc::clone(&self.stats),
        };

        debug!(destination = %job.destination.display(), "dispatching download");
        self.tracker.spawn(async move {
            // Slot is returned when this block exits (RAII)
            let _permit = permit;
            let outcome = run_job(&ctx, &job).await;
            ctx.stats.record(outcome);
        });

        Ok(())
    }

    /// Waits until every dispatched job has finished, without cancelling.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancels all in-flight and future jobs, then waits for them to finish.
    pub async fn stop(&self) {
        info!(in_flight = self.tracker.len(), "stopping download engine");
        self.cancel.cancel();
        self.wait().await;
        info!("download engine stopped");
    }
}

/// Runs one job to a terminal outcome: rate limit, attempts, backoff, rename.
#[instrument(skip(ctx, job), fields(url = %job.url))]
async fn run_job(ctx: &JobContext, job: &DownloadJob) -> JobOutcome {
    if ctx.rate_limiter.acquire(&ctx.cancel).await.is_err() {
        debug!("cancelled while waiting for rate limit token");
        return JobOutcome::Cancelled;
    }

    let staging = job.staging_path();
    info!(destination = %job.destination.display(), "downloading");

    let mut attempt = 0u32;
    loop {
        attempt += 1;

        if ctx.cancel.is_cancelled() {
            return abandon_cancelled(job, &staging).await;
        }

        ctx.stats.increment_attempts();
        let error = match ctx.fetcher.fetch(&job.url, &staging, &ctx.cancel).await {
            Ok(outcome) => return finalize(job, &staging, outcome).await,
            Err(e) => e,
        };

        let failure_type = classify_error(&error);
        match failure_type {
            FailureType::Cancelled => return abandon_cancelled(job, &staging).await,
            FailureType::Ignorable => {
                info!(url = %job.url, error = %error, "content unavailable, abandoning download");
                remove_staging(&staging).await;
                return JobOutcome::Ignored;
            }
            FailureType::Transient | FailureType::Permanent => {}
        }

        match ctx.retry_policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                warn!(
                    url = %job.url,
                    attempt = next_attempt,
                    max_attempts = ctx.retry_policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying download"
                );
                ctx.stats.increment_retried();

                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => return abandon_cancelled(job, &staging).await,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                remove_staging(&staging).await;
                error!(
                    url = %job.url,
                    destination = %job.destination.display(),
                    attempts = attempt,
                    %reason,
                    error = %error,
                    "download failed"
                );
                return JobOutcome::Failed;
            }
        }
    }
}

async fn abandon_cancelled(job: &DownloadJob, staging: &Path) -> JobOutcome {
    remove_staging(staging).await;
    info!(url = %job.url, "download cancelled");
    JobOutcome::Cancelled
}

/// Moves a completed staging file into its final place.
async fn finalize(job: &DownloadJob, staging: &Path, outcome: TransferOutcome) -> JobOutcome {
    match tokio::fs::rename(staging, &job.destination).await {
        Ok(()) => {
            info!(
                path = %job.destination.display(),
                bytes = outcome.total_bytes(),
                resumed_from = outcome.resumed_from,
                "download completed"
            );
            JobOutcome::Completed
        }
        Err(e) => {
            remove_staging(staging).await;
            error!(
                url = %job.url,
                path = %job.destination.display(),
                error = %e,
                "failed to move staging file into place"
            );
            JobOutcome::Failed
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::download::DownloadError;

    /// Fetcher that writes a fixed body on success.
    #[derive(Debug)]
    struct StaticFetcher(&'static [u8]);

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(
            &self,
            _url: &str,
            staging: &Path,
            _cancel: &CancellationToken,
        ) -> Result<TransferOutcome, DownloadError> {
            tokio::fs::write(staging, self.0)
                .await
                .map_err(|e| DownloadError::io(staging, e))?;
            Ok(TransferOutcome {
                resumed_from: 0,
                bytes_written: self.0.len() as u64,
            })
        }
    }

    fn engine_with(fetcher: Arc<dyn Fetcher>, concurrency: usize) -> DownloadEngine {
        DownloadEngine::new(
            concurrency,
            RetryPolicy::new(3, Duration::from_millis(1), None),
            Arc::new(RateLimiter::disabled()),
            fetcher,
            &CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_engine_new_invalid_concurrency_zero() {
        let result = DownloadEngine::new(
            0,
            RetryPolicy::default(),
            Arc::new(RateLimiter::disabled()),
            Arc::new(StaticFetcher(b"")),
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidConcurrency { value: 0 })
        ));
    }

    #[test]
    fn test_engine_new_invalid_concurrency_too_high() {
        let result = DownloadEngine::new(
            101,
            RetryPolicy::default(),
            Arc::new(RateLimiter::disabled()),
            Arc::new(StaticFetcher(b"")),
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidConcurrency { value: 101 })
        ));
    }

    #[test]
    fn test_staging_path_appends_suffix() {
        let job = DownloadJob::new("http://x/a.jpg", "/data/b/100/abc_a.jpg");
        assert_eq!(
            job.staging_path(),
            PathBuf::from("/data/b/100/abc_a.jpg.tmp")
        );
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidConcurrency { value: 0 }.to_string();
        assert!(msg.contains("invalid concurrency"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_download_stats_record() {
        let stats = DownloadStats::new();
        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Ignored);
        stats.record(JobOutcome::Failed);
        stats.record(JobOutcome::Cancelled);

        assert_eq!(stats.completed(), 2);
        assert_eq!(stats.ignored(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.cancelled(), 1);
        assert_eq!(stats.total(), 5);
    }

    #[test]
    fn test_snapshot_since_counts_only_the_interval() {
        let stats = DownloadStats::new();
        stats.record(JobOutcome::Completed);
        stats.increment_attempts();
        let before = stats.snapshot();

        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Failed);
        stats.increment_retried();
        stats.increment_attempts();
        stats.increment_attempts();

        let interval = stats.snapshot().since(&before);
        assert_eq!(
            interval,
            StatsSnapshot {
                completed: 1,
                failed: 1,
                retried: 1,
                attempts: 2,
                ..StatsSnapshot::default()
            }
        );
    }

    #[tokio::test]
    async fn test_submit_and_wait_moves_file_into_place() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("abc_file.jpg");
        let engine = engine_with(Arc::new(StaticFetcher(b"jpeg bytes")), 2);

        engine
            .submit(DownloadJob::new("http://example.com/a.jpg", &destination))
            .await
            .unwrap();
        engine.wait().await;

        assert_eq!(std::fs::read(&destination).unwrap(), b"jpeg bytes");
        assert!(!staging_path_for(&destination).exists());
        assert_eq!(engine.stats().completed(), 1);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_can_be_called_every_cycle() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(Arc::new(StaticFetcher(b"x")), 1);

        for cycle in 0..3 {
            let destination = dir.path().join(format!("{cycle}.png"));
            engine
                .submit(DownloadJob::new("http://example.com/x.png", &destination))
                .await
                .unwrap();
            engine.wait().await;
            assert!(destination.exists());
        }
        assert_eq!(engine.stats().completed(), 3);
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_rejected() {
        let engine = engine_with(Arc::new(StaticFetcher(b"x")), 1);
        engine.stop().await;

        let result = engine
            .submit(DownloadJob::new("http://example.com/x.png", "/nonexistent/x.png"))
            .await;
        assert!(matches!(result, Err(EngineError::ShuttingDown)));
        assert!(engine.is_shutting_down());
    }

    #[tokio::test]
    async fn test_parent_shutdown_cancels_engine() {
        let shutdown = CancellationToken::new();
        let engine = DownloadEngine::new(
            1,
            RetryPolicy::default(),
            Arc::new(RateLimiter::disabled()),
            Arc::new(StaticFetcher(b"x")),
            &shutdown,
        )
        .unwrap();

        shutdown.cancel();
        assert!(engine.is_shutting_down());
    }

    #[tokio::test]
    async fn test_rename_failure_removes_staging() {
        let dir = TempDir::new().unwrap();
        // Destination is an existing non-empty directory, so the rename fails.
        let destination = dir.path().join("occupied");
        std::fs::create_dir(&destination).unwrap();
        std::fs::write(destination.join("keep"), b"x").unwrap();
        let engine = engine_with(Arc::new(StaticFetcher(b"data")), 1);

        engine
            .submit(DownloadJob::new("http://example.com/a.jpg", &destination))
            .await
            .unwrap();
        engine.wait().await;

        assert_eq!(engine.stats().failed(), 1);
        assert!(!staging_path_for(&destination).exists());
    }
}
