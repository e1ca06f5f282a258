//! Retry logic with exponential backoff for transfer failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying transfer errors and determining retry behavior.
//!
//! # Overview
//!
//! When a transfer attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Network/I/O faults and server errors; retried with backoff
//! - [`FailureType::Ignorable`] - Removed content (404, 410); abandoned quietly
//! - [`FailureType::Permanent`] - Malformed requests that no retry can fix
//! - [`FailureType::Cancelled`] - Shutdown was requested; abandoned immediately
//!
//! The [`RetryPolicy`] then determines whether to retry based on failure type
//! and attempt count, using `base_delay * 2^(attempt-1)` delays.
//!
//! # Example
//!
//! ```
//! use boardsync_core::download::{
//!     DownloadError, RetryPolicy, FailureType, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/src/1/2.webm", 503);
//! let failure_type = classify_error(&error);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per job (initial attempt included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Classification of transfer failure types.
///
/// Used to determine whether a failed attempt should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection reset, timeout, short write, 5xx server errors.
    Transient,

    /// Expected-to-occur failure that should abandon the job without alarm.
    ///
    /// Examples: 404 Not Found and 410 Gone for moderated or removed posts.
    Ignorable,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: malformed URL.
    Permanent,

    /// The operator requested shutdown while the attempt was running.
    Cancelled,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the transfer after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the transfer.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 10
/// - `base_delay`: 1 second
/// - `max_delay`: none (growth is uncapped; the attempt ceiling bounds it)
/// - `jitter`: none
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random(0..=jitter)
/// ```
///
/// With defaults, delays are 1s, 2s, 4s, ... 256s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay before the first retry.
    base_delay: Duration,

    /// Optional delay cap.
    max_delay: Option<Duration>,

    /// Upper bound of random jitter added to each delay.
    jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (must be >= 1)
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Optional cap on a single delay
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Adds random jitter of up to `jitter` to every delay.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Ignorable => {
                return RetryDecision::DoNotRetry {
                    reason: "content unavailable - abandoning job".to_string(),
                };
            }
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Cancelled => {
                return RetryDecision::DoNotRetry {
                    reason: "cancelled - shutdown requested".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay after a failed attempt.
    ///
    /// Formula: `min(base_delay * 2^(attempt-1), max_delay) + jitter`
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);

        if let Some(max_delay) = self.max_delay {
            delay = delay.min(max_delay);
        }

        delay + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and the configured bound.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=self.jitter.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a transfer error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 404 | Ignorable | Post or file removed by moderation |
/// | 410 | Ignorable | Gone - permanently removed |
/// | other | Transient | Server errors and unexpected statuses are retried |
///
/// # Non-HTTP Errors
///
/// | Error | Type |
/// |-------|------|
/// | Network, Timeout | Transient |
/// | Io, ShortWrite, Incomplete, RangeMismatch | Transient |
/// | InvalidUrl | Permanent |
/// | Cancelled | Cancelled |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::Network { .. }
        | DownloadError::Timeout { .. }
        | DownloadError::Io { .. }
        | DownloadError::ShortWrite { .. }
        | DownloadError::Incomplete { .. }
        | DownloadError::RangeMismatch { .. } => FailureType::Transient,
        DownloadError::InvalidUrl { .. } => FailureType::Permanent,
        DownloadError::Cancelled { .. } => FailureType::Cancelled,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        404 | 410 => FailureType::Ignorable,
        _ => FailureType::Transient,
    }
}
