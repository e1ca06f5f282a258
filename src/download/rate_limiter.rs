//! Token-bucket rate limiting for outbound download requests.
//!
//! This module provides the [`RateLimiter`] struct which bounds the rate of
//! outbound requests independently of how many downloads run concurrently.
//!
//! # Overview
//!
//! The bucket starts full with `burst` tokens and gains one token every
//! `interval`, never holding more than `burst`. Each request consumes one
//! token; a caller finding the bucket empty waits for the next refill.
//!
//! Waiters queue on a FIFO mutex, so tokens are handed out in arrival order
//! and no caller starves while tokens are being produced. A waiter whose
//! cancellation token fires leaves the queue immediately with [`Cancelled`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use boardsync_core::download::RateLimiter;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), boardsync_core::download::Cancelled> {
//! let limiter = RateLimiter::new(Duration::from_millis(200), 10);
//! let cancel = CancellationToken::new();
//!
//! // The first ten requests proceed immediately, then one every 200ms.
//! limiter.acquire(&cancel).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::Cancelled;

const RESOURCE: &str = "rate limit token";

/// Token-bucket limiter shared by every download task.
///
/// # Thread Safety
///
/// `RateLimiter` is `Send + Sync`; wrap it in `Arc` and share it across
/// spawned Tokio tasks.
#[derive(Debug)]
pub struct RateLimiter {
    /// Time needed to produce one token.
    interval: Duration,

    /// Bucket capacity.
    burst: u32,

    /// Whether rate limiting is disabled.
    disabled: bool,

    /// Bucket state. The holder of this lock is the next caller to be served.
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    /// Instant from which the next token is being produced.
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, interval: Duration, burst: u32) {
        if self.tokens >= burst {
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let produced = elapsed.as_nanos() / interval.as_nanos().max(1);
        if produced == 0 {
            return;
        }

        let produced = u32::try_from(produced).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(produced).min(burst);
        if self.tokens >= burst {
            self.last_refill = now;
        } else {
            self.last_refill += interval.saturating_mul(produced);
        }
    }
}

impl RateLimiter {
    /// Creates a rate limiter producing one token per `interval` with the
    /// given bucket capacity.
    ///
    /// A zero `interval` disables limiting; a zero `burst` is raised to 1.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis(), burst))]
    pub fn new(interval: Duration, burst: u32) -> Self {
        if interval.is_zero() {
            return Self::disabled();
        }

        debug!("creating rate limiter");
        let burst = burst.max(1);
        Self {
            interval,
            burst,
            disabled: false,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Creates a disabled rate limiter that never waits.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            interval: Duration::ZERO,
            burst: 0,
            disabled: true,
            bucket: Mutex::new(Bucket {
                tokens: 0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the token refill interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the bucket capacity.
    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Waits until a token is available and consumes it.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] as soon as `cancel` fires, whether the caller is
    /// queued behind other waiters or waiting for a refill. No token is
    /// consumed in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled { resource: RESOURCE });
        }
        if self.disabled {
            return Ok(());
        }

        let mut bucket = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Cancelled { resource: RESOURCE }),
            guard = self.bucket.lock() => guard,
        };

        loop {
            let now = Instant::now();
            bucket.refill(now, self.interval, self.burst);

            if bucket.tokens > 0 {
                bucket.tokens -= 1;
                trace!(remaining = bucket.tokens, "rate limit token acquired");
                return Ok(());
            }

            let ready_at = bucket.last_refill + self.interval;
            trace!(
                wait_ms = ready_at.saturating_duration_since(now).as_millis(),
                "waiting for rate limit token"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Cancelled { resource: RESOURCE }),
                () = tokio::time::sleep_until(ready_at) => {}
            }
        }
    }
}
