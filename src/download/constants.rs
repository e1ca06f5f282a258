//! Constants for the download module (timeouts, rate limiting, concurrency).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default number of simultaneous in-flight downloads.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default token refill interval for the request rate limiter.
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_millis(200);

/// Default token bucket capacity for the request rate limiter.
pub const DEFAULT_RATE_BURST: u32 = 10;

/// Read-buffer granularity at which transfers observe cancellation (32 KiB).
pub const TRANSFER_CHUNK_SIZE: usize = 32 * 1024;

/// Suffix appended to the destination path while a transfer is incomplete.
pub const STAGING_SUFFIX: &str = ".tmp";
