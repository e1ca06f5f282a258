//! Shared helpers for integration tests: scripted fetchers, wiremock
//! responders and fixture builders.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use boardsync_core::download::{
    DownloadEngine, DownloadError, Fetcher, RateLimiter, RetryPolicy, TransferOutcome,
};
use tokio_util::sync::CancellationToken;
use wiremock::{Request, Respond, ResponseTemplate};

/// Builds a 32-character fingerprint unique to `n`.
pub fn md5(n: u32) -> String {
    format!("{n:032x}")
}

/// Engine with rate limiting disabled and millisecond backoff.
pub fn fast_engine(
    concurrency: usize,
    max_attempts: u32,
    fetcher: Arc<dyn Fetcher>,
    shutdown: &CancellationToken,
) -> DownloadEngine {
    DownloadEngine::new(
        concurrency,
        RetryPolicy::new(max_attempts, Duration::from_millis(1), None),
        Arc::new(RateLimiter::disabled()),
        fetcher,
        shutdown,
    )
    .unwrap()
}

/// Fetcher that writes a partial staging file and then fails transiently,
/// every time.
#[derive(Debug, Default)]
pub struct AlwaysTransient {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for AlwaysTransient {
    async fn fetch(
        &self,
        url: &str,
        staging: &Path,
        _cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(staging, b"partial")
            .await
            .map_err(|e| DownloadError::io(staging, e))?;
        Err(DownloadError::timeout(url))
    }
}

/// Fetcher that writes a staging file and then blocks until cancelled.
#[derive(Debug, Default)]
pub struct BlockUntilCancelled {
    pub started: AtomicUsize,
}

#[async_trait]
impl Fetcher for BlockUntilCancelled {
    async fn fetch(
        &self,
        url: &str,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        tokio::fs::write(staging, b"first chunk")
            .await
            .map_err(|e| DownloadError::io(staging, e))?;
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            () = cancel.cancelled() => Err(DownloadError::cancelled(url)),
            () = tokio::time::sleep(Duration::from_secs(3600)) => Err(DownloadError::timeout(url)),
        }
    }
}

/// Serves `body`, honoring `Range: bytes=N-` with 206 responses.
pub struct RangeResponder {
    pub body: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let offset = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("bytes="))
            .and_then(|value| value.strip_suffix('-'))
            .and_then(|value| value.parse::<usize>().ok());

        match offset {
            Some(offset) if offset < self.body.len() => ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes {offset}-{}/{}", self.body.len() - 1, self.body.len()),
                )
                .set_body_bytes(self.body[offset..].to_vec()),
            Some(_) => ResponseTemplate::new(416),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns whether it held.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
