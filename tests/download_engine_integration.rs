//! Integration tests for the download engine: resume, status handling,
//! retry ceiling and shutdown behavior.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use boardsync_core::download::{
    DownloadEngine, DownloadJob, EngineError, RateLimiter, ResumableTransfer, RetryPolicy,
    staging_path_for,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{AlwaysTransient, BlockUntilCancelled, RangeResponder, fast_engine, wait_until};

fn http_engine(max_attempts: u32) -> DownloadEngine {
    DownloadEngine::new(
        2,
        RetryPolicy::new(max_attempts, Duration::from_millis(1), None),
        Arc::new(RateLimiter::disabled()),
        Arc::new(ResumableTransfer::new(reqwest::Client::new())),
        &CancellationToken::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_interrupted_download_resumes_to_identical_file() -> Result<(), Box<dyn std::error::Error>>
{
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b/src/1/big.webm"))
        .and(header("range", "bytes=40000-"))
        .respond_with(RangeResponder { body: body.clone() })
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let destination = dir.path().join("big.webm");
    std::fs::write(staging_path_for(&destination), &body[..40_000])?;

    let engine = http_engine(3);
    engine
        .submit(DownloadJob::new(
            format!("{}/b/src/1/big.webm", server.uri()),
            &destination,
        ))
        .await?;
    engine.wait().await;

    assert_eq!(std::fs::read(&destination)?, body);
    assert!(!staging_path_for(&destination).exists());
    assert_eq!(engine.stats().completed(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_abandoned_without_retry() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b/src/1/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let destination = dir.path().join("gone.jpg");
    let engine = http_engine(10);

    engine
        .submit(DownloadJob::new(
            format!("{}/b/src/1/gone.jpg", server.uri()),
            &destination,
        ))
        .await?;
    engine.wait().await;

    assert!(!destination.exists());
    assert!(!staging_path_for(&destination).exists());
    assert_eq!(engine.stats().ignored(), 1);
    assert_eq!(engine.stats().retried(), 0);
    Ok(())
}

#[tokio::test]
async fn test_server_errors_are_retried_until_success() -> Result<(), Box<dyn std::error::Error>> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/b/src/1/flaky.png"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b/src/1/flaky.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let destination = dir.path().join("flaky.png");
    let engine = http_engine(5);

    engine
        .submit(DownloadJob::new(
            format!("{}/b/src/1/flaky.png", server.uri()),
            &destination,
        ))
        .await?;
    engine.wait().await;

    assert_eq!(std::fs::read(&destination)?, b"png");
    assert_eq!(engine.stats().retried(), 2);
    assert_eq!(engine.stats().attempts(), 3);
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_stop_at_attempt_ceiling() -> Result<(), Box<dyn std::error::Error>>
{
    let dir = TempDir::new()?;
    let destination = dir.path().join("never.jpg");
    let fetcher = Arc::new(AlwaysTransient::default());
    let engine = fast_engine(1, 10, fetcher.clone(), &CancellationToken::new());

    engine
        .submit(DownloadJob::new("https://example.com/never.jpg", &destination))
        .await?;
    engine.wait().await;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 10);
    assert_eq!(engine.stats().failed(), 1);
    assert_eq!(engine.stats().retried(), 9);
    assert!(!destination.exists());
    assert!(!staging_path_for(&destination).exists());
    Ok(())
}

#[tokio::test]
async fn test_stop_cancels_in_flight_and_rejects_queued() -> Result<(), Box<dyn std::error::Error>>
{
    let dir = TempDir::new()?;
    let fetcher = Arc::new(BlockUntilCancelled::default());
    let engine = Arc::new(fast_engine(2, 10, fetcher.clone(), &CancellationToken::new()));

    let first = dir.path().join("1.webm");
    let second = dir.path().join("2.webm");
    engine
        .submit(DownloadJob::new("https://example.com/1.webm", &first))
        .await?;
    engine
        .submit(DownloadJob::new("https://example.com/2.webm", &second))
        .await?;

    let queued = {
        let engine = Arc::clone(&engine);
        let third = dir.path().join("3.webm");
        tokio::spawn(async move {
            engine
                .submit(DownloadJob::new("https://example.com/3.webm", third))
                .await
        })
    };

    let started = wait_until(Duration::from_secs(5), || {
        fetcher.started.load(Ordering::SeqCst) == 2
    })
    .await;
    assert!(started, "both slots should be busy");

    tokio::time::timeout(Duration::from_secs(5), engine.stop()).await?;

    let queued_result = queued.await?;
    assert!(matches!(queued_result, Err(EngineError::ShuttingDown)));
    assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);
    assert_eq!(engine.stats().cancelled(), 2);
    assert_eq!(engine.in_flight(), 0);
    assert!(!staging_path_for(&first).exists());
    assert!(!staging_path_for(&second).exists());
    assert!(!dir.path().join("3.webm.tmp").exists());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let destination = dir.path().join("slow.jpg");
    let fetcher = Arc::new(AlwaysTransient::default());
    let shutdown = CancellationToken::new();
    // A one-hour base delay: only cancellation can end the backoff.
    let engine = DownloadEngine::new(
        1,
        RetryPolicy::new(10, Duration::from_secs(3600), None),
        Arc::new(RateLimiter::disabled()),
        fetcher.clone(),
        &shutdown,
    )?;

    engine
        .submit(DownloadJob::new("https://example.com/slow.jpg", &destination))
        .await?;
    assert!(
        wait_until(Duration::from_secs(5), || fetcher.calls.load(Ordering::SeqCst) == 1).await
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), engine.wait()).await?;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().cancelled(), 1);
    assert!(!staging_path_for(&destination).exists());
    Ok(())
}
