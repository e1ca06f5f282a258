//! CLI entry point for boardsync.

use std::sync::Arc;

use anyhow::{Context, Result};
use boardsync_core::config::AppConfig;
use boardsync_core::cursor::CrawlCursor;
use boardsync_core::download::{DownloadEngine, RateLimiter, ResumableTransfer, RetryPolicy};
use boardsync_core::harvest::Harvester;
use boardsync_core::source::{SourceClient, build_http_client};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if let Some(concurrency) = args.concurrency {
        config.download.concurrency = usize::from(concurrency);
    }
    if let Some(max_attempts) = args.max_attempts {
        config.download.max_attempts = max_attempts;
    }
    if let Some(cursor) = &args.cursor {
        config.cursor_path.clone_from(cursor);
    }

    info!(
        boards = config.boards.len(),
        base_url = %config.base_url,
        concurrency = config.download.concurrency,
        "boardsync starting"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let http = build_http_client(
        &config.base_url,
        config.usercode_auth(),
        config.download.connect_timeout(),
        config.download.read_timeout(),
    )?;
    let source = Arc::new(SourceClient::new(http.clone(), config.base_url.clone()));
    let engine = DownloadEngine::new(
        config.download.concurrency,
        RetryPolicy::with_max_attempts(config.download.max_attempts),
        Arc::new(RateLimiter::new(
            config.download.rate_interval(),
            config.download.rate_burst,
        )),
        Arc::new(ResumableTransfer::new(http)),
        &shutdown,
    )?;

    let cursor = CrawlCursor::load_or_default(&config.cursor_path).await;
    let harvester = Harvester::new(&config, source, engine, shutdown);
    harvester.run(cursor, args.once).await;

    info!("boardsync stopped");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("received shutdown signal, initiating graceful shutdown");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                () = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, listening for ctrl-c only");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

/// Resolves on ctrl-c; never resolves if the listener cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
