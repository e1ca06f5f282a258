//! Single-attempt resumable transfer of one remote file to a staging path.
//!
//! A transfer looks at the staging file already on disk, asks the origin for
//! the remaining bytes with `Range: bytes=N-`, and appends the body to the
//! staging file. The staging file therefore always holds a prefix of the
//! final content and can be resumed by the next attempt or the next run.
//! A 206 must continue exactly where the staging file ends, otherwise the
//! staged bytes are discarded.
//!
//! Cancellation is checked before the request, while waiting for headers,
//! between body chunks and between 32 KiB write slices.

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use super::DownloadError;
use super::constants::TRANSFER_CHUNK_SIZE;

/// Result of one successful transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Bytes present in the staging file before this attempt.
    pub resumed_from: u64,
    /// Bytes appended by this attempt.
    pub bytes_written: u64,
}

impl TransferOutcome {
    /// Size of the staging file after the attempt.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.resumed_from + self.bytes_written
    }
}

/// One attempt at moving a remote resource into a local staging file.
///
/// The engine owns retries, backoff and finalization; implementors only
/// perform a single attempt. Tests substitute scripted implementations.
#[async_trait]
pub trait Fetcher: Send + Sync + std::fmt::Debug {
    /// Fetches `url` into `staging`, resuming from whatever is already there.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] describing why the attempt failed; the
    /// engine classifies it with [`classify_error`](super::classify_error).
    async fn fetch(
        &self,
        url: &str,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError>;
}

/// HTTP range-resuming [`Fetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ResumableTransfer {
    client: Client,
}

impl ResumableTransfer {
    /// Creates a transfer using `client` (cookies and timeouts come from it).
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ResumableTransfer {
    #[instrument(skip(self, cancel), fields(staging = %staging.display()))]
    async fn fetch(
        &self,
        url: &str,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        if cancel.is_cancelled() {
            return Err(DownloadError::cancelled(url));
        }

        let existing_bytes = staged_bytes(staging).await?;

        let mut request = self.client.get(url);
        if existing_bytes > 0 {
            debug!(url, existing_bytes, "resuming download");
            request = request.header(RANGE, format!("bytes={existing_bytes}-"));
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            response = request.send() => {
                response.map_err(|e| DownloadError::from_reqwest(url, e))?
            }
        };

        let status = response.status().as_u16();
        let (mut file, resumed_from) = match status {
            206 => {
                if existing_bytes > 0 {
                    let received = response
                        .headers()
                        .get(CONTENT_RANGE)
                        .and_then(|value| value.to_str().ok());
                    if content_range_start(received) != Some(existing_bytes) {
                        warn!(
                            url,
                            existing_bytes,
                            content_range = received.unwrap_or("none"),
                            "partial response does not continue the staged bytes, discarding them"
                        );
                        remove_staging(staging).await;
                        return Err(DownloadError::range_mismatch(
                            url,
                            existing_bytes,
                            received.unwrap_or("none"),
                        ));
                    }
                }
                (open_staging(staging, false).await?, existing_bytes)
            }
            200 => {
                if existing_bytes > 0 {
                    warn!(
                        url,
                        existing_bytes, "origin ignored range request, restarting from zero"
                    );
                }
                (open_staging(staging, true).await?, 0)
            }
            416 if existing_bytes > 0 => {
                // The staged prefix no longer lines up with the remote file.
                warn!(url, existing_bytes, "range not satisfiable, discarding staged bytes");
                remove_staging(staging).await;
                return Err(DownloadError::http_status(url, status));
            }
            _ => return Err(DownloadError::http_status(url, status)),
        };

        let expected = response.content_length();
        let copied = copy_with_cancel(&mut file, response, url, staging, cancel).await;
        let flushed = file
            .flush()
            .await
            .map_err(|e| DownloadError::io(staging.to_path_buf(), e));

        let bytes_written = copied?;
        flushed?;

        if let Some(expected) = expected
            && expected != bytes_written
        {
            return Err(DownloadError::incomplete(url, expected, bytes_written));
        }

        debug!(url, resumed_from, bytes_written, "transfer attempt complete");
        Ok(TransferOutcome {
            resumed_from,
            bytes_written,
        })
    }
}

/// Returns the size of the staging file, or 0 when it does not exist.
async fn staged_bytes(staging: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(staging).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::io(staging.to_path_buf(), e)),
    }
}

/// First byte offset of a `Content-Range: bytes START-END/TOTAL` value.
fn content_range_start(value: Option<&str>) -> Option<u64> {
    let (start, _) = value?.trim().strip_prefix("bytes ")?.split_once('-')?;
    start.trim().parse().ok()
}

async fn open_staging(staging: &Path, truncate: bool) -> Result<File, DownloadError> {
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options
        .open(staging)
        .await
        .map_err(|e| DownloadError::io(staging.to_path_buf(), e))
}

/// Best-effort removal of a staging file.
pub(crate) async fn remove_staging(staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => debug!(path = %staging.display(), "removed staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staging.display(), error = %e, "failed to remove staging file"),
    }
}

/// Streams the response body into `file` in slices of at most
/// [`TRANSFER_CHUNK_SIZE`], returning the number of bytes appended.
async fn copy_with_cancel(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    staging: &Path,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| DownloadError::from_reqwest(url, e))?;

        for slice in chunk.chunks(TRANSFER_CHUNK_SIZE) {
            if cancel.is_cancelled() {
                return Err(DownloadError::cancelled(url));
            }

            let n = file
                .write(slice)
                .await
                .map_err(|e| DownloadError::io(staging.to_path_buf(), e))?;
            if n != slice.len() {
                return Err(DownloadError::short_write(staging, slice.len(), n));
            }
            written += n as u64;
        }
    }

    Ok(written)
}
