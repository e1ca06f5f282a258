//! Polling cycle orchestration.
//!
//! A [`Harvester`] walks every configured board in order: fetch the catalog,
//! rebuild the board's fingerprint index from disk, select threads with new
//! activity, and hand their files to the download engine. After the last
//! board it drains the engine and persists the crawl cursor, then sleeps
//! until the next cycle.
//!
//! Selection and acceptance run sequentially on the caller's task; only the
//! downloads themselves run concurrently. The fingerprint index and the
//! cursor are therefore never shared with worker tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::acceptance::{AcceptancePolicy, UnknownExtensionLog, Verdict};
use crate::config::{AppConfig, BoardConfig};
use crate::cursor::CrawlCursor;
use crate::dedup::FingerprintSet;
use crate::download::{DownloadEngine, StatsSnapshot};
use crate::selector::{ThreadCandidate, ThreadSelector};
use crate::source::{BoardSource, SourceError, ThreadPage};

/// Errors that end a board pass or a cycle early.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The board catalog could not be fetched.
    #[error("failed to fetch catalog for board {board}: {source}")]
    Catalog {
        /// Board id.
        board: String,
        /// Underlying source error.
        #[source]
        source: SourceError,
    },

    /// Shutdown was requested.
    #[error("harvest cancelled by shutdown")]
    Cancelled,
}

/// Effective settings for one board.
#[derive(Debug, Clone)]
pub struct BoardPlan {
    /// Board id used in URLs.
    pub board: String,
    /// Destination directory.
    pub dir: PathBuf,
    /// Thread filter.
    pub selector: ThreadSelector,
    /// File filter.
    pub policy: AcceptancePolicy,
}

impl BoardPlan {
    /// Builds the plan for `board` with shared URL skip patterns and
    /// unknown-extension log.
    #[must_use]
    pub fn new(
        board: &BoardConfig,
        skip_url_patterns: &[String],
        unknown_log: Option<UnknownExtensionLog>,
    ) -> Self {
        let mut policy =
            AcceptancePolicy::new(&board.file_extensions, skip_url_patterns.iter().cloned());
        if let Some(log) = unknown_log {
            policy = policy.with_unknown_log(log);
        }
        Self {
            board: board.board.clone(),
            dir: board.dir_name.clone(),
            selector: ThreadSelector::new(&board.thread_subj_substrings, &board.ignored_substrings),
            policy,
        }
    }
}

/// Counts from one board pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardSummary {
    /// Threads in the catalog.
    pub threads_total: usize,
    /// Threads passing the text filters.
    pub threads_matched: usize,
    /// Threads fetched and processed.
    pub threads_fetched: usize,
    /// Files handed to the download engine.
    pub files_submitted: usize,
    /// Files skipped by the acceptance policy.
    pub files_skipped: usize,
}

/// Board pass and polling loop driver.
#[derive(Debug)]
pub struct Harvester {
    source: Arc<dyn BoardSource>,
    engine: DownloadEngine,
    boards: Vec<BoardPlan>,
    cursor_path: PathBuf,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl Harvester {
    /// Creates a harvester for every board in `config`.
    #[must_use]
    pub fn new(
        config: &AppConfig,
        source: Arc<dyn BoardSource>,
        engine: DownloadEngine,
        shutdown: CancellationToken,
    ) -> Self {
        let unknown_log = UnknownExtensionLog::new(&config.unknown_extensions_path);
        let boards = config
            .boards
            .iter()
            .map(|board| BoardPlan::new(board, &config.skip_url_patterns, Some(unknown_log.clone())))
            .collect();

        Self {
            source,
            engine,
            boards,
            cursor_path: config.cursor_path.clone(),
            poll_interval: config.poll_interval(),
            shutdown,
        }
    }

    /// Returns the download engine.
    #[must_use]
    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    /// Returns the board plans in processing order.
    #[must_use]
    pub fn boards(&self) -> &[BoardPlan] {
        &self.boards
    }

    /// Processes one board: catalog, fingerprint scan, thread selection and
    /// file acceptance. Cursor entries are recorded in memory for every
    /// thread whose files were all considered.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Catalog`] if the catalog cannot be fetched and
    /// [`HarvestError::Cancelled`] once shutdown is requested.
    #[instrument(skip_all, fields(board = %plan.board))]
    pub async fn process_board(
        &self,
        plan: &BoardPlan,
        cursor: &mut CrawlCursor,
    ) -> Result<BoardSummary, HarvestError> {
        if self.shutdown.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        let catalog = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(HarvestError::Cancelled),
            catalog = self.source.catalog(&plan.board) => catalog,
        };
        let catalog = catalog.map_err(|source| HarvestError::Catalog {
            board: plan.board.clone(),
            source,
        })?;
        let board_id = if catalog.board.id.is_empty() {
            plan.board.as_str()
        } else {
            catalog.board.id.as_str()
        };

        let mut fingerprints = scan_fingerprints(plan.dir.clone()).await;

        let selection = plan.selector.select(board_id, &catalog, cursor);
        let mut summary = BoardSummary {
            threads_total: selection.total,
            threads_matched: selection.matched,
            ..BoardSummary::default()
        };
        if selection.matched == 0 {
            warn!(
                dir = %plan.dir.display(),
                total = selection.total,
                "no interesting threads found out of {}",
                selection.total
            );
            return Ok(summary);
        }
        if selection.to_fetch.is_empty() {
            debug!(matched = selection.matched, "no matching thread has new activity");
            return Ok(summary);
        }

        for candidate in &selection.to_fetch {
            if self.shutdown.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }

            let page = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(HarvestError::Cancelled),
                page = plan.selector.fetch(self.source.as_ref(), &plan.board, candidate) => page,
            };
            let Some(page) = page else {
                continue;
            };

            let Some(thread_num) = thread_dir_name(&page, candidate) else {
                error!(
                    thread_key = %candidate.key,
                    current_thread = %page.current_thread,
                    num = %candidate.num,
                    "thread number is not numeric, skipping thread"
                );
                continue;
            };
            let thread_dir = plan.dir.join(thread_num);
            if let Err(e) = tokio::fs::create_dir_all(&thread_dir).await {
                error!(
                    thread_key = %candidate.key,
                    dir = %thread_dir.display(),
                    error = %e,
                    "failed to create thread directory, skipping thread"
                );
                continue;
            }

            for file in page.files() {
                let url = self.source.file_url(&file.path);
                let verdict = plan
                    .policy
                    .admit(file, &url, &thread_dir, &mut fingerprints, &self.engine)
                    .await
                    .map_err(|_| HarvestError::Cancelled)?;
                if matches!(verdict, Verdict::Accepted { .. }) {
                    summary.files_submitted += 1;
                } else {
                    summary.files_skipped += 1;
                }
            }

            cursor.record(candidate.key.clone(), candidate.counter);
            summary.threads_fetched += 1;
        }

        Ok(summary)
    }

    /// Runs one cycle: every board in order, then waits for all downloads
    /// and persists the cursor. Returns the download counts of this cycle.
    ///
    /// Catalog failures skip only the affected board. A failed cursor save is
    /// logged; the next cycle saves again.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Cancelled`] if shutdown interrupts the cycle.
    /// The cursor is not saved in that case.
    #[instrument(skip_all)]
    pub async fn run_cycle(
        &self,
        cursor: &mut CrawlCursor,
    ) -> Result<StatsSnapshot, HarvestError> {
        let before = self.engine.stats().snapshot();
        for plan in &self.boards {
            match self.process_board(plan, cursor).await {
                Ok(summary) => info!(
                    board = %plan.board,
                    threads = summary.threads_total,
                    matched = summary.threads_matched,
                    fetched = summary.threads_fetched,
                    submitted = summary.files_submitted,
                    skipped = summary.files_skipped,
                    "board processed"
                ),
                Err(HarvestError::Cancelled) => return Err(HarvestError::Cancelled),
                Err(e) => error!(board = %plan.board, error = %e, "skipping board this cycle"),
            }
        }

        self.engine.wait().await;
        if self.shutdown.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        if let Err(e) = cursor.save(&self.cursor_path).await {
            error!(error = %e, "failed to save crawl cursor");
        }

        let cycle = self.engine.stats().snapshot().since(&before);
        info!(
            completed = cycle.completed,
            ignored = cycle.ignored,
            failed = cycle.failed,
            cancelled = cycle.cancelled,
            retried = cycle.retried,
            "cycle complete"
        );
        Ok(cycle)
    }

    /// Runs cycles until shutdown, pausing between them. With `once`, stops
    /// after the first cycle. Always stops the engine before returning.
    #[instrument(skip_all, fields(poll_interval_secs = self.poll_interval.as_secs(), once = once))]
    pub async fn run(&self, mut cursor: CrawlCursor, once: bool) {
        loop {
            if self.run_cycle(&mut cursor).await.is_err() {
                info!("shutdown requested during cycle");
                break;
            }
            if once {
                break;
            }

            info!(sleep_secs = self.poll_interval.as_secs(), "sleeping until next cycle");
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!("shutdown requested while sleeping");
                    break;
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.engine.stop().await;
    }
}

/// Directory name for a fetched thread: the page's thread number, falling
/// back to the catalog number. Only plain decimal numbers are accepted.
fn thread_dir_name<'a>(
    page: &'a ThreadPage,
    candidate: &'a ThreadCandidate,
) -> Option<&'a str> {
    [page.current_thread.as_str(), candidate.num.as_str()]
        .into_iter()
        .find(|num| is_thread_number(num))
}

fn is_thread_number(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Scans `dir` on the blocking pool.
async fn scan_fingerprints(dir: PathBuf) -> FingerprintSet {
    match tokio::task::spawn_blocking(move || FingerprintSet::scan(&dir)).await {
        Ok(set) => set,
        Err(e) => {
            error!(error = %e, "fingerprint scan task failed, treating directory as empty");
            FingerprintSet::new()
        }
    }
}
