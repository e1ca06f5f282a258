//! Thread selection against inclusion/exclusion text filters and the crawl
//! cursor.

use tracing::{debug, instrument, warn};

use crate::cursor::CrawlCursor;
use crate::source::{BoardSource, Catalog, CatalogThread, ThreadPage};

/// A catalog thread worth fetching this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadCandidate {
    /// Thread number.
    pub num: String,
    /// Cursor key (`board_thread`).
    pub key: String,
    /// Activity counter seen in the catalog.
    pub counter: i64,
}

/// Outcome of filtering one catalog snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Threads in the catalog.
    pub total: usize,
    /// Threads passing the text filters, with or without new activity.
    pub matched: usize,
    /// Matching threads with new activity, in catalog order.
    pub to_fetch: Vec<ThreadCandidate>,
}

/// Case-insensitive substring filter over subject, tags and comment.
#[derive(Debug, Clone, Default)]
pub struct ThreadSelector {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl ThreadSelector {
    /// Creates a selector from inclusion and exclusion substrings.
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: include.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
            exclude: exclude.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
        }
    }

    /// Returns whether `thread` matches an inclusion substring and no
    /// exclusion substring.
    #[must_use]
    pub fn is_candidate(&self, thread: &CatalogThread) -> bool {
        let fields = [
            thread.subject.to_lowercase(),
            thread.tags.to_lowercase(),
            thread.comment.to_lowercase(),
        ];
        let hit = |needles: &[String]| {
            needles
                .iter()
                .any(|needle| fields.iter().any(|field| field.contains(needle.as_str())))
        };
        hit(&self.include) && !hit(&self.exclude)
    }

    /// Picks the candidate threads whose activity counter moved past the
    /// cursor.
    #[must_use]
    pub fn select(&self, board_id: &str, catalog: &Catalog, cursor: &CrawlCursor) -> Selection {
        let mut selection = Selection {
            total: catalog.threads.len(),
            ..Selection::default()
        };

        for thread in catalog.threads.iter().filter(|t| self.is_candidate(t)) {
            selection.matched += 1;
            let key = CrawlCursor::key(board_id, &thread.num);
            if !cursor.should_fetch(&key, thread.files_count) {
                debug!(thread_key = %key, counter = thread.files_count, "no new activity");
                continue;
            }
            debug!(thread_key = %key, counter = thread.files_count, "thread has new activity");
            selection.to_fetch.push(ThreadCandidate {
                num: thread.num.clone(),
                key,
                counter: thread.files_count,
            });
        }

        selection
    }

    /// Fetches one selected thread. Failures are logged and yield `None` so
    /// the caller moves on to the next candidate.
    #[instrument(skip(self, source, candidate), fields(thread_key = %candidate.key))]
    pub async fn fetch(
        &self,
        source: &dyn BoardSource,
        board: &str,
        candidate: &ThreadCandidate,
    ) -> Option<ThreadPage> {
        match source.thread(board, &candidate.num).await {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(thread = %candidate.num, error = %e, "failed to fetch thread, skipping");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn thread(num: &str, subject: &str, tags: &str, comment: &str, count: i64) -> CatalogThread {
        CatalogThread {
            num: num.to_string(),
            subject: subject.to_string(),
            tags: tags.to_string(),
            comment: comment.to_string(),
            files_count: count,
        }
    }

    #[test]
    fn test_inclusion_is_case_insensitive_across_fields() {
        let selector = ThreadSelector::new(["Webm"], Vec::<String>::new());

        assert!(selector.is_candidate(&thread("1", "WEBM thread", "", "", 0)));
        assert!(selector.is_candidate(&thread("2", "", "webm", "", 0)));
        assert!(selector.is_candidate(&thread("3", "", "", "post your webms", 0)));
        assert!(!selector.is_candidate(&thread("4", "cats", "", "", 0)));
    }

    #[test]
    fn test_exclusion_wins() {
        let selector = ThreadSelector::new(["webm"], ["politics"]);
        assert!(!selector.is_candidate(&thread("1", "webm", "", "no POLITICS please", 0)));
    }

    #[test]
    fn test_no_inclusion_substrings_matches_nothing() {
        let selector = ThreadSelector::new(Vec::<String>::new(), Vec::<String>::new());
        assert!(!selector.is_candidate(&thread("1", "anything", "", "", 0)));
    }

    #[test]
    fn test_select_respects_cursor() {
        let selector = ThreadSelector::new(["cats"], Vec::<String>::new());
        let catalog = Catalog {
            threads: vec![
                thread("100", "cats", "", "", 5),
                thread("200", "cats", "", "", 3),
                thread("300", "dogs", "", "", 9),
                thread("400", "cats", "", "", 8),
            ],
            ..Catalog::default()
        };
        let cursor: CrawlCursor = [("b_100".to_string(), 5), ("b_400".to_string(), 7)]
            .into_iter()
            .collect();

        let selection = selector.select("b", &catalog, &cursor);

        assert_eq!(selection.total, 4);
        assert_eq!(selection.matched, 3);
        let nums: Vec<&str> = selection.to_fetch.iter().map(|c| c.num.as_str()).collect();
        assert_eq!(nums, vec!["200", "400"]);
        assert_eq!(selection.to_fetch[0].key, "b_200");
        assert_eq!(selection.to_fetch[1].counter, 8);
    }
}
