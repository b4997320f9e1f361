//! Page walker over scroll cursors.
//!
//! Turns an initial search response plus its scroll cursor into one lazy
//! sequence of hits. The next page is only requested when the consumer pulls
//! past the end of the current one.

use esfollow_client::{BackendError, Hit, QueryBackend, SearchResponse};
use std::vec;

/// Lazily walks every page of a scrolling search.
///
/// Yields the hits of the initial page, then scrolls until a page comes back
/// empty, then releases the cursor. A backend error is yielded once and ends
/// the walk; nothing is retried. A walker dropped before the end releases its
/// cursor on a best-effort basis.
pub struct PageWalker<B: QueryBackend> {
    backend: B,
    keep_alive: String,
    page: vec::IntoIter<Hit>,
    last_page_len: usize,
    scroll_id: Option<String>,
    finished: bool,
    pages: usize,
    hits: usize,
}

impl<B: QueryBackend> PageWalker<B> {
    /// Walk `initial` and everything after it, keeping the cursor alive for
    /// `keep_alive` between pages
    pub fn new(backend: B, initial: SearchResponse, keep_alive: impl Into<String>) -> Self {
        let scroll_id = initial.scroll_id.clone();
        let hits = initial.into_hits();

        Self {
            backend,
            keep_alive: keep_alive.into(),
            last_page_len: hits.len(),
            page: hits.into_iter(),
            scroll_id,
            finished: false,
            pages: 1,
            hits: 0,
        }
    }

    /// Pages received so far, including the initial one
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Hits yielded so far
    pub fn hits_yielded(&self) -> usize {
        self.hits
    }

    /// True once the walk has ended, successfully or not
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn release(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };

        match self.backend.clear_scroll(&scroll_id) {
            Ok(()) => tracing::trace!(%scroll_id, "released scroll cursor"),
            Err(e) => tracing::warn!(%scroll_id, "Failed to release scroll cursor: {}", e),
        }
    }

    fn fetch_next_page(&mut self, scroll_id: &str) -> Result<(), BackendError> {
        let response = self.backend.scroll(scroll_id, &self.keep_alive)?;

        if let Some(next_id) = &response.scroll_id {
            if next_id != scroll_id {
                self.scroll_id = Some(next_id.clone());
            }
        }

        let hits = response.into_hits();
        self.pages += 1;
        self.last_page_len = hits.len();
        self.page = hits.into_iter();

        tracing::trace!(page = self.pages, hits = self.last_page_len, "fetched page");
        Ok(())
    }
}

impl<B: QueryBackend> Iterator for PageWalker<B> {
    type Item = Result<Hit, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.page.next() {
                self.hits += 1;
                return Some(Ok(hit));
            }

            if self.finished {
                return None;
            }

            let scroll_id = match &self.scroll_id {
                Some(id) if self.last_page_len > 0 => id.clone(),
                _ => {
                    self.finished = true;
                    self.release();
                    tracing::debug!(pages = self.pages, hits = self.hits, "page walk complete");
                    return None;
                }
            };

            if let Err(e) = self.fetch_next_page(&scroll_id) {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}

impl<B: QueryBackend> Drop for PageWalker<B> {
    fn drop(&mut self) {
        if self.scroll_id.is_some() {
            tracing::debug!("releasing cursor of unfinished page walk");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esfollow_client::{MemoryBackend, SearchRequest, SortOrder};
    use serde_json::json;

    fn backend(count: usize) -> MemoryBackend {
        let backend = MemoryBackend::new();
        for i in 0..count {
            let source = json!({
                "@timestamp": format!("2019-01-01T10:{:02}:00Z", i),
                "msg": format!("line{}", i),
            });
            backend.insert("logs", &format!("id_{}", i), source.as_object().cloned().unwrap());
        }
        backend
    }

    fn scroll_request(size: usize) -> SearchRequest {
        SearchRequest::new()
            .sort_by("@timestamp", SortOrder::Asc)
            .size(size)
            .scroll("2m")
    }

    #[test]
    fn test_walks_all_pages_in_order() {
        let backend = backend(7);
        let initial = backend.search(Some("logs"), &scroll_request(3)).unwrap();

        let walker = PageWalker::new(&backend, initial, "2m");
        let ids: Vec<String> = walker.map(|hit| hit.unwrap().id).collect();

        let expected: Vec<String> = (0..7).map(|i| format!("id_{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_exhaustion_call_counts() {
        // pages of 3, 3, 1 then an empty page
        let backend = backend(7);
        let initial = backend.search(Some("logs"), &scroll_request(3)).unwrap();

        let mut walker = PageWalker::new(&backend, initial, "2m");
        let count = walker.by_ref().filter(|hit| hit.is_ok()).count();

        assert_eq!(count, 7);
        assert_eq!(walker.pages(), 4);
        assert!(walker.is_finished());
        drop(walker);

        let calls = backend.calls();
        assert_eq!(calls.page_requests(), 4);
        assert_eq!(calls.clear_scroll, 1);
        assert_eq!(backend.open_scrolls(), 0);
    }

    #[test]
    fn test_empty_initial_page() {
        let backend = backend(0);
        let initial = backend.search(None, &scroll_request(3)).unwrap();

        let mut walker = PageWalker::new(&backend, initial, "2m");
        assert!(walker.next().is_none());
        assert!(walker.next().is_none());

        assert_eq!(backend.calls().page_requests(), 1);
        assert_eq!(backend.calls().clear_scroll, 1);
    }

    #[test]
    fn test_response_without_cursor_is_single_page() {
        let backend = backend(5);
        let request = SearchRequest::new().sort_by("@timestamp", SortOrder::Asc).size(2);
        let initial = backend.search(None, &request).unwrap();

        let walker = PageWalker::new(&backend, initial, "2m");
        assert_eq!(walker.count(), 2);
        assert_eq!(backend.calls().scroll, 0);
        assert_eq!(backend.calls().clear_scroll, 0);
    }

    #[test]
    fn test_error_mid_walk_keeps_earlier_hits() {
        let backend = backend(6);
        backend.fail_scroll_after(1);
        let initial = backend.search(None, &scroll_request(2)).unwrap();

        let results: Vec<_> = PageWalker::new(&backend, initial, "2m").collect();

        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(|r| r.is_ok()));
        assert!(matches!(results[4], Err(BackendError::Query(_))));

        // the failed walk still gives its cursor back when dropped
        assert_eq!(backend.open_scrolls(), 0);
    }

    #[test]
    fn test_abandoned_walk_releases_cursor() {
        let backend = backend(6);
        let initial = backend.search(None, &scroll_request(2)).unwrap();

        let mut walker = PageWalker::new(&backend, initial, "2m");
        assert!(walker.next().is_some());
        assert_eq!(backend.open_scrolls(), 1);

        drop(walker);
        assert_eq!(backend.open_scrolls(), 0);
        assert_eq!(backend.calls().clear_scroll, 1);
    }
}
