//! One-shot search with surrounding context.
//!
//! Every hit of a base query becomes the anchor of a context group: its sort
//! key is used as a `search_after` pivot once in each direction to fetch the
//! documents immediately before and after it.

use crate::{FollowConfig, FollowError, PageWalker, Result};
use esfollow_client::{
    Clause, Document, Hit, QueryBackend, RangeBounds, SearchRequest, SortOrder, DOC_ORDER_FIELD,
};
use serde_json::Value;

/// Filters of a base search; all optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Query in the backend's query-string syntax
    pub query_string: Option<String>,
    /// Inclusive lower time bound, passed through (date math allowed)
    pub from_time: Option<String>,
    /// Inclusive upper time bound, passed through (date math allowed)
    pub to_time: Option<String>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn from_time(mut self, from: impl Into<String>) -> Self {
        self.from_time = Some(from.into());
        self
    }

    pub fn to_time(mut self, to: impl Into<String>) -> Self {
        self.to_time = Some(to.into());
        self
    }
}

/// Which side of an anchor to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Before,
    After,
}

/// Sort position of a hit: `(timestamp, _doc)`
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorKey {
    pub primary: Value,
    pub secondary: Value,
}

impl AnchorKey {
    /// Take the anchor from the hit's sort values
    pub fn from_hit(hit: &Hit) -> Result<Self> {
        match hit.sort.as_slice() {
            [primary, secondary, ..] => Ok(Self {
                primary: primary.clone(),
                secondary: secondary.clone(),
            }),
            _ => Err(FollowError::MissingSortKey { id: hit.id.clone() }),
        }
    }

    fn to_values(&self) -> Vec<Value> {
        vec![self.primary.clone(), self.secondary.clone()]
    }
}

/// A matched document with its neighbours, all in ascending order
#[derive(Debug, Clone, PartialEq)]
pub struct ContextGroup {
    pub before: Vec<Document>,
    pub anchor: Document,
    pub after: Vec<Document>,
}

impl ContextGroup {
    /// Number of documents in the group, anchor included
    pub fn len(&self) -> usize {
        self.before.len() + 1 + self.after.len()
    }

    /// Never empty: a group always holds its anchor
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Documents in order: before, anchor, after
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.before
            .iter()
            .chain(std::iter::once(&self.anchor))
            .chain(self.after.iter())
    }

    pub fn into_documents(self) -> Vec<Document> {
        let mut docs = self.before;
        docs.push(self.anchor);
        docs.extend(self.after);
        docs
    }
}

/// Fetches query hits together with their surrounding documents
pub struct ContextFetcher<B: QueryBackend> {
    backend: B,
    timestamp_field: String,
    keep_alive: String,
    page_size: Option<usize>,
}

impl<B: QueryBackend> ContextFetcher<B> {
    pub fn new(backend: B) -> Self {
        let defaults = FollowConfig::default();
        Self {
            backend,
            timestamp_field: defaults.timestamp_field,
            keep_alive: defaults.scroll_keep_alive,
            page_size: defaults.page_size,
        }
    }

    /// Take timestamp field, scroll keep-alive and page size from `config`
    pub fn configured(mut self, config: &FollowConfig) -> Self {
        self.timestamp_field = config.timestamp_field.clone();
        self.keep_alive = config.scroll_keep_alive.clone();
        self.page_size = config.page_size;
        self
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    fn sorted(&self, order: SortOrder) -> SearchRequest {
        SearchRequest::new()
            .sort_by(&self.timestamp_field, order)
            .sort_by(DOC_ORDER_FIELD, order.reverse())
    }

    fn search_request(&self, query: &SearchQuery) -> SearchRequest {
        let mut request = self
            .sorted(SortOrder::Asc)
            .match_all()
            .scroll(&self.keep_alive);

        if let Some(query_string) = &query.query_string {
            request = request.must(Clause::query_string(query_string));
        }

        let bounds = RangeBounds {
            gte: query.from_time.clone(),
            lte: query.to_time.clone(),
            ..Default::default()
        };
        if !bounds.is_unbounded() {
            request = request.must(Clause::range(&self.timestamp_field, bounds));
        }

        if let Some(size) = self.page_size {
            request = request.size(size);
        }
        request
    }

    /// All hits of `query`, ascending, walked across every page
    pub fn search(&self, index: Option<&str>, query: &SearchQuery) -> Result<PageWalker<&B>> {
        let request = self.search_request(query);

        tracing::debug!(index = ?index, query = ?query.query_string, "searching");
        let response = self.backend.search(index, &request)?;
        Ok(PageWalker::new(&self.backend, response, self.keep_alive.clone()))
    }

    /// Up to `count` hits directly before or after `anchor`.
    ///
    /// Hits come back in backend order: ascending for [`Direction::After`],
    /// nearest-first (descending) for [`Direction::Before`]. A `count` of
    /// zero returns nothing without contacting the backend.
    pub fn search_nearby(
        &self,
        index: Option<&str>,
        anchor: &AnchorKey,
        direction: Direction,
        count: usize,
    ) -> Result<Vec<Hit>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let order = match direction {
            Direction::After => SortOrder::Asc,
            Direction::Before => SortOrder::Desc,
        };
        let request = self
            .sorted(order)
            .search_after(anchor.to_values())
            .size(count);

        let response = self.backend.search(index, &request)?;
        tracing::trace!(?direction, count, found = response.hits().len(), "nearby search");
        Ok(response.into_hits())
    }

    /// One [`ContextGroup`] per hit of `query`.
    ///
    /// Groups of nearby hits may share documents; they are not merged.
    pub fn search_surrounding(
        &self,
        index: Option<&str>,
        query: &SearchQuery,
        num_before: usize,
        num_after: usize,
    ) -> Result<Surrounding<'_, B>> {
        let walker = self.search(index, query)?;

        Ok(Surrounding {
            fetcher: self,
            index: index.map(str::to_string),
            walker,
            num_before,
            num_after,
            failed: false,
        })
    }

    fn group_for(&self, index: Option<&str>, hit: Hit, num_before: usize, num_after: usize) -> Result<ContextGroup> {
        let anchor = AnchorKey::from_hit(&hit)?;

        let before = self.search_nearby(index, &anchor, Direction::Before, num_before)?;
        let after = self.search_nearby(index, &anchor, Direction::After, num_after)?;

        Ok(ContextGroup {
            before: before.into_iter().rev().map(|h| h.source).collect(),
            anchor: hit.source,
            after: after.into_iter().map(|h| h.source).collect(),
        })
    }
}

/// Lazy sequence of context groups, see [`ContextFetcher::search_surrounding`]
pub struct Surrounding<'a, B: QueryBackend> {
    fetcher: &'a ContextFetcher<B>,
    index: Option<String>,
    walker: PageWalker<&'a B>,
    num_before: usize,
    num_after: usize,
    failed: bool,
}

impl<B: QueryBackend> Iterator for Surrounding<'_, B> {
    type Item = Result<ContextGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let hit = match self.walker.next()? {
            Ok(hit) => hit,
            Err(e) => {
                self.failed = true;
                return Some(Err(e.into()));
            }
        };

        let group = self
            .fetcher
            .group_for(self.index.as_deref(), hit, self.num_before, self.num_after);

        if matches!(&group, Err(e) if e.is_backend()) {
            self.failed = true;
        }
        Some(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esfollow_client::MemoryBackend;
    use serde_json::json;

    fn five_minutes() -> MemoryBackend {
        let backend = MemoryBackend::new();
        for m in 1..=5 {
            let source = json!({
                "@timestamp": format!("2019-01-01T10:{:02}:00Z", m),
                "message": format!("doc{}", m),
            });
            backend.insert("logs", &format!("doc{}", m), source.as_object().cloned().unwrap());
        }
        backend
    }

    fn messages(group: &ContextGroup) -> Vec<&str> {
        group
            .iter()
            .map(|doc| doc["message"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_nearby_zero_count_skips_backend() {
        let backend = five_minutes();
        let fetcher = ContextFetcher::new(&backend);
        let anchor = AnchorKey {
            primary: json!(1),
            secondary: json!(2),
        };

        let hits = fetcher
            .search_nearby(None, &anchor, Direction::After, 0)
            .unwrap();

        assert!(hits.is_empty());
        assert_eq!(backend.calls().page_requests(), 0);
    }

    #[test]
    fn test_nearby_one_hit_calls_backend() {
        let backend = five_minutes();
        let fetcher = ContextFetcher::new(&backend);
        let first = fetcher.search(None, &SearchQuery::new()).unwrap().next().unwrap().unwrap();
        let anchor = AnchorKey::from_hit(&first).unwrap();
        backend.reset_calls();

        let hits = fetcher
            .search_nearby(None, &anchor, Direction::After, 1)
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc2");
        assert_eq!(backend.calls().search, 1);
    }

    #[test]
    fn test_nearby_before_is_nearest_first() {
        let backend = five_minutes();
        let fetcher = ContextFetcher::new(&backend);
        let last = fetcher.search(None, &SearchQuery::new()).unwrap().last().unwrap().unwrap();
        let anchor = AnchorKey::from_hit(&last).unwrap();

        let ids: Vec<String> = fetcher
            .search_nearby(None, &anchor, Direction::Before, 3)
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect();

        assert_eq!(ids, vec!["doc4", "doc3", "doc2"]);
    }

    #[test]
    fn test_surrounding_window_sizes() {
        let backend = five_minutes();
        let fetcher = ContextFetcher::new(&backend);

        let groups: Vec<ContextGroup> = fetcher
            .search_surrounding(None, &SearchQuery::new(), 2, 2)
            .unwrap()
            .map(|g| g.unwrap())
            .collect();

        let sizes: Vec<usize> = groups.iter().map(ContextGroup::len).collect();
        assert_eq!(sizes, vec![3, 4, 5, 4, 3]);

        assert_eq!(messages(&groups[0]), vec!["doc1", "doc2", "doc3"]);
        assert_eq!(messages(&groups[2]), vec!["doc1", "doc2", "doc3", "doc4", "doc5"]);
        assert_eq!(messages(&groups[4]), vec!["doc3", "doc4", "doc5"]);

        for (i, group) in groups.iter().enumerate() {
            assert_eq!(group.anchor["message"], json!(format!("doc{}", i + 1)));
        }
        assert_eq!(backend.open_scrolls(), 0);
    }

    #[test]
    fn test_surrounding_without_context() {
        let backend = five_minutes();
        let fetcher = ContextFetcher::new(&backend);

        let groups: Vec<ContextGroup> = fetcher
            .search_surrounding(None, &SearchQuery::new().query("doc3"), 0, 0)
            .unwrap()
            .map(|g| g.unwrap())
            .collect();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].clone().into_documents().len(), 1);
        // base search plus the terminating empty page; no nearby searches
        assert_eq!(backend.calls().page_requests(), 2);
    }

    #[test]
    fn test_search_request_time_bounds() {
        let backend = MemoryBackend::new();
        let fetcher = ContextFetcher::new(&backend);
        let query = SearchQuery::new().query("error").from_time("now-1h").to_time("now");

        let body = serde_json::to_value(fetcher.search_request(&query)).unwrap();
        assert_eq!(
            body,
            json!({
                "sort": [{"@timestamp": "asc"}, {"_doc": "desc"}],
                "query": {"bool": {"must": [
                    {"query_string": {"query": "error"}},
                    {"range": {"@timestamp": {"gte": "now-1h", "lte": "now"}}}
                ]}}
            })
        );
    }

    #[test]
    fn test_missing_sort_key() {
        let hit = Hit::new("x", Document::new());
        assert!(matches!(
            AnchorKey::from_hit(&hit),
            Err(FollowError::MissingSortKey { id }) if id == "x"
        ));
    }
}
