//! Incremental follow engine.
//!
//! Each call queries everything newer than a caller-supplied `since`
//! timestamp. Callers pass a look-back window rather than a strict
//! watermark, so consecutive calls overlap; the [`EntryTracker`] filters out
//! documents that were already delivered. Documents that became searchable
//! late but still fall inside the window are picked up on a later call.

use crate::{EntryTracker, FollowConfig, FollowError, FollowStats, PageWalker, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use esfollow_client::{
    Clause, Document, Hit, QueryBackend, RangeBounds, RawTimestamp, SearchRequest,
    SearchResponse, SortOrder,
};
use serde_json::Value;
use std::collections::HashSet;

/// Follows one backend, delivering every document at most once
pub struct FollowEngine<B: QueryBackend> {
    backend: B,
    delivery: Delivery,
    timestamp_field: String,
    query_string: Option<String>,
    keep_alive: String,
    page_size: Option<usize>,
}

impl<B: QueryBackend> FollowEngine<B> {
    /// Engine with a fresh tracker
    pub fn new(backend: B) -> Self {
        Self::with_tracker(backend, EntryTracker::new())
    }

    /// Engine using the given tracker
    pub fn with_tracker(backend: B, tracker: EntryTracker) -> Self {
        let defaults = FollowConfig::default();
        Self {
            backend,
            delivery: Delivery {
                tracker,
                malformed_ids: HashSet::new(),
                stats: FollowStats::default(),
            },
            timestamp_field: defaults.timestamp_field,
            query_string: None,
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

    /// Only follow documents matching `query` (backend query-string syntax)
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn timestamp_field(&self) -> &str {
        &self.timestamp_field
    }

    pub fn tracker(&self) -> &EntryTracker {
        &self.delivery.tracker
    }

    pub fn stats(&self) -> FollowStats {
        self.delivery.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn since_request<Tz: TimeZone>(&self, since: &DateTime<Tz>) -> SearchRequest {
        let mut request = SearchRequest::new()
            .sort_by(&self.timestamp_field, SortOrder::Asc)
            .match_all()
            .scroll(&self.keep_alive);

        if let Some(query) = &self.query_string {
            request = request.must(Clause::query_string(query));
        }

        request = request.must(Clause::range(
            &self.timestamp_field,
            RangeBounds {
                gt: Some(
                    since
                        .with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                ..Default::default()
            },
        ));

        if let Some(size) = self.page_size {
            request = request.size(size);
        }
        request
    }

    /// First page of the query for everything after `since`
    fn query_since<Tz: TimeZone>(
        &mut self,
        index: Option<&str>,
        since: &DateTime<Tz>,
    ) -> Result<SearchResponse> {
        let request = self.since_request(since);
        self.delivery.stats.queries += 1;

        tracing::debug!(index = ?index, "querying entries");
        Ok(self.backend.search(index, &request)?)
    }

    /// All hits with a timestamp strictly after `since`, ascending, across
    /// every page
    pub fn get_entries_since<Tz: TimeZone>(
        &mut self,
        index: Option<&str>,
        since: &DateTime<Tz>,
    ) -> Result<PageWalker<&B>> {
        let response = self.query_since(index, since)?;
        Ok(PageWalker::new(&self.backend, response, self.keep_alive.clone()))
    }

    /// Documents after `since` that have not been delivered before.
    ///
    /// Each yielded document is recorded in the tracker as it is pulled.
    pub fn get_new_lines<Tz: TimeZone>(
        &mut self,
        index: Option<&str>,
        since: &DateTime<Tz>,
    ) -> Result<NewLines<'_, B>> {
        let response = self.query_since(index, since)?;

        Ok(NewLines {
            walker: PageWalker::new(&self.backend, response, self.keep_alive.clone()),
            delivery: &mut self.delivery,
            timestamp_field: &self.timestamp_field,
        })
    }

    /// Deliver one hit of a walk, as [`NewLines`] does.
    ///
    /// `None` means the hit was already handled and is skipped.
    pub fn admit(&mut self, hit: Hit) -> Option<Result<Document>> {
        self.delivery.admit(&self.timestamp_field, hit)
    }

    /// Forget delivered documents at or before `timestamp`
    pub fn prune_before<Tz: TimeZone>(&mut self, timestamp: &DateTime<Tz>) -> usize {
        let pruned = self.delivery.tracker.prune_before(timestamp);
        self.delivery.stats.pruned += pruned as u64;
        pruned
    }
}

impl<B: QueryBackend + Clone> FollowEngine<B> {
    /// Like [`get_entries_since`](Self::get_entries_since), but the walk
    /// holds its own backend handle and leaves the engine free for
    /// [`admit`](Self::admit)
    pub fn walk_entries_since<Tz: TimeZone>(
        &mut self,
        index: Option<&str>,
        since: &DateTime<Tz>,
    ) -> Result<PageWalker<B>> {
        let response = self.query_since(index, since)?;
        Ok(PageWalker::new(self.backend.clone(), response, self.keep_alive.clone()))
    }
}

/// Delivery state shared by every walk of one engine
#[derive(Debug)]
struct Delivery {
    tracker: EntryTracker,
    /// Malformed hits without a usable sort key; reported once, kept for
    /// the engine's lifetime
    malformed_ids: HashSet<String>,
    stats: FollowStats,
}

impl Delivery {
    fn admit(&mut self, timestamp_field: &str, hit: Hit) -> Option<Result<Document>> {
        self.stats.hits_seen += 1;

        if self.tracker.contains(&hit.id) || self.malformed_ids.contains(&hit.id) {
            self.stats.duplicates_skipped += 1;
            return None;
        }

        match parse_timestamp(timestamp_field, &hit) {
            Ok(timestamp) => {
                self.tracker.add(hit.id, timestamp);
                self.stats.delivered += 1;
                Some(Ok(hit.source))
            }
            Err(e) => {
                self.stats.malformed += 1;
                // the backend's sort value still places the hit in time
                match sort_timestamp(&hit) {
                    Some(timestamp) => self.tracker.add(hit.id, timestamp),
                    None => {
                        self.malformed_ids.insert(hit.id);
                    }
                }
                Some(Err(e))
            }
        }
    }
}

fn parse_timestamp(timestamp_field: &str, hit: &Hit) -> Result<RawTimestamp> {
    let malformed = |reason: String| FollowError::MalformedTimestamp {
        id: hit.id.clone(),
        field: timestamp_field.to_string(),
        reason,
    };

    let value = hit
        .source
        .get(timestamp_field)
        .ok_or_else(|| malformed("field missing".to_string()))?;

    RawTimestamp::from_value(value).map_err(|e| malformed(e.to_string()))
}

/// Primary sort value as epoch millis, when the backend sent one
fn sort_timestamp(hit: &Hit) -> Option<RawTimestamp> {
    match hit.sort.first()? {
        value @ Value::Number(_) => RawTimestamp::from_value(value).ok(),
        _ => None,
    }
}

/// Lazy sequence of newly delivered documents, see
/// [`FollowEngine::get_new_lines`]
pub struct NewLines<'a, B: QueryBackend> {
    walker: PageWalker<&'a B>,
    delivery: &'a mut Delivery,
    timestamp_field: &'a str,
}

impl<B: QueryBackend> Iterator for NewLines<'_, B> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let hit = match self.walker.next()? {
                Ok(hit) => hit,
                Err(e) => return Some(Err(e.into())),
            };

            if let Some(line) = self.delivery.admit(self.timestamp_field, hit) {
                return Some(line);
            }
        }
    }
}
