//! In-process search backend.
//!
//! Holds documents in memory and answers sorted range queries, `search_after`
//! and scroll cursors the way an Elasticsearch node would. Used by tests and
//! demos where a real cluster is not available.

use crate::{
    BackendError, BoolQuery, Clause, Document, Hit, QueryBackend, RangeBounds, RawTimestamp,
    SearchRequest, SearchResponse, SortClause, SortOrder, DOC_ORDER_FIELD,
};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

/// Page size used when a request does not set `size`
const DEFAULT_PAGE_SIZE: usize = 10;

/// Number of backend calls observed, by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub search: usize,
    pub scroll: usize,
    pub clear_scroll: usize,
}

impl CallCounts {
    /// Calls that returned (or tried to return) a page
    pub fn page_requests(&self) -> usize {
        self.search + self.scroll
    }
}

struct StoredDoc {
    index: String,
    id: String,
    seq: u64,
    source: Document,
}

struct ScrollState {
    remaining: VecDeque<Hit>,
    page_size: usize,
}

/// In-memory implementation of [`QueryBackend`]
pub struct MemoryBackend {
    docs: RefCell<Vec<StoredDoc>>,
    scrolls: RefCell<HashMap<String, ScrollState>>,
    next_seq: Cell<u64>,
    next_scroll: Cell<u64>,
    calls: Cell<CallCounts>,
    fail_scroll_after: Cell<Option<usize>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            docs: RefCell::new(Vec::new()),
            scrolls: RefCell::new(HashMap::new()),
            next_seq: Cell::new(0),
            next_scroll: Cell::new(0),
            calls: Cell::new(CallCounts::default()),
            fail_scroll_after: Cell::new(None),
        }
    }

    /// Store a document. Later inserts get a higher `_doc` position.
    pub fn insert(&self, index: &str, id: &str, source: Document) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);

        self.docs.borrow_mut().push(StoredDoc {
            index: index.to_string(),
            id: id.to_string(),
            seq,
            source,
        });
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.docs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.borrow().is_empty()
    }

    /// Calls received so far
    pub fn calls(&self) -> CallCounts {
        self.calls.get()
    }

    pub fn reset_calls(&self) {
        self.calls.set(CallCounts::default());
    }

    /// Scroll cursors opened and not yet released
    pub fn open_scrolls(&self) -> usize {
        self.scrolls.borrow().len()
    }

    /// Make every scroll call after the first `successful` ones fail
    pub fn fail_scroll_after(&self, successful: usize) {
        self.fail_scroll_after.set(Some(successful));
    }

    fn record(&self, update: impl FnOnce(&mut CallCounts)) {
        let mut calls = self.calls.get();
        update(&mut calls);
        self.calls.set(calls);
    }

    fn matching_hits(
        &self,
        index: Option<&str>,
        request: &SearchRequest,
    ) -> Result<Vec<Hit>, BackendError> {
        let docs = self.docs.borrow();
        let mut hits = Vec::new();

        for doc in docs.iter() {
            if !index.map_or(true, |pattern| index_matches(pattern, &doc.index)) {
                continue;
            }
            if !query_matches(request.query.as_ref(), &doc.source)? {
                continue;
            }

            hits.push(Hit {
                id: doc.id.clone(),
                index: Some(doc.index.clone()),
                source: doc.source.clone(),
                sort: sort_key(doc, &request.sort),
            });
        }

        hits.sort_by(|a, b| compare_keys(&a.sort, &b.sort, &request.sort));

        if let Some(anchor) = &request.search_after {
            hits.retain(|hit| compare_keys(&hit.sort, anchor, &request.sort) == Ordering::Greater);
        }

        Ok(hits)
    }
}

impl QueryBackend for MemoryBackend {
    fn search(
        &self,
        index: Option<&str>,
        request: &SearchRequest,
    ) -> Result<SearchResponse, BackendError> {
        self.record(|c| c.search += 1);

        let mut hits = self.matching_hits(index, request)?;
        let page_size = request.size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

        if request.scroll.is_none() {
            hits.truncate(page_size);
            return Ok(SearchResponse::with_hits(hits));
        }

        let mut remaining: VecDeque<Hit> = hits.into();
        let take = page_size.min(remaining.len());
        let first_page: Vec<Hit> = remaining.drain(..take).collect();

        let scroll_no = self.next_scroll.get();
        self.next_scroll.set(scroll_no + 1);
        let scroll_id = format!("scroll-{}", scroll_no);

        self.scrolls.borrow_mut().insert(
            scroll_id.clone(),
            ScrollState {
                remaining,
                page_size,
            },
        );

        Ok(SearchResponse::with_hits(first_page).with_scroll_id(scroll_id))
    }

    fn scroll(&self, scroll_id: &str, _keep_alive: &str) -> Result<SearchResponse, BackendError> {
        let attempt = self.calls.get().scroll;
        self.record(|c| c.scroll += 1);

        if self.fail_scroll_after.get().is_some_and(|limit| attempt >= limit) {
            return Err(BackendError::Query("injected scroll failure".to_string()));
        }

        let mut scrolls = self.scrolls.borrow_mut();
        let state = scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| BackendError::ScrollNotFound(scroll_id.to_string()))?;

        let take = state.page_size.min(state.remaining.len());
        let page: Vec<Hit> = state.remaining.drain(..take).collect();

        Ok(SearchResponse::with_hits(page).with_scroll_id(scroll_id))
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        self.record(|c| c.clear_scroll += 1);

        self.scrolls
            .borrow_mut()
            .remove(scroll_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::ScrollNotFound(scroll_id.to_string()))
    }
}

/// Comma-separated index patterns with `*` wildcards
fn index_matches(pattern: &str, index: &str) -> bool {
    pattern
        .split(',')
        .map(str::trim)
        .any(|p| p == "_all" || glob_match(p.as_bytes(), index.as_bytes()))
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

fn query_matches(query: Option<&BoolQuery>, source: &Document) -> Result<bool, BackendError> {
    let Some(query) = query else {
        return Ok(true);
    };

    for clause in &query.must {
        let matched = match clause {
            Clause::QueryString { query } => query_string_matches(query, source),
            Clause::Range { field, bounds } => range_matches(field, bounds, source)?,
        };
        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// `*` matches everything, `field:term` matches inside one field, anything
/// else is a case-insensitive substring search over all string values.
fn query_string_matches(query: &str, source: &Document) -> bool {
    let query = query.trim();
    if query.is_empty() || query == "*" {
        return true;
    }

    if let Some((field, term)) = query.split_once(':') {
        if let Some(value) = source.get(field.trim()) {
            return value_contains(value, &term.trim().to_lowercase());
        }
    }

    let needle = query.to_lowercase();
    source.values().any(|value| value_contains(value, &needle))
}

fn value_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string() == needle,
        Value::Bool(b) => b.to_string() == needle,
        Value::Array(items) => items.iter().any(|v| value_contains(v, needle)),
        Value::Object(map) => map.values().any(|v| value_contains(v, needle)),
        Value::Null => false,
    }
}

fn range_matches(field: &str, bounds: &RangeBounds, source: &Document) -> Result<bool, BackendError> {
    let Some(value) = source.get(field) else {
        return Ok(false);
    };
    let Ok(at) = RawTimestamp::from_value(value) else {
        return Ok(false);
    };
    let at = at.timestamp_millis();

    let bound = |raw: &Option<String>| -> Result<Option<i64>, BackendError> {
        raw.as_deref()
            .map(|s| {
                RawTimestamp::parse(s)
                    .map(RawTimestamp::timestamp_millis)
                    .map_err(|e| BackendError::Query(format!("range on '{}': {}", field, e)))
            })
            .transpose()
    };

    let checks = [
        (bound(&bounds.gt)?, Ordering::Greater, false),
        (bound(&bounds.gte)?, Ordering::Greater, true),
        (bound(&bounds.lt)?, Ordering::Less, false),
        (bound(&bounds.lte)?, Ordering::Less, true),
    ];

    Ok(checks.iter().all(|(limit, wanted, inclusive)| match limit {
        None => true,
        Some(limit) => {
            let ord = at.cmp(limit);
            ord == *wanted || (*inclusive && ord == Ordering::Equal)
        }
    }))
}

/// Sort values of a document: `_doc` is the insertion position, timestamp
/// fields become epoch millis, other fields are used as stored.
fn sort_key(doc: &StoredDoc, sort: &[SortClause]) -> Vec<Value> {
    sort.iter()
        .map(|clause| {
            if clause.field == DOC_ORDER_FIELD {
                return Value::from(doc.seq);
            }
            match doc.source.get(&clause.field) {
                None => Value::Null,
                Some(value @ Value::String(_)) => RawTimestamp::from_value(value)
                    .map(|ts| Value::from(ts.timestamp_millis()))
                    .unwrap_or_else(|_| value.clone()),
                Some(value) => value.clone(),
            }
        })
        .collect()
}

fn compare_keys(a: &[Value], b: &[Value], sort: &[SortClause]) -> Ordering {
    for ((left, right), clause) in a.iter().zip(b.iter()).zip(sort.iter()) {
        let ord = compare_values(left, right);
        let ord = match clause.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
