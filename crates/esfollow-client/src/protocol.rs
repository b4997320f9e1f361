//! Wire protocol for Elasticsearch-style search backends.
//!
//! Request types serialize to the JSON body of a `_search` call, response
//! types deserialize from the JSON returned by `_search` and `_search/scroll`.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document: field name to value
pub type Document = serde_json::Map<String, Value>;

/// Sort field that orders documents by their position in the index
pub const DOC_ORDER_FIELD: &str = "_doc";

/// Sort direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// The opposite direction
    pub fn reverse(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// One entry of the `sort` array, serialized as `{ "<field>": "<order>" }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub field: String,
    pub order: SortOrder,
}

impl SortClause {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }
}

impl Serialize for SortClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &self.order)?;
        map.end()
    }
}

/// Bounds of a range filter. Values are passed to the backend verbatim,
/// so they may be timestamps or backend date math such as `now-1h`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RangeBounds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<String>,
}

impl RangeBounds {
    /// True when no bound is set
    pub fn is_unbounded(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }
}

/// A single clause inside `bool.must`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Full-text query in the backend's query-string syntax
    QueryString { query: String },
    /// Range filter on one field
    Range { field: String, bounds: RangeBounds },
}

impl Clause {
    pub fn query_string(query: impl Into<String>) -> Self {
        Clause::QueryString {
            query: query.into(),
        }
    }

    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Self {
        Clause::Range {
            field: field.into(),
            bounds,
        }
    }
}

impl Serialize for Clause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct QueryStringBody<'a> {
            query: &'a str,
        }

        struct RangeBody<'a> {
            field: &'a str,
            bounds: &'a RangeBounds,
        }

        impl Serialize for RangeBody<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(self.field, self.bounds)?;
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Clause::QueryString { query } => {
                map.serialize_entry("query_string", &QueryStringBody { query })?;
            }
            Clause::Range { field, bounds } => {
                map.serialize_entry("range", &RangeBody { field, bounds })?;
            }
        }
        map.end()
    }
}

/// Boolean query, serialized as `{ "bool": { "must": [...] } }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoolQuery {
    pub must: Vec<Clause>,
}

impl Serialize for BoolQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct MustBody<'a> {
            must: &'a [Clause],
        }

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("bool", &MustBody { must: &self.must })?;
        map.end()
    }
}

/// Body of a `_search` request
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SearchRequest {
    pub sort: Vec<SortClause>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<BoolQuery>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_after: Option<Vec<Value>>,

    /// Scroll keep-alive; sent as a URL parameter, not in the body
    #[serde(skip)]
    pub scroll: Option<String>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sort clause
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortClause::new(field, order));
        self
    }

    /// Append a clause to `bool.must`, creating the query if needed
    pub fn must(mut self, clause: Clause) -> Self {
        self.query.get_or_insert_with(BoolQuery::default).must.push(clause);
        self
    }

    /// Start from an empty `bool.must` (matches everything)
    pub fn match_all(mut self) -> Self {
        self.query.get_or_insert_with(BoolQuery::default);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn search_after(mut self, anchor: Vec<Value>) -> Self {
        self.search_after = Some(anchor);
        self
    }

    /// Open a scroll cursor kept alive for `keep_alive` (e.g. `2m`)
    pub fn scroll(mut self, keep_alive: impl Into<String>) -> Self {
        self.scroll = Some(keep_alive.into());
        self
    }
}

/// Response of `_search` and `_search/scroll`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    #[serde(rename = "_scroll_id", default, skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,

    #[serde(default)]
    pub hits: HitsEnvelope,
}

impl SearchResponse {
    /// Response holding the given hits
    pub fn with_hits(hits: Vec<Hit>) -> Self {
        Self {
            scroll_id: None,
            hits: HitsEnvelope { hits },
        }
    }

    /// Attach a scroll cursor
    pub fn with_scroll_id(mut self, scroll_id: impl Into<String>) -> Self {
        self.scroll_id = Some(scroll_id.into());
        self
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits.hits
    }

    pub fn into_hits(self) -> Vec<Hit> {
        self.hits.hits
    }

    pub fn is_empty(&self) -> bool {
        self.hits.hits.is_empty()
    }
}

/// The `hits` object of a response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HitsEnvelope {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// A single matching document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    #[serde(rename = "_source", default)]
    pub source: Document,

    /// Sort-key tuple of this hit, usable as a `search_after` anchor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
}

impl Hit {
    pub fn new(id: impl Into<String>, source: Document) -> Self {
        Self {
            id: id.into(),
            index: None,
            source,
            sort: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_follow_request_body() {
        let request = SearchRequest::new()
            .sort_by("@timestamp", SortOrder::Asc)
            .must(Clause::query_string("level:error"))
            .must(Clause::range(
                "@timestamp",
                RangeBounds {
                    gt: Some("2019-01-01T10:00:00+00:00".to_string()),
                    ..Default::default()
                },
            ))
            .scroll("2m");

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "sort": [{"@timestamp": "asc"}],
                "query": {"bool": {"must": [
                    {"query_string": {"query": "level:error"}},
                    {"range": {"@timestamp": {"gt": "2019-01-01T10:00:00+00:00"}}}
                ]}}
            })
        );
    }

    #[test]
    fn test_search_after_request_body() {
        let request = SearchRequest::new()
            .sort_by("@timestamp", SortOrder::Desc)
            .sort_by(DOC_ORDER_FIELD, SortOrder::Asc)
            .search_after(vec![json!(1546336860000i64), json!(4)])
            .size(2);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "sort": [{"@timestamp": "desc"}, {"_doc": "asc"}],
                "size": 2,
                "search_after": [1546336860000i64, 4]
            })
        );
    }

    #[test]
    fn test_match_all_has_empty_must() {
        let body = serde_json::to_value(SearchRequest::new().match_all()).unwrap();
        assert_eq!(body["query"], json!({"bool": {"must": []}}));
    }

    #[test]
    fn test_response_deserialization() {
        let raw = json!({
            "_scroll_id": "abc",
            "took": 3,
            "hits": {
                "total": {"value": 1, "relation": "eq"},
                "hits": [{
                    "_index": "logs-1",
                    "_id": "id_1",
                    "_source": {"msg": "line1", "@timestamp": "2019-01-01T10:01:00Z"},
                    "sort": [1546336860000i64, 0]
                }]
            }
        });

        let response: SearchResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.scroll_id.as_deref(), Some("abc"));
        assert_eq!(response.hits().len(), 1);

        let hit = &response.hits()[0];
        assert_eq!(hit.id, "id_1");
        assert_eq!(hit.index.as_deref(), Some("logs-1"));
        assert_eq!(hit.source["msg"], json!("line1"));
        assert_eq!(hit.sort.len(), 2);
    }

    #[test]
    fn test_empty_response() {
        let response: SearchResponse = serde_json::from_value(json!({"hits": {"hits": []}})).unwrap();
        assert!(response.is_empty());
        assert!(response.scroll_id.is_none());
    }

    #[test]
    fn test_sort_order_reverse() {
        assert_eq!(SortOrder::Asc.reverse(), SortOrder::Desc);
        assert_eq!(SortOrder::Desc.reverse(), SortOrder::Asc);
    }
}
