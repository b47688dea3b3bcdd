//! Structured query DSL.
//!
//! Values serialize to the Elasticsearch JSON query DSL so they can be sent
//! to a remote engine verbatim; the embedded engine translates the same
//! values into native queries.

use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::SortDirection;

/// Name of the nested top-hits aggregation on expanded facets.
pub const TOP_HITS_AGG: &str = "top_facet_docs";
/// Name of the synthetic max-score metric on expanded facets.
pub const MAX_SCORE_AGG: &str = "max_score";

/// One query clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClause {
    MatchAll(MatchAll),
    Bool(BoolQuery),
    SimpleQueryString(SimpleQueryString),
    MultiMatch(MultiMatch),
    QueryString(QueryStringQuery),
    Term(TermQuery),
    Terms(TermsQuery),
    Range(RangeQuery),
    ConstantScore(ConstantScore),
}

impl QueryClause {
    pub fn match_all() -> Self {
        QueryClause::MatchAll(MatchAll {})
    }

    pub fn term(field: impl Into<String>, value: impl Into<TermValue>) -> Self {
        QueryClause::Term(TermQuery {
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn terms(field: impl Into<String>, values: Vec<TermValue>) -> Self {
        QueryClause::Terms(TermsQuery {
            field: field.into(),
            values,
        })
    }

    pub fn query_string(query: impl Into<String>) -> Self {
        QueryClause::QueryString(QueryStringQuery {
            query: query.into(),
            default_field: None,
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchAll {}

/// Boolean combination of clauses.
///
/// `filter` clauses restrict without scoring; `should` clauses are optional
/// when any `must` or `filter` clause is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoolQuery {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<QueryClause>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<QueryClause>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<QueryClause>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<QueryClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
            && self.should.is_empty()
            && self.must_not.is_empty()
            && self.filter.is_empty()
    }

    /// Disjunction requiring at least one clause to match.
    pub fn any_of(clauses: Vec<QueryClause>) -> Self {
        Self {
            should: clauses,
            minimum_should_match: Some(1),
            ..Default::default()
        }
    }

    pub fn all_of(clauses: Vec<QueryClause>) -> Self {
        Self {
            must: clauses,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    And,
    Or,
}

/// Syntax-aware query over several fields (`+`, `-`, `|`, quotes, `*`, `~N`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleQueryString {
    pub query: String,
    /// Field names, optionally suffixed with `^boost`.
    pub fields: Vec<String>,
    pub default_operator: Operator,
    pub lenient: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiMatchType {
    BestFields,
    MostFields,
}

/// Plain-text match over several fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiMatch {
    pub query: String,
    /// Field names, optionally suffixed with `^boost`.
    pub fields: Vec<String>,
    #[serde(rename = "type")]
    pub match_type: MultiMatchType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuzziness: Option<u32>,
    /// `keyword` matches the whole query as a single term.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Lucene-syntax query string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStringQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_field: Option<String>,
}

/// Scalar term value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TermValue {
    Bool(bool),
    Long(i64),
    Text(String),
}

impl fmt::Display for TermValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermValue::Bool(b) => write!(f, "{b}"),
            TermValue::Long(v) => write!(f, "{v}"),
            TermValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for TermValue {
    fn from(s: &str) -> Self {
        TermValue::Text(s.to_string())
    }
}

impl From<String> for TermValue {
    fn from(s: String) -> Self {
        TermValue::Text(s)
    }
}

impl From<i64> for TermValue {
    fn from(v: i64) -> Self {
        TermValue::Long(v)
    }
}

impl From<u64> for TermValue {
    fn from(v: u64) -> Self {
        TermValue::Long(v as i64)
    }
}

impl From<bool> for TermValue {
    fn from(b: bool) -> Self {
        TermValue::Bool(b)
    }
}

/// Exact term on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
    pub field: String,
    pub value: TermValue,
}

impl Serialize for TermQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &self.value)?;
        map.end()
    }
}

/// Any of several exact terms on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct TermsQuery {
    pub field: String,
    pub values: Vec<TermValue>,
}

impl Serialize for TermsQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &self.values)?;
        map.end()
    }
}

/// Range bounds on a numeric or date field. Dates use the storage format.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeBounds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<TermValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<TermValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<TermValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<TermValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub field: String,
    pub bounds: RangeBounds,
}

impl RangeQuery {
    pub fn less_than(field: impl Into<String>, value: impl Into<TermValue>) -> Self {
        Self {
            field: field.into(),
            bounds: RangeBounds {
                lt: Some(value.into()),
                ..Default::default()
            },
        }
    }
}

impl Serialize for RangeQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &self.bounds)?;
        map.end()
    }
}

/// Filter whose matches all receive the same fixed score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantScore {
    pub filter: Box<QueryClause>,
    pub boost: f32,
}

/// Sort on one field; `_score` sorts by relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct SortClause {
    pub field: String,
    pub direction: SortDirection,
}

impl Serialize for SortClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &json!({ "order": self.direction.as_str() }))?;
        map.end()
    }
}

/// Representative documents returned inside each facet bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct TopHits {
    pub size: u32,
    pub sort: Vec<SortClause>,
    pub source: Vec<String>,
}

/// Term-bucket aggregation over one facet field.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetAggregation {
    /// Aggregation name; the facet field name.
    pub name: String,
    pub field: String,
    pub size: u32,
    /// Expanded facets order buckets by their best hit instead of count.
    pub top_hits: Option<TopHits>,
}

impl FacetAggregation {
    pub fn is_expanded(&self) -> bool {
        self.top_hits.is_some()
    }

    pub fn to_json(&self) -> Value {
        let mut terms = Map::new();
        terms.insert("field".into(), json!(self.field));
        terms.insert("size".into(), json!(self.size));

        let mut agg = Map::new();
        if let Some(top_hits) = &self.top_hits {
            let mut order = Map::new();
            order.insert(MAX_SCORE_AGG.into(), json!("desc"));
            terms.insert("order".into(), Value::Object(order));
            let mut hits = Map::new();
            hits.insert("size".into(), json!(top_hits.size));
            hits.insert("_source".into(), json!({ "includes": top_hits.source }));
            if !top_hits.sort.is_empty() {
                hits.insert("sort".into(), json!(top_hits.sort));
            }
            let mut sub_aggs = Map::new();
            sub_aggs.insert(TOP_HITS_AGG.into(), json!({ "top_hits": Value::Object(hits) }));
            sub_aggs.insert(
                MAX_SCORE_AGG.into(),
                json!({ "max": { "script": { "source": "_score" } } }),
            );
            agg.insert("aggs".into(), Value::Object(sub_aggs));
        }
        agg.insert("terms".into(), Value::Object(terms));
        Value::Object(agg)
    }
}

/// Highlighted fields in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub fields: Vec<String>,
}

impl Highlight {
    pub fn to_json(&self) -> Value {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.clone(), json!({ "type": "unified" })))
            .collect();
        json!({ "fields": fields })
    }
}

/// A compiled search request, independent of pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: QueryClause,
    /// Applied after aggregations are computed.
    pub post_filter: Option<QueryClause>,
    /// In facet declaration order.
    pub aggregations: Vec<FacetAggregation>,
    /// Empty means relevance order.
    pub sort: Vec<SortClause>,
    pub highlight: Option<Highlight>,
}

impl SearchQuery {
    /// Root boolean clause, when the query has one.
    pub fn root(&self) -> Option<&BoolQuery> {
        match &self.query {
            QueryClause::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".into(), self.query.to_json());
        if let Some(post_filter) = &self.post_filter {
            body.insert("post_filter".into(), post_filter.to_json());
        }
        if !self.aggregations.is_empty() {
            let aggs: Map<String, Value> = self
                .aggregations
                .iter()
                .map(|a| (a.name.clone(), a.to_json()))
                .collect();
            body.insert("aggs".into(), Value::Object(aggs));
        }
        if !self.sort.is_empty() {
            body.insert("sort".into(), json!(self.sort));
        }
        if let Some(highlight) = &self.highlight {
            body.insert("highlight".into(), highlight.to_json());
        }
        Value::Object(body)
    }

    /// Request body with pagination applied.
    pub fn to_request_body(&self, offset: usize, limit: usize) -> Value {
        let mut body = self.to_json();
        if let Value::Object(map) = &mut body {
            map.insert("from".into(), json!(offset));
            map.insert("size".into(), json!(limit));
        }
        body
    }
}

impl Serialize for SearchQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Split `Title^3` into its field name and boost.
pub fn split_field_boost(spec: &str) -> (&str, Option<f32>) {
    match spec.rsplit_once('^') {
        Some((field, boost)) => match boost.parse::<f32>() {
            Ok(b) => (field, Some(b)),
            Err(_) => (spec, None),
        },
        None => (spec, None),
    }
}
