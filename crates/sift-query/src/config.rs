//! Declarative search configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sift_types::{Stage, SCORE_FIELD};

use crate::error::QueryError;
use crate::filter::FilterSet;

/// Bucket count per facet when none is configured.
pub const DEFAULT_FACET_LIMIT: u32 = 50;

/// Bucket count per facet when limiting is explicitly disabled.
pub const FACET_SIZE_CAP: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(QueryError::InvalidSortDirection(other.to_string())),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested result order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn relevance() -> Self {
        Self {
            field: SCORE_FIELD.to_string(),
            direction: SortDirection::Desc,
        }
    }

    pub fn is_relevance(&self) -> bool {
        self.field == SCORE_FIELD
    }
}

/// How the free-text part of the query is matched.
///
/// `Standard` combines wildcard syntax matching, fuzzy best-fields matching
/// and exact keyword matching. The other presets keep earlier, narrower
/// matching behaviour available through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPreset {
    #[default]
    Standard,
    /// One Lucene query string: `(Field:term*)^boost OR ...`
    Legacy,
    /// Best-fields match over every field, boosts applied per field
    Simple,
}

impl FromStr for QueryPreset {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(QueryPreset::Standard),
            "legacy" => Ok(QueryPreset::Legacy),
            "simple" => Ok(QueryPreset::Simple),
            other => Err(QueryError::InvalidPreset(other.to_string())),
        }
    }
}

/// A facet field and its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetField {
    pub field: String,
    pub label: String,
}

/// Everything that describes one search. Consumed by [`crate::compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfiguration {
    pub user_query: String,
    /// Fields searched by default, in wildcard/boost application order.
    pub fields: Vec<String>,
    pub boost: BTreeMap<String, f32>,
    /// Constant-score boosts keyed by query-string expression.
    pub boost_field_values: BTreeMap<String, f32>,
    pub filters: FilterSet,
    pub post_filters: FilterSet,
    /// In declaration order; one entry per field.
    pub facet_fields: Vec<FacetField>,
    /// `None` disables limiting (engine cap applies).
    pub facet_limit: Option<u32>,
    pub facet_field_limits: BTreeMap<String, u32>,
    /// Representative documents per bucket, per facet field.
    pub expand_facet_results: BTreeMap<String, u32>,
    /// `None` sorts by relevance.
    pub sort: Option<SortSpec>,
    pub fuzziness: u32,
    pub allow_empty: bool,
    pub content_boost: f32,
    pub enable_query_wildcard: bool,
    pub preset: QueryPreset,
    pub highlight_fields: Vec<String>,
    /// Viewing stage the query is restricted to.
    pub stage: Stage,
}

impl Default for SearchConfiguration {
    fn default() -> Self {
        Self {
            user_query: String::new(),
            fields: Vec::new(),
            boost: BTreeMap::new(),
            boost_field_values: BTreeMap::new(),
            filters: FilterSet::default(),
            post_filters: FilterSet::default(),
            facet_fields: Vec::new(),
            facet_limit: Some(DEFAULT_FACET_LIMIT),
            facet_field_limits: BTreeMap::new(),
            expand_facet_results: BTreeMap::new(),
            sort: None,
            fuzziness: 0,
            allow_empty: false,
            content_boost: 3.0,
            enable_query_wildcard: true,
            preset: QueryPreset::Standard,
            highlight_fields: vec!["Content".to_string()],
            stage: Stage::Live,
        }
    }
}

impl SearchConfiguration {
    /// Bucket count requested for a facet field.
    pub fn facet_size(&self, field: &str) -> u32 {
        if let Some(limit) = self.facet_field_limits.get(field) {
            return *limit;
        }
        self.facet_limit.unwrap_or(FACET_SIZE_CAP)
    }

    /// Display label of a facet field, falling back to the field name.
    pub fn facet_label<'a>(&'a self, field: &'a str) -> &'a str {
        self.facet_fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.label.as_str())
            .unwrap_or(field)
    }

    pub fn is_facet_field(&self, field: &str) -> bool {
        self.facet_fields.iter().any(|f| f.field == field)
    }

    /// Default fields with `^boost` suffixes where a boost is configured.
    pub fn fields_with_boosts(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| match self.boost.get(f) {
                Some(b) => format!("{f}^{b}"),
                None => f.clone(),
            })
            .collect()
    }
}
