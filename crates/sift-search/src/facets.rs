//! Facet buckets with navigable links.
//!
//! A bucket link is the current request with pagination dropped and the
//! bucket's value merged into the facet selections. Links depend only on the
//! request parameters, the field and the bucket key.

use serde::Serialize;
use sift_query::{FacetField, SearchConfiguration};

use crate::engine::RawAggregation;
use crate::executor::SearchHit;
use crate::params::{aggregation_field, aggregation_key, RequestParams};

/// Pagination parameter dropped from facet links.
pub const START_PARAM: &str = "start";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetBucket {
    pub key: String,
    pub count: u64,
    /// Current search narrowed to this bucket
    pub link: String,
    /// Whether the bucket is already selected
    pub selected: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub top_hits: Vec<SearchHit>,
}

/// Buckets of one facet field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetGroup {
    pub field: String,
    pub label: String,
    pub buckets: Vec<FacetBucket>,
}

/// An active selection with a link that drops it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedFacet {
    pub field: String,
    pub label: String,
    pub value: String,
    pub remove_link: String,
}

/// Turns raw aggregation buckets into facet groups.
#[derive(Debug, Clone)]
pub struct FacetAggregator {
    base_path: String,
    labels: Vec<FacetField>,
    min_count: u64,
}

impl FacetAggregator {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            labels: Vec::new(),
            min_count: 0,
        }
    }

    /// Aggregator labelled with a configuration's facet fields.
    pub fn from_config(config: &SearchConfiguration, base_path: impl Into<String>) -> Self {
        Self::new(base_path).with_labels(config.facet_fields.iter().cloned())
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = FacetField>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Drop buckets with fewer documents than `min_count`.
    pub fn with_min_count(mut self, min_count: u64) -> Self {
        self.min_count = min_count;
        self
    }

    /// Display label of a field, falling back to the field name.
    pub fn label<'a>(&'a self, field: &'a str) -> &'a str {
        self.labels
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.label.as_str())
            .unwrap_or(field)
    }

    /// One group per aggregation, fields then buckets in engine order.
    pub fn aggregate(&self, aggregations: &[RawAggregation], params: &RequestParams) -> Vec<FacetGroup> {
        let selections = params.aggregation_selections();
        aggregations
            .iter()
            .map(|agg| {
                let selected_values = selections
                    .iter()
                    .find(|(f, _)| *f == agg.name)
                    .map(|(_, values)| values.as_slice())
                    .unwrap_or_default();
                let buckets = agg
                    .buckets
                    .iter()
                    .filter(|b| b.doc_count >= self.min_count)
                    .map(|bucket| FacetBucket {
                        key: bucket.key.clone(),
                        count: bucket.doc_count,
                        link: self.link(params, &agg.name, &bucket.key),
                        selected: selected_values.contains(&bucket.key),
                        top_hits: bucket.top_hits.iter().cloned().map(SearchHit::from).collect(),
                    })
                    .collect();
                FacetGroup {
                    field: agg.name.clone(),
                    label: self.label(&agg.name).to_string(),
                    buckets,
                }
            })
            .collect()
    }

    /// Link selecting `key` for `field` in addition to current selections.
    pub fn link(&self, params: &RequestParams, field: &str, key: &str) -> String {
        let mut selections = params.aggregation_selections();
        match selections.iter_mut().find(|(f, _)| f == field) {
            Some((_, values)) => {
                if !values.iter().any(|v| v == key) {
                    values.push(key.to_string());
                }
            }
            None => selections.push((field.to_string(), vec![key.to_string()])),
        }
        self.with_selections(params, &selections)
    }

    /// Current selections, each with a link that removes it.
    pub fn selected(&self, params: &RequestParams) -> Vec<SelectedFacet> {
        let selections = params.aggregation_selections();
        let mut out = Vec::new();
        for (field, values) in &selections {
            for value in values {
                let remaining: Vec<(String, Vec<String>)> = selections
                    .iter()
                    .map(|(f, vs)| {
                        let vs = vs
                            .iter()
                            .filter(|v| !(f == field && *v == value))
                            .cloned()
                            .collect();
                        (f.clone(), vs)
                    })
                    .collect();
                out.push(SelectedFacet {
                    field: field.clone(),
                    label: self.label(field).to_string(),
                    value: value.clone(),
                    remove_link: self.with_selections(params, &remaining),
                });
            }
        }
        out
    }

    fn with_selections(&self, params: &RequestParams, selections: &[(String, Vec<String>)]) -> String {
        let mut params = params.clone();
        params.remove(START_PARAM);
        params.retain(|k, _| aggregation_field(k).is_none());
        for (field, values) in selections {
            for value in values {
                params.append(aggregation_key(field), value.clone());
            }
        }
        let query = params.to_query_string();
        if query.is_empty() {
            self.base_path.clone()
        } else {
            format!("{}?{query}", self.base_path)
        }
    }
}
