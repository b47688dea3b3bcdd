//! Search profiles: explicit request parameters to a configured builder.
//!
//! A profile is the static part of a search page (fields, boosts, facets,
//! fixed filters). [`SearchProfile::request`] layers one request's
//! parameters on top of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sift_query::{FacetField, FilterValue, HierarchyFilter, QueryBuilder, QueryPreset, TermValue};
use sift_types::{FieldRegistry, SearchSettings, Stage, SCORE_FIELD};
use tracing::{debug, warn};

use crate::facets::FacetAggregator;
use crate::params::RequestParams;

pub const QUERY_PARAM: &str = "q";
pub const START_PARAM: &str = crate::facets::START_PARAM;
pub const LIMIT_PARAM: &str = "limit";
pub const SORT_PARAM: &str = "sort";
pub const DIR_PARAM: &str = "dir";
/// Comma-separated ancestor record ids restricting tree types.
pub const WITHIN_PARAM: &str = "within";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProfile {
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    #[serde(default)]
    pub boost: BTreeMap<String, f32>,

    #[serde(default)]
    pub facets: Vec<FacetField>,

    /// Bucket count per facet; `None` or 0 disables limiting
    #[serde(default = "default_facet_limit")]
    pub facet_limit: Option<u32>,

    #[serde(default)]
    pub expand_facet_results: BTreeMap<String, u32>,

    /// Types (with subtypes) the search is restricted to
    #[serde(default)]
    pub filter_types: Vec<String>,

    /// Fixed term filters applied to every request
    #[serde(default)]
    pub filters: BTreeMap<String, String>,

    /// Request parameters accepted as term filters on the field of the same name
    #[serde(default)]
    pub user_filters: Vec<String>,

    #[serde(default = "default_results_per_page")]
    pub results_per_page: usize,

    #[serde(default)]
    pub fuzziness: u32,

    #[serde(default = "default_content_boost")]
    pub content_boost: f32,

    #[serde(default)]
    pub allow_empty: bool,

    #[serde(default)]
    pub preset: QueryPreset,

    /// Path facet links point at
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Apply facet selections after aggregation so unselected buckets keep their counts
    #[serde(default)]
    pub selections_as_post_filters: bool,
}

fn default_fields() -> Vec<String> {
    vec!["Title".to_string(), "Content".to_string()]
}

fn default_facet_limit() -> Option<u32> {
    Some(sift_query::DEFAULT_FACET_LIMIT)
}

fn default_results_per_page() -> usize {
    10
}

fn default_content_boost() -> f32 {
    3.0
}

fn default_base_path() -> String {
    "/search".to_string()
}

impl Default for SearchProfile {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            boost: BTreeMap::new(),
            facets: Vec::new(),
            facet_limit: default_facet_limit(),
            expand_facet_results: BTreeMap::new(),
            filter_types: Vec::new(),
            filters: BTreeMap::new(),
            user_filters: Vec::new(),
            results_per_page: default_results_per_page(),
            fuzziness: 0,
            content_boost: default_content_boost(),
            allow_empty: false,
            preset: QueryPreset::default(),
            base_path: default_base_path(),
            selections_as_post_filters: false,
        }
    }
}

/// A configured builder plus the requested page.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub builder: QueryBuilder,
    pub offset: usize,
    pub limit: usize,
}

impl SearchProfile {
    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self {
            fields: settings.fields.clone(),
            results_per_page: settings.results_per_page,
            fuzziness: settings.fuzziness,
            content_boost: settings.content_boost,
            allow_empty: settings.allow_empty,
            ..Self::default()
        }
    }

    pub fn with_facet(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.facets.push(FacetField {
            field: field.into(),
            label: label.into(),
        });
        self
    }

    pub fn with_boost(mut self, field: impl Into<String>, boost: f32) -> Self {
        self.boost.insert(field.into(), boost);
        self
    }

    pub fn with_filter_type(mut self, type_name: impl Into<String>) -> Self {
        self.filter_types.push(type_name.into());
        self
    }

    pub fn with_user_filter(mut self, field: impl Into<String>) -> Self {
        self.user_filters.push(field.into());
        self
    }

    /// Aggregator producing links back to this profile's page.
    pub fn facet_aggregator(&self) -> FacetAggregator {
        FacetAggregator::new(self.base_path.clone()).with_labels(self.facets.iter().cloned())
    }

    /// Builder and page for one request.
    pub fn request(
        &self,
        params: &RequestParams,
        registry: &FieldRegistry,
        stage: Stage,
    ) -> SearchRequest {
        let mut builder = QueryBuilder::new();
        builder
            .set_base_query(params.get(QUERY_PARAM).unwrap_or_default())
            .set_fields(self.fields.iter().cloned())
            .set_boosts(self.boost.clone())
            .set_fuzziness(self.fuzziness)
            .set_content_boost(self.content_boost)
            .set_allow_empty(self.allow_empty)
            .set_preset(self.preset)
            .set_stage(stage)
            .add_facet_fields(
                self.facets.iter().map(|f| (f.field.clone(), f.label.clone())),
                None,
            )
            .set_facet_limit(self.facet_limit)
            .set_expand_facet_results(self.expand_facet_results.clone());

        self.apply_sort(&mut builder, params, registry);

        for (field, value) in &self.filters {
            builder.add_filter(field.clone(), value.as_str());
        }

        for field in &self.user_filters {
            match params.get(field) {
                Some(value) if !value.is_empty() => {
                    builder.add_filter(field.clone(), value);
                }
                _ => {}
            }
        }

        self.apply_selections(&mut builder, params);

        let hierarchy = self.hierarchy(params, registry);
        builder.restrict_to_hierarchy(&hierarchy);

        let offset = params
            .get(START_PARAM)
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let limit = params
            .get(LIMIT_PARAM)
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(self.results_per_page);

        SearchRequest {
            builder,
            offset,
            limit,
        }
    }

    fn apply_sort(&self, builder: &mut QueryBuilder, params: &RequestParams, registry: &FieldRegistry) {
        let Some(field) = params.get(SORT_PARAM).map(str::trim).filter(|f| !f.is_empty()) else {
            return;
        };
        let direction = params.get(DIR_PARAM).unwrap_or("desc");
        if registry.is_selectable(field) {
            builder.sort_by(field, direction);
        } else {
            warn!(field = %field, "Unknown sort field, sorting by relevance");
            builder.sort_by(SCORE_FIELD, direction);
        }
    }

    fn apply_selections(&self, builder: &mut QueryBuilder, params: &RequestParams) {
        for (field, mut values) in params.aggregation_selections() {
            if !self.facets.iter().any(|f| f.field == field) {
                debug!(field = %field, "Ignoring selection on unconfigured facet");
                continue;
            }
            let value = if values.len() == 1 {
                FilterValue::term(values.remove(0))
            } else {
                FilterValue::Terms(values.into_iter().map(TermValue::from).collect())
            };
            if self.selections_as_post_filters {
                builder.add_post_filter(field, value);
            } else {
                builder.add_filter(field, value);
            }
        }
    }

    fn hierarchy(&self, params: &RequestParams, registry: &FieldRegistry) -> HierarchyFilter {
        let mut filter = HierarchyFilter::new();
        for type_name in &self.filter_types {
            let is_tree = registry.get(type_name).is_some_and(|p| p.is_tree());
            filter = if is_tree {
                filter.with_tree_type(type_name.clone())
            } else {
                filter.with_type(type_name.clone())
            };
        }
        let roots: Vec<u64> = params
            .get_all(WITHIN_PARAM)
            .into_iter()
            .flat_map(|v| v.split(','))
            .filter_map(|id| id.trim().parse().ok())
            .collect();
        filter.within(roots)
    }
}
