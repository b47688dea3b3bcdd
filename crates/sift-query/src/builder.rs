//! Incremental construction of a [`SearchConfiguration`].

use std::collections::BTreeMap;

use sift_types::{system, Stage, SCORE_FIELD};
use tracing::warn;

use crate::compile::compile;
use crate::config::{FacetField, QueryPreset, SearchConfiguration, SortDirection, SortSpec};
use crate::dsl::SearchQuery;
use crate::filter::{FilterValue, HierarchyFilter};

/// Accumulates configuration calls; [`QueryBuilder::compile`] is repeatable
/// and never changes the builder.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    config: SearchConfiguration,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: SearchConfiguration) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfiguration {
        &self.config
    }

    /// Snapshot of the accumulated configuration.
    pub fn build(&self) -> SearchConfiguration {
        self.config.clone()
    }

    pub fn compile(&self) -> SearchQuery {
        compile(&self.config)
    }

    pub fn set_base_query(&mut self, query: impl Into<String>) -> &mut Self {
        self.config.user_query = query.into();
        self
    }

    pub fn set_fields<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fields.clear();
        for field in fields {
            let field = field.into();
            if !self.config.fields.contains(&field) {
                self.config.fields.push(field);
            }
        }
        self
    }

    /// Per-field score multiplier. Non-positive boosts are ignored.
    pub fn set_boost(&mut self, field: impl Into<String>, boost: f32) -> &mut Self {
        let field = field.into();
        if boost > 0.0 {
            self.config.boost.insert(field, boost);
        } else {
            warn!(field = %field, boost, "Ignoring non-positive field boost");
        }
        self
    }

    pub fn set_boosts(&mut self, boosts: BTreeMap<String, f32>) -> &mut Self {
        for (field, boost) in boosts {
            self.set_boost(field, boost);
        }
        self
    }

    /// Constant-score boost for documents matching a query-string expression.
    pub fn set_boost_field_value(
        &mut self,
        expression: impl Into<String>,
        boost: f32,
    ) -> &mut Self {
        self.config
            .boost_field_values
            .insert(expression.into(), boost);
        self
    }

    pub fn add_filter(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> &mut Self {
        self.config.filters.insert(key, value.into());
        self
    }

    pub fn add_post_filter(
        &mut self,
        key: impl Into<String>,
        value: impl Into<FilterValue>,
    ) -> &mut Self {
        self.config.post_filters.insert(key, value.into());
        self
    }

    /// Drop a filter key from both filters and post filters.
    pub fn remove_filter(&mut self, key: &str) -> bool {
        let removed = self.config.filters.remove(key).is_some();
        self.config.post_filters.remove(key).is_some() || removed
    }

    /// Restrict results to types (and their subtypes) through the hierarchy field.
    pub fn restrict_to_hierarchy(&mut self, filter: &HierarchyFilter) -> &mut Self {
        if let Some(clause) = filter.to_clause() {
            self.config
                .filters
                .insert(system::CLASS_NAME_HIERARCHY, FilterValue::Clause(clause));
        }
        self
    }

    /// Merge another configuration's filters and post filters into this one.
    pub fn and_with(&mut self, other: &SearchConfiguration) -> &mut Self {
        for (key, value) in other.filters.iter() {
            self.config.filters.insert(key, value.clone());
        }
        for (key, value) in other.post_filters.iter() {
            self.config.post_filters.insert(key, value.clone());
        }
        self
    }

    /// Add facet fields with their labels.
    ///
    /// `limit` of `Some(0)` disables limiting; `None` keeps the current limit.
    pub fn add_facet_fields<I, F, L>(&mut self, fields: I, limit: Option<u32>) -> &mut Self
    where
        I: IntoIterator<Item = (F, L)>,
        F: Into<String>,
        L: Into<String>,
    {
        for (field, label) in fields {
            let field = field.into();
            let label = label.into();
            match self.config.facet_fields.iter_mut().find(|f| f.field == field) {
                Some(existing) => existing.label = label,
                None => self.config.facet_fields.push(FacetField { field, label }),
            }
        }
        if let Some(limit) = limit {
            self.set_facet_limit(Some(limit));
        }
        self
    }

    /// Global bucket limit. `None` or `Some(0)` disables limiting.
    pub fn set_facet_limit(&mut self, limit: Option<u32>) -> &mut Self {
        self.config.facet_limit = limit.filter(|l| *l > 0);
        self
    }

    pub fn add_facet_field_limit(&mut self, field: impl Into<String>, limit: u32) -> &mut Self {
        self.config.facet_field_limits.insert(field.into(), limit);
        self
    }

    /// Representative documents per bucket for the given facet fields.
    pub fn set_expand_facet_results(&mut self, expand: BTreeMap<String, u32>) -> &mut Self {
        self.config.expand_facet_results = expand;
        self
    }

    pub fn set_fuzziness(&mut self, fuzziness: u32) -> &mut Self {
        self.config.fuzziness = fuzziness;
        self
    }

    pub fn set_allow_empty(&mut self, allow_empty: bool) -> &mut Self {
        self.config.allow_empty = allow_empty;
        self
    }

    pub fn set_content_boost(&mut self, boost: f32) -> &mut Self {
        self.config.content_boost = boost;
        self
    }

    pub fn set_query_wildcard(&mut self, enabled: bool) -> &mut Self {
        self.config.enable_query_wildcard = enabled;
        self
    }

    pub fn set_preset(&mut self, preset: QueryPreset) -> &mut Self {
        self.config.preset = preset;
        self
    }

    pub fn set_highlight_fields<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.highlight_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn set_stage(&mut self, stage: Stage) -> &mut Self {
        if stage == Stage::Unversioned {
            warn!("Unversioned is not a viewing stage, using live");
        }
        self.config.stage = stage;
        self
    }

    /// Sort on a field. An unknown direction falls back to descending; an
    /// empty field or `_score` sorts by relevance.
    pub fn sort_by(&mut self, field: &str, direction: &str) -> &mut Self {
        let direction = direction.parse::<SortDirection>().unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to descending sort");
            SortDirection::Desc
        });
        let field = field.trim();
        self.config.sort = if field.is_empty() || field == SCORE_FIELD {
            if direction == SortDirection::Desc {
                None
            } else {
                Some(SortSpec {
                    field: SCORE_FIELD.to_string(),
                    direction,
                })
            }
        } else {
            Some(SortSpec {
                field: field.to_string(),
                direction,
            })
        };
        self
    }
}
