//! # sift-query
//!
//! Builds structured search queries from a declarative configuration.
//!
//! A [`QueryBuilder`] accumulates a [`SearchConfiguration`]; [`compile`] turns
//! a configuration into a [`SearchQuery`] (an Elasticsearch-style query DSL
//! value). Compilation is pure: no I/O, no shared state, repeatable.
//!
//! ```
//! use sift_query::{QueryBuilder, FilterValue};
//! use sift_types::Stage;
//!
//! let mut builder = QueryBuilder::new();
//! builder
//!     .set_base_query("open source")
//!     .set_fields(["Title", "Content"])
//!     .set_boost("Title", 3.0)
//!     .add_filter("ClassName", FilterValue::term("Article"))
//!     .set_stage(Stage::Live);
//! let query = builder.compile();
//! assert!(query.to_json()["query"]["bool"]["must"].is_array());
//! ```

pub mod builder;
pub mod compile;
pub mod config;
pub mod dsl;
pub mod error;
pub mod filter;
pub mod sanitize;

pub use builder::QueryBuilder;
pub use compile::compile;
pub use config::{
    FacetField, QueryPreset, SearchConfiguration, SortDirection, SortSpec,
    DEFAULT_FACET_LIMIT, FACET_SIZE_CAP,
};
pub use dsl::{
    split_field_boost, BoolQuery, ConstantScore, FacetAggregation, Highlight, MatchAll, MultiMatch,
    MultiMatchType, Operator, QueryClause, QueryStringQuery, RangeBounds, RangeQuery, SearchQuery,
    SimpleQueryString, SortClause, TermQuery, TermValue, TermsQuery, TopHits, MAX_SCORE_AGG,
    TOP_HITS_AGG,
};
pub use error::QueryError;
pub use filter::{FilterSet, FilterValue, HierarchyFilter};
pub use sanitize::{filter_query, is_structured, parse, wildcard};
