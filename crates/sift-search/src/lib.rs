//! # sift-search
//!
//! Runs compiled queries against a search engine and shapes the results.
//!
//! ## Features
//! - [`SearchEngine`] boundary with two backends: an embedded tantivy index
//!   ([`TantivyEngine`]) and an Elasticsearch HTTP client ([`ElasticEngine`])
//! - [`SearchExecutor`]: paginated results, engine failures mapped to a
//!   generic user-facing error
//! - [`FacetAggregator`]: facet buckets with links that narrow the search
//! - [`SearchProfile`]: request parameters to a configured query builder

pub mod aggregate;
pub mod document;
pub mod elastic;
pub mod engine;
pub mod error;
pub mod executor;
pub mod facets;
pub mod index;
pub mod local;
pub mod params;
pub mod profile;
pub mod schema;
pub mod translate;

pub use elastic::{ElasticConfig, ElasticEngine};
pub use engine::{RawAggregation, RawBucket, RawHit, RawSearchResponse, SearchEngine};
pub use error::{SearchError, SearchFailed};
pub use executor::{PaginatedResult, SearchExecutor, SearchHit};
pub use facets::{FacetAggregator, FacetBucket, FacetGroup, SelectedFacet};
pub use index::{SearchIndex, SearchIndexConfig};
pub use local::TantivyEngine;
pub use params::{aggregation_field, aggregation_key, RequestParams};
pub use profile::{SearchProfile, SearchRequest};
pub use schema::IndexSchema;
