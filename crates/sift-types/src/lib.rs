//! # sift-types
//!
//! Shared domain types for sift.
//!
//! - [`Stage`]: publication stage of a document (draft, live, unversioned)
//! - [`DocumentId`] / [`Document`]: engine identity and indexable payload
//! - [`FieldType`] / [`FieldMapping`]: engine field typing
//! - [`FieldProvider`] / [`FieldRegistry`]: per-type field discovery
//! - [`Settings`]: layered configuration

pub mod config;
pub mod document;
pub mod error;
pub mod fields;
pub mod stage;

pub use config::{EngineKind, EngineSettings, PruneSettings, SearchSettings, Settings};
pub use document::{
    engine_type_name, format_date, parse_date, Document, DocumentId, FieldValue, DATE_FORMAT,
};
pub use error::SiftError;
pub use fields::{
    common_mapping, system, system_mapping, FieldMapping, FieldProvider, FieldRegistry,
    FieldSpec, FieldType, TypeDefinition, SCORE_FIELD,
};
pub use stage::Stage;
