//! Indexable documents and their engine identity.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SiftError;
use crate::fields::system;
use crate::stage::Stage;

/// Storage format for date fields.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp the way date fields are stored.
pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.format(DATE_FORMAT).to_string()
}

/// Parse a stored date, accepting RFC 3339 as well as the storage format.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalize a content type name for use in identities and type filters.
///
/// Namespace separators are not allowed in engine type names.
pub fn engine_type_name(type_name: &str) -> String {
    type_name.replace("::", "_").replace('\\', "_")
}

/// Globally unique engine identity of a document: `{type}_{record}_{stage}`.
///
/// The record id is numeric and the stage label has no underscore, so the
/// identity can be split from the right even when the type name contains
/// underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId {
    type_name: String,
    record_id: u64,
    stage: Stage,
}

impl DocumentId {
    pub fn new(type_name: &str, record_id: u64, stage: Stage) -> Self {
        Self {
            type_name: engine_type_name(type_name),
            record_id,
            stage,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn record_id(&self) -> u64 {
        self.record_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.type_name,
            self.record_id,
            self.stage.label()
        )
    }
}

impl FromStr for DocumentId {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SiftError::InvalidInput(format!("malformed document id: {s}"));

        let mut parts = s.rsplitn(3, '_');
        let label = parts.next().ok_or_else(invalid)?;
        let record = parts.next().ok_or_else(invalid)?;
        let type_name = parts.next().filter(|t| !t.is_empty()).ok_or_else(invalid)?;

        let stage = Stage::from_label(label).ok_or_else(invalid)?;
        let record_id = record.parse::<u64>().map_err(|_| invalid())?;

        Ok(Self {
            type_name: type_name.to_string(),
            record_id,
            stage,
        })
    }
}

impl TryFrom<String> for DocumentId {
    type Error = SiftError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.to_string()
    }
}

/// A field value as written to the engine.
///
/// Dates are carried as text in [`DATE_FORMAT`]; the field mapping decides
/// how the engine interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn date(dt: &DateTime<Utc>) -> Self {
        FieldValue::Text(format_date(dt))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Long(v) => Some(*v),
            FieldValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Flatten into scalar values; lists are expanded, nested lists included.
    pub fn scalars(&self) -> Vec<&FieldValue> {
        match self {
            FieldValue::List(items) => items.iter().flat_map(|v| v.scalars()).collect(),
            scalar => vec![scalar],
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Long(v) => serde_json::Value::from(*v),
            FieldValue::Double(v) => serde_json::Value::from(*v),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(FieldValue::to_json).collect())
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items.into_iter().map(FieldValue::Text).collect())
    }
}

/// A document ready to be written to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub type_name: String,
    pub record_id: u64,
    pub stage: Stage,
    /// Concrete type first, root type last.
    pub type_hierarchy: Vec<String>,
    /// Ancestor record ids for tree-structured content, nearest first.
    #[serde(default)]
    pub parents_hierarchy: Vec<u64>,
    pub public_view: bool,
    pub last_edited: DateTime<Utc>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new(type_name: &str, record_id: u64, stage: Stage) -> Self {
        let type_name = engine_type_name(type_name);
        Self {
            id: DocumentId::new(&type_name, record_id, stage),
            type_hierarchy: vec![type_name.clone()],
            type_name,
            record_id,
            stage,
            parents_hierarchy: Vec::new(),
            public_view: true,
            last_edited: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set the ancestry chain. The concrete type is kept at the head.
    pub fn with_type_hierarchy(mut self, hierarchy: Vec<String>) -> Self {
        let mut chain: Vec<String> = vec![self.type_name.clone()];
        for ancestor in hierarchy.iter().map(|t| engine_type_name(t)) {
            if !chain.contains(&ancestor) {
                chain.push(ancestor);
            }
        }
        self.type_hierarchy = chain;
        self
    }

    pub fn with_parents(mut self, parents: Vec<u64>) -> Self {
        self.parents_hierarchy = parents;
        self
    }

    pub fn with_last_edited(mut self, last_edited: DateTime<Utc>) -> Self {
        self.last_edited = last_edited;
        self
    }

    pub fn with_public_view(mut self, public_view: bool) -> Self {
        self.public_view = public_view;
        self
    }

    /// Full field set as stored in the engine, system fields included.
    ///
    /// System fields win over user fields of the same name.
    pub fn source(&self) -> BTreeMap<String, FieldValue> {
        let mut source = self.fields.clone();
        source.insert(system::ID.to_string(), FieldValue::Long(self.record_id as i64));
        source.insert(
            system::CLASS_NAME.to_string(),
            FieldValue::Text(self.type_name.clone()),
        );
        source.insert(
            system::CLASS_NAME_HIERARCHY.to_string(),
            FieldValue::from(self.type_hierarchy.clone()),
        );
        source.insert(
            system::STAGE.to_string(),
            FieldValue::List(
                self.stage
                    .index_labels()
                    .iter()
                    .map(|l| FieldValue::from(*l))
                    .collect(),
            ),
        );
        source.insert(
            system::PUBLIC_VIEW.to_string(),
            FieldValue::Bool(self.public_view),
        );
        source.insert(
            system::LAST_EDITED.to_string(),
            FieldValue::date(&self.last_edited),
        );
        if !self.parents_hierarchy.is_empty() {
            source.insert(
                system::PARENTS_HIERARCHY.to_string(),
                FieldValue::List(
                    self.parents_hierarchy
                        .iter()
                        .map(|id| FieldValue::Long(*id as i64))
                        .collect(),
                ),
            );
        }
        source
    }
}
