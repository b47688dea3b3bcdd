//! Tantivy schema derived from a field mapping.
//!
//! Every mapped field becomes one tantivy field:
//! - text: TEXT | STORED (tokenized, positions for phrases, stored for snippets)
//! - keyword: STRING | STORED (raw term)
//! - long, date: i64 INDEXED | STORED | FAST (dates as epoch milliseconds)
//! - boolean: INDEXED | STORED | FAST
//!
//! Two internal fields are always present: `_id` (engine identity, the
//! upsert key) and `_source` (stored JSON of the full document).

use std::collections::BTreeMap;

use sift_types::{FieldMapping, FieldType};
use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING, TEXT};

use crate::error::SearchError;

/// Identity field name.
pub const ID_FIELD: &str = "_id";
/// Stored source field name.
pub const SOURCE_FIELD: &str = "_source";

/// Schema plus field handles keyed by mapped field name.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    schema: Schema,
    id: Field,
    source: Field,
    fields: BTreeMap<String, (Field, FieldType)>,
}

impl IndexSchema {
    /// Build a fresh schema for `mapping`.
    pub fn build(mapping: &FieldMapping) -> Self {
        let mut builder = Schema::builder();
        let id = builder.add_text_field(ID_FIELD, STRING | STORED);
        let source = builder.add_text_field(SOURCE_FIELD, STORED);

        let mut fields = BTreeMap::new();
        for (name, spec) in mapping {
            if is_reserved(name) {
                continue;
            }
            let field = match spec.field_type {
                FieldType::Text => builder.add_text_field(name, TEXT | STORED),
                FieldType::Keyword => builder.add_text_field(name, STRING | STORED),
                FieldType::Long | FieldType::Date => {
                    builder.add_i64_field(name, INDEXED | STORED | FAST)
                }
                FieldType::Boolean => builder.add_bool_field(name, INDEXED | STORED | FAST),
            };
            fields.insert(name.clone(), (field, spec.field_type));
        }

        Self {
            schema: builder.build(),
            id,
            source,
            fields,
        }
    }

    /// Resolve field handles of an existing index against the mapping it was
    /// created with.
    pub fn from_schema(schema: Schema, mapping: &FieldMapping) -> Result<Self, SearchError> {
        let id = schema
            .get_field(ID_FIELD)
            .map_err(|_| SearchError::SchemaMismatch("missing _id field".into()))?;
        let source = schema
            .get_field(SOURCE_FIELD)
            .map_err(|_| SearchError::SchemaMismatch("missing _source field".into()))?;

        let mut fields = BTreeMap::new();
        for (name, spec) in mapping {
            if is_reserved(name) {
                continue;
            }
            let field = schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {name} field")))?;
            fields.insert(name.clone(), (field, spec.field_type));
        }

        Ok(Self {
            schema,
            id,
            source,
            fields,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn id_field(&self) -> Field {
        self.id
    }

    pub fn source_field(&self) -> Field {
        self.source
    }

    /// Handle and type of a mapped field.
    pub fn field(&self, name: &str) -> Option<(Field, FieldType)> {
        self.fields.get(name).copied()
    }

    /// Tokenized fields, the default targets of Lucene query strings.
    pub fn text_fields(&self) -> Vec<Field> {
        self.fields
            .values()
            .filter(|(_, ty)| *ty == FieldType::Text)
            .map(|(field, _)| *field)
            .collect()
    }

    /// Field types by name.
    pub fn field_types(&self) -> BTreeMap<String, FieldType> {
        self.fields
            .iter()
            .map(|(name, (_, ty))| (name.clone(), *ty))
            .collect()
    }

    /// Check that every field of `mapping` exists with the same type.
    ///
    /// A tantivy schema is fixed at creation, so new fields require a rebuild.
    pub fn check_compatible(&self, mapping: &FieldMapping) -> Result<(), SearchError> {
        for (name, spec) in mapping {
            if is_reserved(name) {
                continue;
            }
            match self.fields.get(name) {
                Some((_, ty)) if *ty == spec.field_type => {}
                Some((_, ty)) => {
                    return Err(SearchError::SchemaMismatch(format!(
                        "{name} is {} in the index but {} in the mapping",
                        ty.as_str(),
                        spec.field_type.as_str()
                    )))
                }
                None => {
                    return Err(SearchError::SchemaMismatch(format!(
                        "{name} is not in the index; rebuild it to add fields"
                    )))
                }
            }
        }
        Ok(())
    }
}

fn is_reserved(name: &str) -> bool {
    name == ID_FIELD || name == SOURCE_FIELD || name.is_empty() || name.starts_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_types::{system_mapping, FieldSpec};

    fn mapping() -> FieldMapping {
        let mut mapping = system_mapping();
        mapping.insert("Title".into(), FieldSpec::new(FieldType::Text));
        mapping.insert("Category".into(), FieldSpec::new(FieldType::Keyword));
        mapping
    }

    #[test]
    fn test_build_schema() {
        let schema = IndexSchema::build(&mapping());
        assert!(schema.schema().get_field(ID_FIELD).is_ok());
        assert!(schema.schema().get_field(SOURCE_FIELD).is_ok());
        assert_eq!(schema.field("Title").map(|(_, t)| t), Some(FieldType::Text));
        assert_eq!(
            schema.field("LastEdited").map(|(_, t)| t),
            Some(FieldType::Date)
        );
        assert_eq!(schema.text_fields().len(), 1);
    }

    #[test]
    fn test_from_schema_roundtrip() {
        let built = IndexSchema::build(&mapping());
        let reopened = IndexSchema::from_schema(built.schema().clone(), &mapping()).unwrap();
        assert_eq!(reopened.field_types(), built.field_types());
    }

    #[test]
    fn test_from_schema_missing_field() {
        let built = IndexSchema::build(&system_mapping());
        let result = IndexSchema::from_schema(built.schema().clone(), &mapping());
        assert!(matches!(result, Err(SearchError::SchemaMismatch(_))));
    }

    #[test]
    fn test_check_compatible() {
        let schema = IndexSchema::build(&mapping());
        assert!(schema.check_compatible(&system_mapping()).is_ok());

        let mut changed = mapping();
        changed.insert("Category".into(), FieldSpec::new(FieldType::Text));
        assert!(schema.check_compatible(&changed).is_err());

        let mut added = mapping();
        added.insert("Summary".into(), FieldSpec::new(FieldType::Text));
        assert!(schema.check_compatible(&added).is_err());
    }

    #[test]
    fn test_reserved_names_skipped() {
        let mut mapping = mapping();
        mapping.insert("_id".into(), FieldSpec::new(FieldType::Keyword));
        let schema = IndexSchema::build(&mapping);
        assert!(schema.field("_id").is_none());
    }
}
