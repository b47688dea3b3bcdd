//! Conversion between sift documents and tantivy documents.

use serde_json::{Map, Value as JsonValue};
use sift_types::{parse_date, Document, FieldType, FieldValue};
use tantivy::schema::Value;
use tantivy::TantivyDocument;
use tracing::debug;

use crate::error::SearchError;
use crate::schema::IndexSchema;

/// Epoch milliseconds of a date in the storage format (or RFC 3339).
pub fn date_millis(text: &str) -> Option<i64> {
    parse_date(text).map(|dt| dt.timestamp_millis())
}

/// Convert a document to a tantivy document.
///
/// Mapped fields are indexed by their mapping type; every field, mapped or
/// not, is kept in the stored `_source` JSON.
pub fn to_tantivy(schema: &IndexSchema, document: &Document) -> Result<TantivyDocument, SearchError> {
    let source = document.source();

    let mut json = Map::new();
    for (name, value) in &source {
        json.insert(name.clone(), value.to_json());
    }

    let mut doc = TantivyDocument::default();
    doc.add_text(schema.id_field(), document.id.to_string());
    doc.add_text(
        schema.source_field(),
        serde_json::to_string(&JsonValue::Object(json))?,
    );

    for (name, value) in &source {
        let Some((field, field_type)) = schema.field(name) else {
            continue;
        };
        for scalar in value.scalars() {
            match field_type {
                FieldType::Text | FieldType::Keyword => {
                    if let Some(text) = scalar_text(scalar) {
                        doc.add_text(field, text);
                    }
                }
                FieldType::Long => match scalar_long(scalar) {
                    Some(v) => doc.add_i64(field, v),
                    None => debug!(field = %name, "Skipping non-numeric value"),
                },
                FieldType::Date => match scalar_date(scalar) {
                    Some(v) => doc.add_i64(field, v),
                    None => debug!(field = %name, "Skipping unparseable date"),
                },
                FieldType::Boolean => match scalar_bool(scalar) {
                    Some(b) => doc.add_bool(field, b),
                    None => debug!(field = %name, "Skipping non-boolean value"),
                },
            }
        }
    }

    Ok(doc)
}

fn scalar_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Long(v) => Some(v.to_string()),
        FieldValue::Double(v) => Some(v.to_string()),
        FieldValue::Bool(b) => Some(b.to_string()),
        FieldValue::List(_) => None,
    }
}

fn scalar_long(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Double(v) => Some(*v as i64),
        other => other.as_i64(),
    }
}

fn scalar_date(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Text(s) => date_millis(s),
        FieldValue::Long(v) => Some(*v),
        _ => None,
    }
}

fn scalar_bool(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Long(v) => Some(*v != 0),
        FieldValue::Text(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Engine identity of a stored document.
pub fn stored_id(schema: &IndexSchema, doc: &TantivyDocument) -> String {
    doc.get_first(schema.id_field())
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Stored `_source` JSON of a document; empty if absent or unreadable.
pub fn stored_source(schema: &IndexSchema, doc: &TantivyDocument) -> Map<String, JsonValue> {
    doc.get_first(schema.source_field())
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_str::<Map<String, JsonValue>>(s).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sift_types::{system, system_mapping, FieldSpec, Stage};

    fn schema() -> IndexSchema {
        let mut mapping = system_mapping();
        mapping.insert("Title".into(), FieldSpec::new(FieldType::Text));
        mapping.insert("Tags".into(), FieldSpec::new(FieldType::Keyword));
        IndexSchema::build(&mapping)
    }

    #[test]
    fn test_to_tantivy_indexes_system_fields() {
        let schema = schema();
        let edited = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let document = Document::new("Article", 7, Stage::Live)
            .with_field("Title", "Open source")
            .with_field("Tags", vec!["a".to_string(), "b".to_string()])
            .with_field("Unmapped", "kept in source")
            .with_last_edited(edited);

        let doc = to_tantivy(&schema, &document).unwrap();
        assert_eq!(stored_id(&schema, &doc), "Article_7_Live");

        let (tags, _) = schema.field("Tags").unwrap();
        assert_eq!(doc.get_all(tags).count(), 2);

        let (edited_field, _) = schema.field(system::LAST_EDITED).unwrap();
        assert_eq!(
            doc.get_first(edited_field).and_then(|v| v.as_i64()),
            Some(edited.timestamp_millis())
        );

        let source = stored_source(&schema, &doc);
        assert_eq!(source["Unmapped"], JsonValue::from("kept in source"));
        assert_eq!(source[system::CLASS_NAME], JsonValue::from("Article"));
    }

    #[test]
    fn test_unversioned_indexes_both_stage_labels() {
        let schema = schema();
        let document = Document::new("File", 1, Stage::Unversioned);
        let doc = to_tantivy(&schema, &document).unwrap();
        let (stage, _) = schema.field(system::STAGE).unwrap();
        let labels: Vec<&str> = doc.get_all(stage).filter_map(|v| v.as_str()).collect();
        assert_eq!(labels, vec!["Live", "Stage"]);
    }

    #[test]
    fn test_date_millis() {
        assert_eq!(date_millis("1970-01-01 00:00:01"), Some(1000));
        assert_eq!(date_millis("not a date"), None);
    }
}
