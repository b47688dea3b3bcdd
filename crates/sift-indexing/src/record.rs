//! Records that can be turned into search documents.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_types::{parse_date, FieldValue, Stage};

use crate::error::IndexingError;

/// Content that can be indexed.
///
/// Stage is supplied by the caller; the record only says whether it is
/// versioned at all.
pub trait SearchableRecord: Send + Sync {
    fn type_name(&self) -> &str;

    fn record_id(&self) -> u64;

    /// Ancestor type names, nearest first. The concrete type is implied.
    fn type_hierarchy(&self) -> Vec<String> {
        Vec::new()
    }

    /// Ancestor record ids, nearest first.
    fn parents_hierarchy(&self) -> Vec<u64> {
        Vec::new()
    }

    /// Field name to value; filtered against the type's mapping on indexing.
    fn fields(&self) -> BTreeMap<String, FieldValue>;

    /// Records hidden from search are removed instead of indexed.
    fn show_in_search(&self) -> bool {
        true
    }

    fn public_view(&self) -> bool {
        true
    }

    fn last_edited(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn is_versioned(&self) -> bool {
        true
    }
}

/// Walk a parent chain from `record_id`.
///
/// Stops at a missing parent, a zero id, a self-parent or an ancestor
/// already visited.
pub fn walk_parents(record_id: u64, parent_of: impl Fn(u64) -> Option<u64>) -> Vec<u64> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([record_id]);
    let mut current = record_id;
    while let Some(parent) = parent_of(current) {
        if parent == 0 || !seen.insert(parent) {
            break;
        }
        chain.push(parent);
        current = parent;
    }
    chain
}

fn default_true() -> bool {
    true
}

/// A record loaded from JSON.
///
/// ```json
/// {"type": "Article", "id": 1, "published": true,
///  "last_edited": "2024-01-02 10:00:00",
///  "fields": {"Title": "Open source", "Category": "A"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub type_name: String,

    pub id: u64,

    /// Ancestor types, nearest first
    #[serde(default)]
    pub ancestors: Vec<String>,

    #[serde(default)]
    pub parent_id: Option<u64>,

    /// Filled from `parent_id` links when empty
    #[serde(default)]
    pub parents: Vec<u64>,

    #[serde(default = "default_true")]
    pub versioned: bool,

    /// Whether a Live version exists
    #[serde(default)]
    pub published: bool,

    #[serde(default = "default_true")]
    pub show_in_search: bool,

    #[serde(default = "default_true")]
    pub public_view: bool,

    /// `yyyy-MM-dd HH:mm:ss`; unparsable or missing means now
    #[serde(default)]
    pub last_edited: Option<String>,

    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, id: u64) -> Self {
        Self {
            type_name: type_name.into(),
            id,
            ancestors: Vec::new(),
            parent_id: None,
            parents: Vec::new(),
            versioned: true,
            published: false,
            show_in_search: true,
            public_view: true,
            last_edited: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_last_edited(mut self, last_edited: &DateTime<Utc>) -> Self {
        self.last_edited = Some(sift_types::format_date(last_edited));
        self
    }

    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.show_in_search = false;
        self
    }

    /// Records from a JSON file holding one record or an array of records.
    pub fn load_all(path: &Path) -> Result<Vec<Record>, IndexingError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_all(&text)
    }

    /// Stages the record exists in: draft (and live once published) for
    /// versioned records, the single unversioned stage otherwise.
    pub fn stages(&self) -> Vec<Stage> {
        match (self.versioned, self.published) {
            (false, _) => vec![Stage::Unversioned],
            (true, true) => vec![Stage::Draft, Stage::Live],
            (true, false) => vec![Stage::Draft],
        }
    }

    /// Fill empty `parents` chains from `parent_id` links within each type.
    pub fn resolve_parents(records: &mut [Record]) {
        let links: HashMap<(String, u64), u64> = records
            .iter()
            .filter_map(|r| r.parent_id.map(|p| ((r.type_name.clone(), r.id), p)))
            .collect();
        for record in records.iter_mut() {
            if record.parents.is_empty() && record.parent_id.is_some() {
                let type_name = record.type_name.clone();
                record.parents =
                    walk_parents(record.id, |id| links.get(&(type_name.clone(), id)).copied());
            }
        }
    }

    pub fn parse_all(text: &str) -> Result<Vec<Record>, IndexingError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let records = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };
        Ok(records)
    }
}

impl SearchableRecord for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn record_id(&self) -> u64 {
        self.id
    }

    fn type_hierarchy(&self) -> Vec<String> {
        self.ancestors.clone()
    }

    fn parents_hierarchy(&self) -> Vec<u64> {
        if !self.parents.is_empty() {
            return self.parents.clone();
        }
        match self.parent_id {
            Some(parent) if parent != 0 && parent != self.id => vec![parent],
            _ => Vec::new(),
        }
    }

    fn fields(&self) -> BTreeMap<String, FieldValue> {
        self.fields.clone()
    }

    fn show_in_search(&self) -> bool {
        self.show_in_search
    }

    fn public_view(&self) -> bool {
        self.public_view
    }

    fn last_edited(&self) -> DateTime<Utc> {
        self.last_edited
            .as_deref()
            .and_then(parse_date)
            .unwrap_or_else(Utc::now)
    }

    fn is_versioned(&self) -> bool {
        self.versioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_walk_parents_stops_on_cycles() {
        let links: HashMap<u64, u64> = [(5, 3), (3, 1), (1, 0)].into_iter().collect();
        assert_eq!(walk_parents(5, |id| links.get(&id).copied()), vec![3, 1]);

        let cyclic: HashMap<u64, u64> = [(5, 3), (3, 7), (7, 3)].into_iter().collect();
        assert_eq!(walk_parents(5, |id| cyclic.get(&id).copied()), vec![3, 7]);

        let self_parent: HashMap<u64, u64> = [(5, 5)].into_iter().collect();
        assert!(walk_parents(5, |id| self_parent.get(&id).copied()).is_empty());
    }

    #[test]
    fn test_parse_single_and_array() {
        let one = Record::parse_all(r#"{"type": "Article", "id": 1}"#).unwrap();
        assert_eq!(one.len(), 1);
        assert!(one[0].versioned);
        assert!(!one[0].published);
        assert!(one[0].show_in_search);

        let many = Record::parse_all(
            r#"[{"type": "Article", "id": 1, "fields": {"Title": "a", "Rank": 3}},
                {"type": "File", "id": 2, "versioned": false}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[0].fields.get("Rank"), Some(&FieldValue::Long(3)));
        assert!(!many[1].is_versioned());
    }

    #[test]
    fn test_last_edited_parsed() {
        let record = Record {
            last_edited: Some("2024-01-02 10:00:00".into()),
            ..Record::new("Article", 1)
        };
        assert_eq!(
            sift_types::format_date(&record.last_edited()),
            "2024-01-02 10:00:00"
        );
    }

    #[test]
    fn test_self_parent_ignored() {
        let record = Record::new("Page", 4).with_parent(4);
        assert!(record.parents_hierarchy().is_empty());
    }

    #[test]
    fn test_stages_by_publication() {
        assert_eq!(Record::new("Page", 1).stages(), vec![Stage::Draft]);
        assert_eq!(
            Record::new("Page", 1).published().stages(),
            vec![Stage::Draft, Stage::Live]
        );
        assert_eq!(
            Record::new("File", 1).unversioned().stages(),
            vec![Stage::Unversioned]
        );
    }

    #[test]
    fn test_resolve_parents_per_type() {
        let mut records = vec![
            Record::new("Page", 1),
            Record::new("Page", 2).with_parent(1),
            Record::new("Page", 3).with_parent(2),
            Record::new("Folder", 2).with_parent(9),
        ];
        Record::resolve_parents(&mut records);
        assert_eq!(records[2].parents, vec![2, 1]);
        assert_eq!(records[3].parents, vec![9]);
    }
}
