//! Field typing and per-type field discovery.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Pseudo-field naming relevance order in sort and selectable-field lists.
pub const SCORE_FIELD: &str = "_score";

/// Field names every indexed document carries.
pub mod system {
    pub const ID: &str = "ID";
    pub const CLASS_NAME: &str = "ClassName";
    pub const CLASS_NAME_HIERARCHY: &str = "ClassNameHierarchy";
    pub const STAGE: &str = "SS_Stage";
    pub const PUBLIC_VIEW: &str = "PublicView";
    pub const PARENTS_HIERARCHY: &str = "ParentsHierarchy";
    pub const LAST_EDITED: &str = "LastEdited";
}

/// Engine field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Analyzed full text
    Text,
    /// Exact, unanalyzed string
    Keyword,
    Long,
    Boolean,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Long => "long",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
        }
    }

    /// Whether values of this type are matched as whole terms.
    pub fn is_exact(&self) -> bool {
        !matches!(self, FieldType::Text)
    }
}

/// Mapping entry for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Display label in selectable-field lists (defaults to the field name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl From<FieldType> for FieldSpec {
    fn from(field_type: FieldType) -> Self {
        FieldSpec::new(field_type)
    }
}

/// Field name to engine type, ordered by name.
pub type FieldMapping = BTreeMap<String, FieldSpec>;

/// Mapping of the system fields.
pub fn system_mapping() -> FieldMapping {
    [
        (system::ID, FieldType::Long),
        (system::CLASS_NAME, FieldType::Keyword),
        (system::CLASS_NAME_HIERARCHY, FieldType::Keyword),
        (system::STAGE, FieldType::Keyword),
        (system::PUBLIC_VIEW, FieldType::Boolean),
        (system::PARENTS_HIERARCHY, FieldType::Long),
        (system::LAST_EDITED, FieldType::Date),
    ]
    .into_iter()
    .map(|(name, ty)| (name.to_string(), FieldSpec::new(ty)))
    .collect()
}

/// Discovery-oriented fields shared by most content types.
pub fn common_mapping() -> FieldMapping {
    [
        ("BoostTerms", FieldType::Text),
        ("Categories", FieldType::Keyword),
        ("Keywords", FieldType::Text),
        ("Tags", FieldType::Keyword),
        ("SS_URL", FieldType::Keyword),
    ]
    .into_iter()
    .map(|(name, ty)| (name.to_string(), FieldSpec::new(ty)))
    .collect()
}

/// Capability of a content type to describe its indexable fields.
pub trait FieldProvider: Send + Sync {
    /// Engine type name of the content type.
    fn type_name(&self) -> &str;

    /// Indexable field name to engine type.
    fn selectable_fields(&self) -> FieldMapping;

    /// Whether the type is indexed once per stage.
    fn is_versioned(&self) -> bool {
        true
    }

    /// Supporting types are indexed through their owners and skipped on reindex.
    fn is_supporting(&self) -> bool {
        false
    }

    /// Whether records form a parent/child tree (enables subtree filters).
    fn is_tree(&self) -> bool {
        false
    }
}

/// A content type declared in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,

    #[serde(default = "default_true")]
    pub versioned: bool,

    #[serde(default)]
    pub supporting: bool,

    #[serde(default)]
    pub tree: bool,

    #[serde(default)]
    pub fields: FieldMapping,
}

fn default_true() -> bool {
    true
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versioned: true,
            supporting: false,
            tree: false,
            fields: FieldMapping::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), FieldSpec::new(field_type));
        self
    }

    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }

    pub fn as_tree(mut self) -> Self {
        self.tree = true;
        self
    }
}

impl FieldProvider for TypeDefinition {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn selectable_fields(&self) -> FieldMapping {
        self.fields.clone()
    }

    fn is_versioned(&self) -> bool {
        self.versioned
    }

    fn is_supporting(&self) -> bool {
        self.supporting
    }

    fn is_tree(&self) -> bool {
        self.tree
    }
}

/// Type-keyed registry of field providers.
#[derive(Clone, Default)]
pub struct FieldRegistry {
    providers: BTreeMap<String, Arc<dyn FieldProvider>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured type definitions.
    pub fn from_definitions(definitions: &[TypeDefinition]) -> Self {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(Arc::new(definition.clone()));
        }
        registry
    }

    /// Register a provider, replacing any previous provider for the same type.
    pub fn register(&mut self, provider: Arc<dyn FieldProvider>) {
        self.providers
            .insert(provider.type_name().to_string(), provider);
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn FieldProvider>> {
        self.providers.get(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn FieldProvider>> {
        self.providers.values()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Complete engine mapping: system fields, common fields, then every
    /// registered type's fields. The first declaration of a name wins.
    pub fn mapping(&self) -> FieldMapping {
        let mut mapping = system_mapping();
        for (name, spec) in common_mapping() {
            mapping.entry(name).or_insert(spec);
        }
        for provider in self.providers.values() {
            for (name, spec) in provider.selectable_fields() {
                mapping.entry(name).or_insert(spec);
            }
        }
        mapping
    }

    /// Field name to display label across all registered types, plus the
    /// relevance pseudo-field. Ordered by field name.
    pub fn selectable_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        for provider in self.providers.values() {
            for (name, spec) in provider.selectable_fields() {
                let label = spec.label.unwrap_or_else(|| name.clone());
                fields.entry(name).or_insert(label);
            }
        }
        fields.insert(SCORE_FIELD.to_string(), "Score".to_string());
        fields
    }

    pub fn is_selectable(&self, field: &str) -> bool {
        field == SCORE_FIELD
            || self
                .providers
                .values()
                .any(|p| p.selectable_fields().contains_key(field))
    }
}

impl std::fmt::Debug for FieldRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRegistry")
            .field("types", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
