//! Filter values and the type-hierarchy filter.

use sift_types::system;

use crate::dsl::{BoolQuery, QueryClause, TermValue};

/// Value of a filter entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Exact term on the filter key's field
    Term(TermValue),
    /// Any of several exact terms on the filter key's field
    Terms(Vec<TermValue>),
    /// Lucene query-string expression, passed through as text
    Expression(String),
    /// Already-structured clause; the key only identifies the entry
    Clause(QueryClause),
}

impl FilterValue {
    pub fn term(value: impl Into<TermValue>) -> Self {
        FilterValue::Term(value.into())
    }

    pub fn expression(expr: impl Into<String>) -> Self {
        FilterValue::Expression(expr.into())
    }

    /// Clause restricting `key` to this value.
    pub fn to_clause(&self, key: &str) -> QueryClause {
        match self {
            FilterValue::Term(value) => QueryClause::term(key, value.clone()),
            FilterValue::Terms(values) => QueryClause::terms(key, values.clone()),
            FilterValue::Expression(expr) => QueryClause::query_string(expr.clone()),
            FilterValue::Clause(clause) => clause.clone(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::term(s)
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::term(s)
    }
}

impl From<QueryClause> for FilterValue {
    fn from(clause: QueryClause) -> Self {
        FilterValue::Clause(clause)
    }
}

/// Filter entries keyed by filter key, in insertion order.
///
/// Re-inserting a key replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    entries: Vec<(String, FilterValue)>,
}

impl FilterSet {
    pub fn insert(&mut self, key: impl Into<String>, value: FilterValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<FilterValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clauses(&self) -> Vec<QueryClause> {
        self.iter().map(|(k, v)| v.to_clause(k)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TypeRestriction {
    type_name: String,
    within_subtree: bool,
}

/// Match any of a set of types (each covering its subtypes through the
/// hierarchy field), optionally restricting tree types to descendants of
/// given ancestor records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyFilter {
    types: Vec<TypeRestriction>,
    subtree_roots: Vec<u64>,
}

impl HierarchyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.push(type_name.into(), false);
        self
    }

    /// A tree type; subject to the subtree restriction when one is set.
    pub fn with_tree_type(mut self, type_name: impl Into<String>) -> Self {
        self.push(type_name.into(), true);
        self
    }

    pub fn within(mut self, roots: Vec<u64>) -> Self {
        self.subtree_roots = roots;
        self
    }

    fn push(&mut self, type_name: String, within_subtree: bool) {
        if !self.types.iter().any(|t| t.type_name == type_name) {
            self.types.push(TypeRestriction {
                type_name,
                within_subtree,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Boolean OR of type terms. `None` when no type is set.
    pub fn to_clause(&self) -> Option<QueryClause> {
        if self.types.is_empty() {
            return None;
        }

        let clauses = self
            .types
            .iter()
            .map(|t| {
                let type_term =
                    QueryClause::term(system::CLASS_NAME_HIERARCHY, t.type_name.as_str());
                if t.within_subtree && !self.subtree_roots.is_empty() {
                    let roots = self
                        .subtree_roots
                        .iter()
                        .map(|id| TermValue::from(*id))
                        .collect();
                    QueryClause::Bool(BoolQuery::all_of(vec![
                        type_term,
                        QueryClause::terms(system::PARENTS_HIERARCHY, roots),
                    ]))
                } else {
                    type_term
                }
            })
            .collect();

        Some(QueryClause::Bool(BoolQuery::any_of(clauses)))
    }
}
