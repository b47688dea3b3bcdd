//! Explicit request parameters.
//!
//! An ordered multimap of URL query parameters. Repeated keys are kept, so
//! multi-select facets (`aggregation[Category][]=A&aggregation[Category][]=B`)
//! round-trip.

use std::fmt;

use reqwest::Url;

/// Prefix of facet selection parameters.
pub const AGGREGATION_PARAM: &str = "aggregation";

/// Parameter name carrying a selection for `field`.
pub fn aggregation_key(field: &str) -> String {
    format!("{AGGREGATION_PARAM}[{field}][]")
}

/// Field of an `aggregation[Field]` or `aggregation[Field][]` key.
pub fn aggregation_field(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(AGGREGATION_PARAM)?.strip_prefix('[')?;
    let rest = rest.strip_suffix("[]").unwrap_or(rest);
    let field = rest.strip_suffix(']')?;
    (!field.is_empty() && !field.contains(['[', ']'])).then_some(field)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a URL query string (with or without the leading `?`).
    pub fn parse(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        if query.is_empty() {
            return Self::default();
        }
        match Url::parse(&format!("http://localhost/?{query}")) {
            Ok(url) => Self {
                pairs: url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Replace every value of `key` with one value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.remove(&key);
        self.pairs.push((key, value.into()));
    }

    /// Remove every value of `key`. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.pairs.len();
        self.pairs.retain(|(k, _)| k != key);
        self.pairs.len() != before
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.pairs.retain(|(k, v)| keep(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Facet selections by field, in order of first appearance.
    ///
    /// Duplicate values of one field are collapsed.
    pub fn aggregation_selections(&self) -> Vec<(String, Vec<String>)> {
        let mut selections: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in &self.pairs {
            let Some(field) = aggregation_field(key) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match selections.iter_mut().find(|(f, _)| f == field) {
                Some((_, values)) => {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
                None => selections.push((field.to_string(), vec![value.clone()])),
            }
        }
        selections
    }

    /// Form-urlencoded query string, without the leading `?`.
    pub fn to_query_string(&self) -> String {
        if self.pairs.is_empty() {
            return String::new();
        }
        let mut url = match Url::parse("http://localhost/") {
            Ok(url) => url,
            Err(_) => return String::new(),
        };
        url.query_pairs_mut().extend_pairs(self.pairs.iter());
        url.query().unwrap_or_default().to_string()
    }
}

impl fmt::Display for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}
