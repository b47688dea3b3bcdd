//! Term aggregation and sorting over materialized hits.
//!
//! Used by the embedded engine, which loads every match before the post
//! filter is applied so bucket counts cover the whole filtered set.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};
use sift_query::{FacetAggregation, SortClause, SortDirection};
use sift_types::SCORE_FIELD;

use crate::engine::{RawAggregation, RawBucket, RawHit};

struct BucketState<'a> {
    key: String,
    doc_count: u64,
    max_score: f32,
    members: Vec<&'a RawHit>,
}

/// Bucket `items` by the distinct values of the aggregation field.
///
/// Buckets are ordered by document count (descending, ties by key), or by
/// best score when the aggregation is expanded; then cut to the requested
/// size. `items` are expected in relevance order.
pub fn aggregate<T>(
    items: &[T],
    aggregation: &FacetAggregation,
    hit: impl Fn(&T) -> &RawHit,
) -> RawAggregation {
    let mut buckets: Vec<BucketState<'_>> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for item in items {
        let hit = hit(item);
        let Some(value) = hit.field(&aggregation.field) else {
            continue;
        };
        let mut keys = Vec::new();
        collect_keys(value, &mut keys);
        keys.sort();
        keys.dedup();

        let score = hit.score.unwrap_or(0.0);
        for key in keys {
            let pos = *positions.entry(key.clone()).or_insert_with(|| {
                buckets.push(BucketState {
                    key,
                    doc_count: 0,
                    max_score: f32::MIN,
                    members: Vec::new(),
                });
                buckets.len() - 1
            });
            let bucket = &mut buckets[pos];
            bucket.doc_count += 1;
            bucket.max_score = bucket.max_score.max(score);
            bucket.members.push(hit);
        }
    }

    if aggregation.is_expanded() {
        buckets.sort_by(|a, b| {
            b.max_score
                .partial_cmp(&a.max_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
    } else {
        buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.key.cmp(&b.key)));
    }
    buckets.truncate(aggregation.size as usize);

    let buckets = buckets
        .into_iter()
        .map(|bucket| match &aggregation.top_hits {
            Some(top_hits) => {
                let mut members = bucket.members;
                sort_by_clauses(&mut members, &top_hits.sort, |h| *h);
                RawBucket {
                    key: bucket.key,
                    doc_count: bucket.doc_count,
                    max_score: Some(bucket.max_score),
                    top_hits: members
                        .into_iter()
                        .take(top_hits.size as usize)
                        .map(|h| project(h, &top_hits.source))
                        .collect(),
                }
            }
            None => RawBucket {
                key: bucket.key,
                doc_count: bucket.doc_count,
                max_score: None,
                top_hits: Vec::new(),
            },
        })
        .collect();

    RawAggregation {
        name: aggregation.name.clone(),
        buckets,
    }
}

fn collect_keys(value: &Value, keys: &mut Vec<String>) {
    match value {
        Value::String(s) => keys.push(s.clone()),
        Value::Number(n) => keys.push(n.to_string()),
        Value::Bool(b) => keys.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_keys(v, keys)),
        Value::Null | Value::Object(_) => {}
    }
}

/// Copy of a hit carrying only the listed source fields.
fn project(hit: &RawHit, includes: &[String]) -> RawHit {
    let source: Map<String, Value> = includes
        .iter()
        .filter_map(|f| hit.source.get(f).map(|v| (f.clone(), v.clone())))
        .collect();
    RawHit {
        id: hit.id.clone(),
        score: hit.score,
        source,
        highlights: Default::default(),
    }
}

/// Stable sort by the given clauses. An empty list keeps the input order.
///
/// Missing field values sort last in either direction.
pub fn sort_by_clauses<T>(items: &mut [T], sort: &[SortClause], hit: impl Fn(&T) -> &RawHit) {
    if sort.is_empty() {
        return;
    }
    items.sort_by(|a, b| {
        let (a, b) = (hit(a), hit(b));
        sort.iter()
            .map(|clause| compare_on(a, b, clause))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

fn compare_on(a: &RawHit, b: &RawHit, clause: &SortClause) -> Ordering {
    if clause.field == SCORE_FIELD {
        let ord = a
            .score
            .unwrap_or(0.0)
            .partial_cmp(&b.score.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal);
        return directed(ord, clause.direction);
    }
    match (sort_value(a, &clause.field), sort_value(b, &clause.field)) {
        (Some(x), Some(y)) => directed(compare_values(x, y), clause.direction),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn directed(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

/// First scalar of a field; arrays sort by their first element.
fn sort_value<'a>(hit: &'a RawHit, field: &str) -> Option<&'a Value> {
    match hit.source.get(field)? {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sift_query::TopHits;

    fn hit(id: &str, score: f32, source: Value) -> RawHit {
        RawHit {
            id: id.into(),
            score: Some(score),
            source: source.as_object().cloned().unwrap_or_default(),
            highlights: Default::default(),
        }
    }

    fn facet(field: &str, size: u32) -> FacetAggregation {
        FacetAggregation {
            name: field.into(),
            field: field.into(),
            size,
            top_hits: None,
        }
    }

    fn hits() -> Vec<RawHit> {
        vec![
            hit("a", 3.0, json!({"ID": 1, "Category": "B", "Tags": ["x", "y"]})),
            hit("b", 2.0, json!({"ID": 2, "Category": "A", "Tags": ["x", "x"]})),
            hit("c", 1.0, json!({"ID": 3, "Category": "A"})),
        ]
    }

    #[test]
    fn test_count_ordering() {
        let agg = aggregate(&hits(), &facet("Category", 10), |h| h);
        let buckets: Vec<(&str, u64)> = agg
            .buckets
            .iter()
            .map(|b| (b.key.as_str(), b.doc_count))
            .collect();
        assert_eq!(buckets, vec![("A", 2), ("B", 1)]);
    }

    #[test]
    fn test_multi_valued_counts_once_per_doc() {
        let agg = aggregate(&hits(), &facet("Tags", 10), |h| h);
        assert_eq!(agg.buckets[0].key, "x");
        assert_eq!(agg.buckets[0].doc_count, 2);
        assert_eq!(agg.buckets[1].key, "y");
    }

    #[test]
    fn test_size_truncates() {
        let agg = aggregate(&hits(), &facet("Category", 1), |h| h);
        assert_eq!(agg.buckets.len(), 1);
    }

    #[test]
    fn test_expanded_orders_by_best_score() {
        let mut expanded = facet("Category", 10);
        expanded.top_hits = Some(TopHits {
            size: 1,
            sort: vec![],
            source: vec!["ID".into()],
        });
        let agg = aggregate(&hits(), &expanded, |h| h);
        assert_eq!(agg.buckets[0].key, "B");
        assert_eq!(agg.buckets[0].max_score, Some(3.0));
        assert_eq!(agg.buckets[1].top_hits.len(), 1);
        assert_eq!(agg.buckets[1].top_hits[0].id, "b");
        assert_eq!(
            Value::Object(agg.buckets[1].top_hits[0].source.clone()),
            json!({"ID": 2})
        );
    }

    #[test]
    fn test_sort_by_field_missing_last() {
        let mut items = hits();
        items.push(hit("d", 0.5, json!({})));
        sort_by_clauses(
            &mut items,
            &[SortClause {
                field: "ID".into(),
                direction: SortDirection::Desc,
            }],
            |h| h,
        );
        let ids: Vec<&str> = items.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn test_sort_by_score_ascending() {
        let mut items = hits();
        sort_by_clauses(
            &mut items,
            &[SortClause {
                field: SCORE_FIELD.into(),
                direction: SortDirection::Asc,
            }],
            |h| h,
        );
        assert_eq!(items[0].id, "c");
    }
}
