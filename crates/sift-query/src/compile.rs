//! Compilation of a [`SearchConfiguration`] into a [`SearchQuery`].

use sift_types::system;

use crate::config::{QueryPreset, SearchConfiguration};
use crate::dsl::{
    BoolQuery, ConstantScore, FacetAggregation, Highlight, MultiMatch, MultiMatchType, Operator,
    QueryClause, SearchQuery, SimpleQueryString, SortClause, TopHits,
};
use crate::sanitize::{filter_query, is_structured, parse, wildcard};

/// Fields returned for representative documents of expanded facets.
const TOP_HITS_SOURCE: [&str; 2] = [system::ID, system::CLASS_NAME];

/// Compile a configuration into a structured query.
///
/// Root layout:
/// - `must`: the content match clause (omitted in browse mode)
/// - `filter`: one bool holding the stage restriction and every filter
/// - `should`: constant-score value boosts
pub fn compile(config: &SearchConfiguration) -> SearchQuery {
    let filtered = filter_query(&config.user_query);
    let mut root = BoolQuery::default();

    if !(config.allow_empty && filtered.is_empty()) {
        root.must.push(match_clause(config, &filtered));
    }

    let mut restrictions = vec![QueryClause::term(
        system::STAGE,
        config.stage.viewing_label(),
    )];
    restrictions.extend(config.filters.clauses());
    root.filter
        .push(QueryClause::Bool(BoolQuery::all_of(restrictions)));

    for (expression, boost) in &config.boost_field_values {
        root.should.push(QueryClause::ConstantScore(ConstantScore {
            filter: Box::new(QueryClause::query_string(expression.clone())),
            boost: *boost,
        }));
    }

    let sort = sort_clauses(config);

    let aggregations = config
        .facet_fields
        .iter()
        .map(|facet| FacetAggregation {
            name: facet.field.clone(),
            field: facet.field.clone(),
            size: config.facet_size(&facet.field),
            top_hits: config
                .expand_facet_results
                .get(&facet.field)
                .filter(|n| **n > 0)
                .map(|n| TopHits {
                    size: *n,
                    sort: sort.clone(),
                    source: TOP_HITS_SOURCE.iter().map(|s| s.to_string()).collect(),
                }),
        })
        .collect();

    let post_filter = if config.post_filters.is_empty() {
        None
    } else {
        Some(QueryClause::Bool(BoolQuery::all_of(
            config.post_filters.clauses(),
        )))
    };

    let highlight = if config.highlight_fields.is_empty() {
        None
    } else {
        Some(Highlight {
            fields: config.highlight_fields.clone(),
        })
    };

    SearchQuery {
        query: QueryClause::Bool(root),
        post_filter,
        aggregations,
        sort,
        highlight,
    }
}

fn sort_clauses(config: &SearchConfiguration) -> Vec<SortClause> {
    match &config.sort {
        Some(spec) => vec![SortClause {
            field: spec.field.clone(),
            direction: spec.direction,
        }],
        None => Vec::new(),
    }
}

/// Text handed to the syntax-aware strategy.
fn syntax_query(config: &SearchConfiguration) -> String {
    let raw = config.user_query.trim();
    if is_structured(raw) || !config.enable_query_wildcard {
        raw.to_string()
    } else {
        wildcard(raw, config.fuzziness)
    }
}

fn fuzziness(config: &SearchConfiguration) -> Option<u32> {
    (config.fuzziness > 0).then_some(config.fuzziness)
}

fn match_clause(config: &SearchConfiguration, filtered: &str) -> QueryClause {
    match config.preset {
        QueryPreset::Standard => standard_match(config, filtered),
        QueryPreset::Legacy => QueryClause::query_string(parse(
            config.user_query.trim(),
            &config.fields,
            &config.boost,
            config.fuzziness,
        )),
        QueryPreset::Simple => QueryClause::MultiMatch(MultiMatch {
            query: filtered.to_string(),
            fields: config.fields_with_boosts(),
            match_type: MultiMatchType::BestFields,
            fuzziness: fuzziness(config),
            analyzer: None,
            boost: None,
        }),
    }
}

/// Wildcard syntax match, fuzzy best-fields match over the plain field
/// names and exact keyword match over the boosted field list; any one
/// suffices. Every strategy covers every default field.
fn standard_match(config: &SearchConfiguration, filtered: &str) -> QueryClause {
    let boosted = config.fields_with_boosts();
    let strategies = vec![
        QueryClause::SimpleQueryString(SimpleQueryString {
            query: syntax_query(config),
            fields: boosted.clone(),
            default_operator: Operator::And,
            lenient: true,
        }),
        QueryClause::MultiMatch(MultiMatch {
            query: filtered.to_string(),
            fields: config.fields.clone(),
            match_type: MultiMatchType::BestFields,
            fuzziness: fuzziness(config),
            analyzer: None,
            boost: None,
        }),
        QueryClause::MultiMatch(MultiMatch {
            query: filtered.to_string(),
            fields: boosted,
            match_type: MultiMatchType::BestFields,
            fuzziness: None,
            analyzer: Some("keyword".to_string()),
            boost: Some(config.content_boost),
        }),
    ];

    QueryClause::Bool(BoolQuery::any_of(strategies))
}
