//! Translation of the query DSL into tantivy queries.
//!
//! Unknown fields and values that cannot be converted to the field's type
//! translate to queries matching nothing, mirroring a lenient remote engine.

use std::ops::Bound;

use sift_query::{
    split_field_boost, BoolQuery, MultiMatch, MultiMatchType, Operator, QueryClause,
    QueryStringQuery, RangeQuery as RangeClause, SimpleQueryString, TermValue,
};
use sift_types::FieldType;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, ConstScoreQuery, DisjunctionMaxQuery, EmptyQuery,
    FuzzyTermQuery, Occur, PhraseQuery, Query, QueryParser, RangeQuery, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, Term};
use tracing::debug;

use crate::document::date_millis;
use crate::error::SearchError;
use crate::schema::IndexSchema;

/// Largest edit distance tantivy's automata support.
const MAX_EDIT_DISTANCE: u8 = 2;

/// Translates query clauses against one index.
pub struct Translator<'a> {
    index: &'a Index,
    schema: &'a IndexSchema,
}

impl<'a> Translator<'a> {
    pub fn new(index: &'a Index, schema: &'a IndexSchema) -> Self {
        Self { index, schema }
    }

    pub fn translate(&self, clause: &QueryClause) -> Result<Box<dyn Query>, SearchError> {
        match clause {
            QueryClause::MatchAll(_) => Ok(Box::new(AllQuery)),
            QueryClause::Bool(b) => self.bool_query(b),
            QueryClause::SimpleQueryString(q) => self.simple_query_string(q),
            QueryClause::MultiMatch(q) => self.multi_match(q),
            QueryClause::QueryString(q) => Ok(self.query_string(q)),
            QueryClause::Term(t) => self.term_query(&t.field, &t.value),
            QueryClause::Terms(t) => {
                let mut queries = Vec::with_capacity(t.values.len());
                for value in &t.values {
                    queries.push(self.term_query(&t.field, value)?);
                }
                Ok(match queries.len() {
                    0 => Box::new(EmptyQuery),
                    1 => queries.remove(0),
                    _ => Box::new(BooleanQuery::union(queries)),
                })
            }
            QueryClause::Range(r) => Ok(self.range_query(r)),
            QueryClause::ConstantScore(c) => Ok(Box::new(ConstScoreQuery::new(
                self.translate(&c.filter)?,
                c.boost,
            ))),
        }
    }

    fn bool_query(&self, b: &BoolQuery) -> Result<Box<dyn Query>, SearchError> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for clause in &b.must {
            clauses.push((Occur::Must, self.translate(clause)?));
        }
        for clause in &b.filter {
            // restricts without contributing to the score
            clauses.push((
                Occur::Must,
                Box::new(ConstScoreQuery::new(self.translate(clause)?, 0.0)),
            ));
        }
        for clause in &b.should {
            clauses.push((Occur::Should, self.translate(clause)?));
        }
        for clause in &b.must_not {
            clauses.push((Occur::MustNot, self.translate(clause)?));
        }

        if clauses.is_empty() {
            return Ok(Box::new(AllQuery));
        }
        if clauses.iter().all(|(occur, _)| *occur == Occur::MustNot) {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        }

        let minimum = b
            .minimum_should_match
            .filter(|n| *n > 0 && !b.should.is_empty());
        Ok(match minimum {
            Some(n) => Box::new(BooleanQuery::with_minimum_required_clauses(
                clauses, n as usize,
            )),
            None => Box::new(BooleanQuery::new(clauses)),
        })
    }

    fn simple_query_string(&self, q: &SimpleQueryString) -> Result<Box<dyn Query>, SearchError> {
        let fields = self.text_fields(&q.fields);
        let groups = parse_simple(&q.query);

        let mut alternatives = Vec::with_capacity(groups.len());
        for group in groups {
            let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(group.len());
            for clause in group {
                let query = self.simple_term(&fields, &clause.term)?;
                let occur = match (clause.negated, q.default_operator) {
                    (true, _) => Occur::MustNot,
                    (false, Operator::And) => Occur::Must,
                    (false, Operator::Or) => Occur::Should,
                };
                clauses.push((occur, query));
            }
            if clauses.iter().all(|(occur, _)| *occur == Occur::MustNot) {
                clauses.push((Occur::Must, Box::new(AllQuery)));
            }
            alternatives.push(Box::new(BooleanQuery::new(clauses)) as Box<dyn Query>);
        }

        Ok(match alternatives.len() {
            0 => Box::new(EmptyQuery),
            1 => alternatives.remove(0),
            _ => Box::new(BooleanQuery::union(alternatives)),
        })
    }

    /// One syntax term across fields; the best field wins.
    fn simple_term(
        &self,
        fields: &[(Field, FieldType, f32)],
        term: &SimpleTerm,
    ) -> Result<Box<dyn Query>, SearchError> {
        let mut per_field = Vec::with_capacity(fields.len());
        for (field, field_type, boost) in fields {
            let query = match term {
                SimpleTerm::Word {
                    text,
                    prefix,
                    fuzzy,
                } => self.word_query(*field, *field_type, text, *prefix, *fuzzy)?,
                SimpleTerm::Phrase(text) => self.phrase_query(*field, *field_type, text)?,
            };
            if let Some(query) = query {
                per_field.push(boosted(query, Some(*boost)));
            }
        }
        Ok(disjunction(per_field))
    }

    fn multi_match(&self, q: &MultiMatch) -> Result<Box<dyn Query>, SearchError> {
        let fields = self.text_fields(&q.fields);
        let keyword = q.analyzer.as_deref() == Some("keyword");
        let fuzzy = q
            .fuzziness
            .filter(|f| *f > 0)
            .map(|f| f.min(MAX_EDIT_DISTANCE as u32) as u8);

        let mut per_field = Vec::with_capacity(fields.len());
        for (field, field_type, boost) in fields {
            let query = if keyword {
                exact_query(field, field_type, &q.query)
            } else {
                self.match_query(field, field_type, &q.query, fuzzy)?
            };
            if let Some(query) = query {
                per_field.push(boosted(query, Some(boost)));
            }
        }

        let combined = match q.match_type {
            MultiMatchType::BestFields => disjunction(per_field),
            MultiMatchType::MostFields => match per_field.len() {
                0 => Box::new(EmptyQuery),
                1 => per_field.remove(0),
                _ => Box::new(BooleanQuery::union(per_field)),
            },
        };
        Ok(boosted(combined, q.boost))
    }

    fn query_string(&self, q: &QueryStringQuery) -> Box<dyn Query> {
        let default_fields = match q.default_field.as_deref().and_then(|f| self.schema.field(f)) {
            Some((field, _)) => vec![field],
            None => self.schema.text_fields(),
        };
        let parser = QueryParser::for_index(self.index, default_fields);
        let (query, errors) = parser.parse_query_lenient(&q.query);
        if !errors.is_empty() {
            debug!(query = %q.query, errors = errors.len(), "Query string parsed leniently");
        }
        query
    }

    fn term_query(&self, name: &str, value: &TermValue) -> Result<Box<dyn Query>, SearchError> {
        let Some((field, field_type)) = self.schema.field(name) else {
            debug!(field = %name, "Term on unmapped field matches nothing");
            return Ok(Box::new(EmptyQuery));
        };
        if field_type == FieldType::Text {
            let phrase = self.phrase_query(field, field_type, &value.to_string())?;
            return Ok(phrase.unwrap_or_else(|| Box::new(EmptyQuery)));
        }
        Ok(match value_term(field, field_type, value) {
            Some(term) => Box::new(TermQuery::new(term, record_option(field_type))),
            None => Box::new(EmptyQuery),
        })
    }

    fn range_query(&self, r: &RangeClause) -> Box<dyn Query> {
        let Some((field, field_type)) = self.schema.field(&r.field) else {
            debug!(field = %r.field, "Range on unmapped field matches nothing");
            return Box::new(EmptyQuery);
        };
        let bound = |inclusive: &Option<TermValue>, exclusive: &Option<TermValue>| {
            match (inclusive, exclusive) {
                (Some(v), _) => value_term(field, field_type, v).map(Bound::Included),
                (None, Some(v)) => value_term(field, field_type, v).map(Bound::Excluded),
                (None, None) => Some(Bound::Unbounded),
            }
        };
        match (
            bound(&r.bounds.gte, &r.bounds.gt),
            bound(&r.bounds.lte, &r.bounds.lt),
        ) {
            (Some(lower), Some(upper)) => Box::new(RangeQuery::new(lower, upper)),
            _ => Box::new(EmptyQuery),
        }
    }

    /// Match any analyzed token of `text`.
    fn match_query(
        &self,
        field: Field,
        field_type: FieldType,
        text: &str,
        fuzzy: Option<u8>,
    ) -> Result<Option<Box<dyn Query>>, SearchError> {
        let mut queries: Vec<Box<dyn Query>> = self
            .analyze(field, field_type, text)?
            .into_iter()
            .map(|token| -> Box<dyn Query> {
                let term = Term::from_field_text(field, &token);
                match fuzzy {
                    Some(distance) => Box::new(FuzzyTermQuery::new(term, distance, true)),
                    None => Box::new(TermQuery::new(term, record_option(field_type))),
                }
            })
            .collect();
        Ok(match queries.len() {
            0 => None,
            1 => Some(queries.remove(0)),
            _ => Some(Box::new(BooleanQuery::union(queries))),
        })
    }

    /// Every analyzed token of a word; the last one as a prefix when asked.
    fn word_query(
        &self,
        field: Field,
        field_type: FieldType,
        text: &str,
        prefix: bool,
        fuzzy: Option<u8>,
    ) -> Result<Option<Box<dyn Query>>, SearchError> {
        let tokens = self.analyze(field, field_type, text)?;
        let last = tokens.len().saturating_sub(1);
        let mut queries: Vec<Box<dyn Query>> = tokens
            .into_iter()
            .enumerate()
            .map(|(i, token)| -> Box<dyn Query> {
                let term = Term::from_field_text(field, &token);
                if let Some(distance) = fuzzy {
                    Box::new(FuzzyTermQuery::new(term, distance, true))
                } else if prefix && i == last {
                    Box::new(FuzzyTermQuery::new_prefix(term, 0, true))
                } else {
                    Box::new(TermQuery::new(term, record_option(field_type)))
                }
            })
            .collect();
        Ok(match queries.len() {
            0 => None,
            1 => Some(queries.remove(0)),
            _ => Some(Box::new(BooleanQuery::intersection(queries))),
        })
    }

    fn phrase_query(
        &self,
        field: Field,
        field_type: FieldType,
        text: &str,
    ) -> Result<Option<Box<dyn Query>>, SearchError> {
        let terms: Vec<Term> = self
            .analyze(field, field_type, text)?
            .iter()
            .map(|token| Term::from_field_text(field, token))
            .collect();
        Ok(match terms.len() {
            0 => None,
            1 => terms
                .into_iter()
                .next()
                .map(|term| Box::new(TermQuery::new(term, record_option(field_type))) as Box<dyn Query>),
            _ => Some(Box::new(PhraseQuery::new(terms))),
        })
    }

    /// Tokens of `text` as the field indexes them; keywords are one token.
    fn analyze(&self, field: Field, field_type: FieldType, text: &str) -> Result<Vec<String>, SearchError> {
        if field_type != FieldType::Text {
            return Ok(if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            });
        }
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    /// Mapped string fields of a `Field^boost` list; other fields are skipped.
    fn text_fields(&self, specs: &[String]) -> Vec<(Field, FieldType, f32)> {
        specs
            .iter()
            .filter_map(|spec| {
                let (name, boost) = split_field_boost(spec);
                let (field, field_type) = self.schema.field(name)?;
                matches!(field_type, FieldType::Text | FieldType::Keyword)
                    .then_some((field, field_type, boost.unwrap_or(1.0)))
            })
            .collect()
    }
}

fn exact_query(field: Field, field_type: FieldType, text: &str) -> Option<Box<dyn Query>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    // the default tokenizer lowercases, so a whole-value term must too
    let text = if field_type == FieldType::Text {
        text.to_lowercase()
    } else {
        text.to_string()
    };
    Some(Box::new(TermQuery::new(
        Term::from_field_text(field, &text),
        record_option(field_type),
    )))
}

fn value_term(field: Field, field_type: FieldType, value: &TermValue) -> Option<Term> {
    match field_type {
        FieldType::Text | FieldType::Keyword => {
            Some(Term::from_field_text(field, &value.to_string()))
        }
        FieldType::Long => match value {
            TermValue::Long(v) => Some(Term::from_field_i64(field, *v)),
            TermValue::Text(s) => s.trim().parse().ok().map(|v| Term::from_field_i64(field, v)),
            TermValue::Bool(_) => None,
        },
        FieldType::Date => match value {
            TermValue::Long(v) => Some(Term::from_field_i64(field, *v)),
            TermValue::Text(s) => date_millis(s).map(|v| Term::from_field_i64(field, v)),
            TermValue::Bool(_) => None,
        },
        FieldType::Boolean => match value {
            TermValue::Bool(b) => Some(Term::from_field_bool(field, *b)),
            TermValue::Long(v) => Some(Term::from_field_bool(field, *v != 0)),
            TermValue::Text(s) => match s.as_str() {
                "true" | "1" => Some(Term::from_field_bool(field, true)),
                "false" | "0" => Some(Term::from_field_bool(field, false)),
                _ => None,
            },
        },
    }
}

fn record_option(field_type: FieldType) -> IndexRecordOption {
    match field_type {
        FieldType::Text => IndexRecordOption::WithFreqs,
        _ => IndexRecordOption::Basic,
    }
}

fn boosted(query: Box<dyn Query>, boost: Option<f32>) -> Box<dyn Query> {
    match boost {
        Some(b) if (b - 1.0).abs() > f32::EPSILON => Box::new(BoostQuery::new(query, b)),
        _ => query,
    }
}

fn disjunction(mut queries: Vec<Box<dyn Query>>) -> Box<dyn Query> {
    match queries.len() {
        0 => Box::new(EmptyQuery),
        1 => queries.remove(0),
        _ => Box::new(DisjunctionMaxQuery::new(queries)),
    }
}

/// A term of simple query string syntax.
#[derive(Debug, Clone, PartialEq)]
enum SimpleTerm {
    Word {
        text: String,
        prefix: bool,
        fuzzy: Option<u8>,
    },
    Phrase(String),
}

#[derive(Debug, Clone, PartialEq)]
struct SimpleClause {
    term: SimpleTerm,
    negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Or,
    Not,
    Word { text: String, negated: bool },
    Phrase { text: String, negated: bool },
}

fn lex(query: &str) -> Vec<Lexeme> {
    let mut out = Vec::new();
    let mut chars = query.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == '(' || c == ')' {
            chars.next();
            continue;
        }
        if c == '|' {
            while chars.peek() == Some(&'|') {
                chars.next();
            }
            out.push(Lexeme::Or);
            continue;
        }

        let mut negated = false;
        while let Some(&p) = chars.peek() {
            match p {
                '-' | '!' => negated = true,
                '+' => {}
                _ => break,
            }
            chars.next();
        }

        if chars.peek() == Some(&'"') {
            chars.next();
            let mut text = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                text.push(c);
            }
            // slop and prefix markers after a phrase are not supported
            while chars.peek().is_some_and(|c| !c.is_whitespace()) {
                chars.next();
            }
            out.push(Lexeme::Phrase { text, negated });
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || matches!(c, '"' | '(' | ')' | '|') {
                break;
            }
            word.push(c);
            chars.next();
        }
        match word.as_str() {
            "" | "AND" | "&&" => {}
            "OR" => out.push(Lexeme::Or),
            "NOT" => out.push(Lexeme::Not),
            _ => out.push(Lexeme::Word {
                text: word,
                negated,
            }),
        }
    }
    out
}

fn word_term(text: &str) -> Option<SimpleTerm> {
    if let Some((stem, distance)) = text.rsplit_once('~') {
        let distance = distance.parse::<u8>().unwrap_or(MAX_EDIT_DISTANCE);
        return (!stem.is_empty()).then(|| SimpleTerm::Word {
            text: stem.to_string(),
            prefix: false,
            fuzzy: Some(distance.min(MAX_EDIT_DISTANCE)),
        });
    }
    let stem = text.trim_end_matches('*');
    (!stem.is_empty()).then(|| SimpleTerm::Word {
        text: stem.to_string(),
        prefix: stem.len() != text.len(),
        fuzzy: None,
    })
}

/// Alternatives (split on `|`/`OR`) of clauses.
fn parse_simple(query: &str) -> Vec<Vec<SimpleClause>> {
    let mut groups: Vec<Vec<SimpleClause>> = vec![Vec::new()];
    let mut negate_next = false;
    for lexeme in lex(query) {
        let clause = match lexeme {
            Lexeme::Or => {
                if groups.last().is_some_and(|g| !g.is_empty()) {
                    groups.push(Vec::new());
                }
                continue;
            }
            Lexeme::Not => {
                negate_next = true;
                continue;
            }
            Lexeme::Word { text, negated } => word_term(&text).map(|term| SimpleClause {
                term,
                negated: negated || negate_next,
            }),
            Lexeme::Phrase { text, negated } => Some(SimpleClause {
                term: SimpleTerm::Phrase(text),
                negated: negated || negate_next,
            }),
        };
        negate_next = false;
        if let (Some(clause), Some(group)) = (clause, groups.last_mut()) {
            group.push(clause);
        }
    }
    groups.retain(|g| !g.is_empty());
    groups
}
