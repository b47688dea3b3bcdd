//! Free-text query preparation: sanitizing, wildcard wrapping and the
//! field-qualified string form used by the legacy preset.

use std::collections::BTreeMap;

/// Two-character operators stripped from the plain-text variant.
const RESERVED_SEQUENCES: [&str; 2] = ["&&", "||"];

/// Single characters stripped from the plain-text variant.
const RESERVED_CHARS: [char; 17] = [
    '+', '-', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/',
];

const OPERATORS: [&str; 6] = ["OR", "AND", "NOT", "||", "&&", "!"];

/// Strip query-syntax characters, leaving whitespace-normalized plain text.
pub fn filter_query(raw: &str) -> String {
    let mut text = raw.to_string();
    for seq in RESERVED_SEQUENCES {
        text = text.replace(seq, " ");
    }
    let text: String = text
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the query carries a field qualifier and must be used verbatim.
pub fn is_structured(raw: &str) -> bool {
    raw.contains(':')
}

fn marker(fuzziness: u32) -> String {
    if fuzziness > 0 {
        format!("~{fuzziness}")
    } else {
        "*".to_string()
    }
}

fn is_operator(token: &str) -> bool {
    OPERATORS.contains(&token) || token.starts_with('+') || token.starts_with('-')
}

/// Append a wildcard (or fuzziness) marker to each plain term.
///
/// Operators, `+`/`-` prefixed terms, quoted phrases and already-marked
/// terms are left untouched.
pub fn wildcard(query: &str, fuzziness: u32) -> String {
    let query = query.trim();
    if query.is_empty() {
        return String::new();
    }

    let marker = marker(fuzziness);
    if !query.contains(' ') && !query.contains('"') {
        return if is_marked(query) {
            query.to_string()
        } else {
            format!("{query}{marker}")
        };
    }

    let mut in_quotes = false;
    let mut out = Vec::new();
    for token in query.split(' ').filter(|t| !t.is_empty()) {
        let quotes = token.matches('"').count();
        if quotes > 0 {
            // a lone quote opens or closes a phrase; a balanced one is a phrase itself
            if quotes % 2 == 1 {
                in_quotes = !in_quotes;
            }
            out.push(token.to_string());
        } else if in_quotes || is_operator(token) || is_marked(token) {
            out.push(token.to_string());
        } else if let Some(stripped) = token.strip_suffix(')') {
            out.push(format!("{stripped}{marker})"));
        } else {
            out.push(format!("{token}{marker}"));
        }
    }
    out.join(" ")
}

fn is_marked(token: &str) -> bool {
    token.ends_with('*') || token.contains('~')
}

/// Field-qualified Lucene form: `(Title:(open* source*))^3 OR (Content:(...))`.
///
/// Queries that already carry a field qualifier pass through unchanged.
pub fn parse(
    query: &str,
    fields: &[String],
    boosts: &BTreeMap<String, f32>,
    fuzziness: u32,
) -> String {
    if is_structured(query) || fields.is_empty() {
        return query.to_string();
    }
    let wild = wildcard(query, fuzziness);
    if wild.is_empty() {
        return String::new();
    }

    fields
        .iter()
        .map(|field| match boosts.get(field) {
            Some(boost) => format!("({field}:({wild}))^{boost}"),
            None => format!("({field}:({wild}))"),
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_query_strips_syntax() {
        assert_eq!(filter_query("open source"), "open source");
        assert_eq!(filter_query("+open -source"), "open source");
        assert_eq!(filter_query("\"open source\"~2"), "open source 2");
        assert_eq!(filter_query("a && b || c"), "a b c");
        assert_eq!(filter_query("Title:foo/bar"), "Title foo bar");
        assert_eq!(filter_query("(x) {y} [z] ^ ? \\ !"), "x y z");
    }

    #[test]
    fn test_filter_query_keeps_single_ampersand() {
        assert_eq!(filter_query("R&D"), "R&D");
    }

    #[test]
    fn test_filter_query_empty_when_only_syntax() {
        assert_eq!(filter_query("  * ? ! "), "");
    }

    #[test]
    fn test_single_term() {
        assert_eq!(wildcard("open", 0), "open*");
        assert_eq!(wildcard("open", 2), "open~2");
        assert_eq!(wildcard("open*", 0), "open*");
    }

    #[test]
    fn test_multiple_terms() {
        assert_eq!(wildcard("open source", 0), "open* source*");
        assert_eq!(wildcard("open  source ", 0), "open* source*");
    }

    #[test]
    fn test_operators_pass_through() {
        assert_eq!(
            wildcard("open OR source AND code NOT x", 0),
            "open* OR source* AND code* NOT x*"
        );
        assert_eq!(wildcard("+open -closed", 0), "+open -closed");
        assert_eq!(wildcard("a || b && ! c", 0), "a* || b* && ! c*");
    }

    #[test]
    fn test_quoted_single_term_unchanged() {
        assert_eq!(wildcard("\"open\"", 0), "\"open\"");
    }

    #[test]
    fn test_phrase_terms_never_wrapped() {
        assert_eq!(
            wildcard("\"open source software\" licence", 0),
            "\"open source software\" licence*"
        );
        assert_eq!(wildcard("\"open source\"", 1), "\"open source\"");
    }

    #[test]
    fn test_wildcard_idempotent_on_phrases() {
        let once = wildcard("find \"exact phrase here\"", 0);
        assert_eq!(once, "find* \"exact phrase here\"");
        assert_eq!(wildcard(&once, 0), once);
    }

    #[test]
    fn test_closing_paren_keeps_marker_inside() {
        assert_eq!(wildcard("(open source)", 0), "(open* source*)");
    }

    #[test]
    fn test_parse_builds_field_expressions() {
        let fields = vec!["Title".to_string(), "Content".to_string()];
        let boosts: BTreeMap<String, f32> = [("Title".to_string(), 3.0)].into_iter().collect();
        assert_eq!(
            parse("open source", &fields, &boosts, 0),
            "(Title:(open* source*))^3 OR (Content:(open* source*))"
        );
    }

    #[test]
    fn test_parse_passes_structured_query_through() {
        let fields = vec!["Title".to_string()];
        assert_eq!(
            parse("Title:exact", &fields, &BTreeMap::new(), 0),
            "Title:exact"
        );
    }
}
