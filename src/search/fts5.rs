//! Rendering of a [`QuerySpec`] into SQLite FTS5 `MATCH` syntax.
//!
//! This is the only engine-specific part of query handling; the grammar in
//! [`super::query`] knows nothing about FTS5.

use super::query::QuerySpec;

/// Render the text expression of `spec`, or `None` if it matches nothing.
///
/// Without prefixed terms the phrase is matched as a whole. Otherwise the
/// expression is `(<phrase> AND <required>... NOT <forbidden>...) OR
/// <optional>...`, where joiners are only emitted after a preceding clause
/// and the parentheses only when the core is non-empty.
pub fn render(spec: &QuerySpec) -> Option<String> {
    if !spec.has_operators() {
        return spec.phrase.as_deref().map(escape);
    }

    let mut expr = String::new();
    if let Some(ref phrase) = spec.phrase {
        expr.push_str(&escape(phrase));
    }
    for term in &spec.required {
        append(&mut expr, " AND ", term);
    }
    for term in &spec.forbidden {
        append(&mut expr, " NOT ", term);
    }
    if !expr.is_empty() {
        expr.insert(0, '(');
        expr.push(')');
    }
    for term in &spec.optional {
        append(&mut expr, " OR ", term);
    }

    Some(expr)
}

fn append(expr: &mut String, joiner: &str, term: &str) {
    if !expr.is_empty() {
        expr.push_str(joiner);
    }
    expr.push_str(&escape(term));
}

/// Quote a literal for FTS5: wrap in `"` and double any inner `"`.
pub fn escape(literal: &str) -> String {
    format!("\"{}\"", literal.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::query::{parse_query, SearchScope};

    fn compile(input: &str) -> Option<String> {
        render(&parse_query(input, SearchScope::default()))
    }

    #[test]
    fn test_escape_doubles_quotes() {
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("plain"), "\"plain\"");
    }

    #[test]
    fn test_render_plain_phrase() {
        assert_eq!(compile("alpha"), Some("\"alpha\"".into()));
        assert_eq!(compile("alpha beta"), Some("\"alpha beta\"".into()));
    }

    #[test]
    fn test_render_required_and_forbidden() {
        assert_eq!(compile("+alpha -beta"), Some("(\"alpha\" NOT \"beta\")".into()));
    }

    #[test]
    fn test_render_optional_only() {
        assert_eq!(compile("?alpha ?beta"), Some("\"alpha\" OR \"beta\"".into()));
    }

    #[test]
    fn test_render_words_required_forbidden() {
        assert_eq!(
            compile("gamma +alpha -beta"),
            Some("(\"gamma\" AND \"alpha\" NOT \"beta\")".into())
        );
    }

    #[test]
    fn test_render_optional_applies_to_whole_core() {
        assert_eq!(
            compile("+a +b ?c"),
            Some("(\"a\" AND \"b\") OR \"c\"".into())
        );
    }

    #[test]
    fn test_render_forbidden_without_positive_clause() {
        // Nothing precedes the first forbidden term, so no NOT is emitted.
        assert_eq!(compile("-beta"), Some("(\"beta\")".into()));
    }

    #[test]
    fn test_render_escapes_operands() {
        assert_eq!(compile("+a\"b"), Some("(\"a\"\"b\")".into()));
        assert_eq!(compile("OR"), Some("\"OR\"".into()));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(compile(""), None);
    }
}
