//! Untrusted query text → FTS5 MATCH expression.
//!
//! Every user token becomes a double-quoted FTS5 string, with internal quotes
//! doubled, so operators (`AND`, `OR`, `NOT`, `NEAR`), prefix stars, column
//! filters and parentheses are matched as literal text. Tokens are joined by a
//! single space, which FTS5 reads as an implicit AND.
//!
//! A `"` at the start of a token that has a matching closing `"` later in the
//! input keeps the enclosed text together as one phrase. A quote without a
//! partner is just a character: the rest of the input is split on whitespace
//! as usual and the stray quote is escaped along with its token.

use crate::search::index::is_token_char;
use std::fmt;

/// Upper bound on terms forwarded to the index.
pub const MAX_QUERY_TERMS: usize = 64;

/// A MATCH expression that FTS5 accepts, or the empty query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SanitizedQuery {
    expr: String,
    terms: usize,
}

impl SanitizedQuery {
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// Empty means "no search": callers return no results without querying.
    pub fn is_empty(&self) -> bool {
        self.terms == 0
    }

    pub fn term_count(&self) -> usize {
        self.terms
    }
}

impl fmt::Display for SanitizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Phrase(&'a str),
}

impl Token<'_> {
    fn text(&self) -> &str {
        match self {
            Token::Word(s) | Token::Phrase(s) => s,
        }
    }
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c.is_control()
}

/// A token the index tokenizer reduces to nothing can never match.
fn has_indexable_char(s: &str) -> bool {
    s.chars().any(is_token_char)
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(is_separator);
        if rest.is_empty() {
            break;
        }

        if let Some(after_quote) = rest.strip_prefix('"')
            && let Some(close) = after_quote.find('"')
        {
            tokens.push(Token::Phrase(&after_quote[..close]));
            rest = &after_quote[close + 1..];
            continue;
        }

        let end = rest.find(is_separator).unwrap_or(rest.len());
        tokens.push(Token::Word(&rest[..end]));
        rest = &rest[end..];
    }

    tokens
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Convert arbitrary user input into a safe implicit-AND FTS5 expression.
///
/// Pure and total: never panics, never returns an error. Input that contains
/// nothing searchable yields an empty [`SanitizedQuery`].
///
/// ```
/// use tracker_search::search::sanitize::sanitize_query;
///
/// assert_eq!(sanitize_query("login bug").as_str(), r#""login" "bug""#);
/// assert_eq!(sanitize_query(r#""sign in" page"#).as_str(), r#""sign in" "page""#);
/// assert_eq!(sanitize_query("title:foo OR bar*").as_str(), r#""title:foo" "OR" "bar*""#);
/// assert!(sanitize_query("   ").is_empty());
/// ```
pub fn sanitize_query(raw: &str) -> SanitizedQuery {
    let parts: Vec<String> = tokenize(raw)
        .into_iter()
        .filter(|t| has_indexable_char(t.text()))
        .take(MAX_QUERY_TERMS)
        .map(|t| match t {
            Token::Word(w) => quote(w),
            Token::Phrase(p) => quote(p.replace(char::is_control, " ").trim()),
        })
        .collect();

    SanitizedQuery {
        terms: parts.len(),
        expr: parts.join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_quoted() {
        assert_eq!(sanitize_query("hello").as_str(), r#""hello""#);
        assert_eq!(sanitize_query("  hello   world ").as_str(), r#""hello" "world""#);
    }

    #[test]
    fn balanced_phrase_stays_together() {
        let q = sanitize_query(r#"crash "on startup" today"#);
        assert_eq!(q.as_str(), r#""crash" "on startup" "today""#);
        assert_eq!(q.term_count(), 3);
    }

    #[test]
    fn unbalanced_quote_is_literal() {
        assert_eq!(
            sanitize_query(r#"foo "bar baz"#).as_str(),
            r#""foo" """bar" "baz""#
        );
        assert_eq!(sanitize_query(r#"say"hi"#).as_str(), r#""say""hi""#);
    }

    #[test]
    fn operators_become_literal_terms() {
        assert_eq!(
            sanitize_query("a AND b NOT c").as_str(),
            r#""a" "AND" "b" "NOT" "c""#
        );
        assert_eq!(sanitize_query("NEAR(a b)").as_str(), r#""NEAR(a" "b)""#);
        assert_eq!(sanitize_query("^start").as_str(), r#""^start""#);
        assert_eq!(sanitize_query("-x +y").as_str(), r#""-x" "+y""#);
    }

    #[test]
    fn punctuation_only_tokens_are_skipped() {
        let q = sanitize_query(r#""; DROP TABLE issues --"#);
        assert_eq!(q.as_str(), r#""DROP" "TABLE" "issues""#);
        assert!(sanitize_query(r#"" * ( ) : ""#).is_empty());
    }

    #[test]
    fn empty_and_blank_phrases_are_dropped() {
        assert!(sanitize_query(r#""""#).is_empty());
        assert!(sanitize_query(r#"" ""#).is_empty());
        assert_eq!(sanitize_query(r#""" x"#).as_str(), r#""x""#);
    }

    #[test]
    fn control_characters_separate_tokens() {
        assert_eq!(sanitize_query("a\0b\tc").as_str(), r#""a" "b" "c""#);
        assert_eq!(sanitize_query("\"x\0y\"").as_str(), r#""x y""#);
    }

    #[test]
    fn private_use_characters_are_searchable() {
        assert_eq!(sanitize_query("\u{F8FF}").as_str(), "\"\u{F8FF}\"");
        assert_eq!(
            sanitize_query("icon \u{E123}").as_str(),
            "\"icon\" \"\u{E123}\""
        );
    }

    #[test]
    fn term_count_is_bounded() {
        let raw = "word ".repeat(MAX_QUERY_TERMS * 3);
        assert_eq!(sanitize_query(&raw).term_count(), MAX_QUERY_TERMS);
    }

    #[test]
    fn tokenize_handles_adjacent_phrases() {
        assert_eq!(
            tokenize(r#""a b""c d""#),
            vec![Token::Phrase("a b"), Token::Phrase("c d")]
        );
        assert_eq!(
            tokenize(r#""a b"tail"#),
            vec![Token::Phrase("a b"), Token::Word("tail")]
        );
    }

    #[test]
    fn sanitize_is_deterministic() {
        let raw = r#"mixed "phrase here" and "dangling"#;
        assert_eq!(sanitize_query(raw), sanitize_query(raw));
    }
}
