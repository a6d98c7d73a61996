//! Search query parser.
//!
//! Parses user-typed query strings into a structured [`QuerySpec`].
//!
//! # Supported syntax
//!
//! Tokens are separated by whitespace.
//!
//! - `+term`: the term is required
//! - `-term`: the term must not occur
//! - `?term`: the term is optional (any optional term is enough to match)
//! - anything else is a free-text word, including a lone `+`, `-` or `?`
//!
//! A query without any prefixed term is searched as one literal phrase:
//! `quarterly report` only matches those two words adjacent and in order.
//! As soon as a prefixed term is present, the free-text words form one
//! phrase and the prefixed terms are matched word by word.
//!
//! Scope filters (account, folder, excluded folders, time bounds) are
//! carried as typed values in a [`SearchScope`], never inside the text.

use crate::model::message::{AccountId, FolderId};

/// Structured filters applied before the text expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchScope {
    /// Only messages of this account.
    pub account: Option<AccountId>,
    /// Only messages in this folder.
    pub folder: Option<FolderId>,
    /// Never messages in these folders.
    pub exclude_folders: Vec<FolderId>,
    /// Only messages strictly newer than this (ms since epoch).
    pub after: Option<i64>,
    /// Only messages strictly older than this (ms since epoch).
    pub before: Option<i64>,
}

/// A single classified query token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryToken {
    Word(String),
    Required(String),
    Forbidden(String),
    Optional(String),
}

/// A compiled query, ready for execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    /// Literal phrase: the whole query when no prefixed term is present,
    /// otherwise the space-joined free-text words (if any).
    pub phrase: Option<String>,
    /// Terms that must occur.
    pub required: Vec<String>,
    /// Terms that must not occur.
    pub forbidden: Vec<String>,
    /// Alternatives ORed with the rest of the expression.
    pub optional: Vec<String>,
    /// Structured filters.
    pub scope: SearchScope,
}

impl QuerySpec {
    /// True when the query has prefixed terms and is matched word by word.
    pub fn has_operators(&self) -> bool {
        !(self.required.is_empty() && self.forbidden.is_empty() && self.optional.is_empty())
    }

    /// True when the query can match nothing (empty input).
    pub fn is_empty(&self) -> bool {
        self.phrase.is_none() && !self.has_operators()
    }
}

/// Classify the whitespace-separated tokens of `input`.
pub fn tokenize(input: &str) -> Vec<QueryToken> {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            let prefix = chars.next();
            let operand = chars.as_str();
            if operand.is_empty() {
                return QueryToken::Word(word.to_string());
            }
            match prefix {
                Some('+') => QueryToken::Required(operand.to_string()),
                Some('-') => QueryToken::Forbidden(operand.to_string()),
                Some('?') => QueryToken::Optional(operand.to_string()),
                _ => QueryToken::Word(word.to_string()),
            }
        })
        .collect()
}

/// Compile a query string and its scope into a [`QuerySpec`].
///
/// Never fails: empty or whitespace-only input yields a query matching nothing,
/// and unusual operator placement is simply classified as above.
pub fn parse_query(input: &str, scope: SearchScope) -> QuerySpec {
    if input.trim().is_empty() {
        return QuerySpec {
            scope,
            ..QuerySpec::default()
        };
    }

    let mut words = Vec::new();
    let mut required = Vec::new();
    let mut forbidden = Vec::new();
    let mut optional = Vec::new();

    for token in tokenize(input) {
        match token {
            QueryToken::Word(w) => words.push(w),
            QueryToken::Required(t) => required.push(t),
            QueryToken::Forbidden(t) => forbidden.push(t),
            QueryToken::Optional(t) => optional.push(t),
        }
    }

    let mut spec = QuerySpec {
        phrase: None,
        required,
        forbidden,
        optional,
        scope,
    };

    spec.phrase = if spec.has_operators() {
        (!words.is_empty()).then(|| words.join(" "))
    } else {
        Some(input.to_string())
    };

    spec
}
