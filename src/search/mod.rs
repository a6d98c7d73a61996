//! Search: query parsing, FTS5 rendering, and execution against the index.

pub mod fts5;
pub mod query;

use tracing::debug;

use crate::index::IndexStore;
use crate::model::message::MessageId;

use self::query::{parse_query, QuerySpec, SearchScope};

/// High-level search: compile the query with its scope and return the ids of
/// matching messages, newest first.
///
/// No hit means "not indexed yet or truly absent"; it is never an error.
pub fn execute(
    store: &IndexStore,
    query_str: &str,
    scope: SearchScope,
) -> crate::error::Result<(QuerySpec, Vec<MessageId>)> {
    let query = parse_query(query_str, scope);
    if query.is_empty() {
        debug!("Empty query, nothing to match");
        return Ok((query, Vec::new()));
    }

    let ids = store.match_ids(&query)?;
    Ok((query, ids))
}
