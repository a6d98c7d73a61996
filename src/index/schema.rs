//! On-disk schema of the full-text index.
//!
//! ```text
//! message        FTS5 virtual table, rowid = message id
//!  ├─ account    UNINDEXED
//!  ├─ folder     UNINDEXED
//!  ├─ time       UNINDEXED (ms since epoch, result ordering)
//!  ├─ address    from + to + cc + bcc
//!  ├─ subject
//!  ├─ keyword
//!  ├─ text       plain-text body
//!  └─ notes
//! message_terms  fts5vocab('message', 'row'): term, doc, cnt
//! ```
//!
//! The schema version lives in `PRAGMA user_version`. Any mismatch drops both
//! tables and recreates them; the index content is always rebuildable from
//! the corpus.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version. Bump whenever a table definition changes.
pub const SCHEMA_VERSION: i32 = 5;

/// Tokenizer: Unicode word boundaries, case folding, diacritics removed.
pub const TOKENIZER: &str = "unicode61 remove_diacritics 2";

/// Milliseconds a connection waits on a locked database before failing.
pub const BUSY_TIMEOUT_MS: u64 = 10_000;

/// Read the schema version stored in the file (0 for a new file).
pub fn stored_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Connection settings applied on every open.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
    // journal_mode returns the resulting mode as a row
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(())
}

/// Create both tables and stamp the current version.
pub fn create(conn: &Connection) -> Result<()> {
    info!(version = SCHEMA_VERSION, "Creating full-text index schema");
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE message USING fts5(\
            account UNINDEXED, \
            folder UNINDEXED, \
            time UNINDEXED, \
            address, \
            subject, \
            keyword, \
            text, \
            notes, \
            tokenize = '{TOKENIZER}');\
         CREATE VIRTUAL TABLE message_terms USING fts5vocab('message', 'row');\
         PRAGMA user_version = {SCHEMA_VERSION};"
    ))?;
    Ok(())
}

/// Drop whatever schema is present and create the current one.
pub fn recreate(conn: &Connection, from_version: i32) -> Result<()> {
    info!(
        from = from_version,
        to = SCHEMA_VERSION,
        "Upgrading full-text index schema"
    );
    conn.execute_batch(
        "DROP TABLE IF EXISTS message_terms;\
         DROP TABLE IF EXISTS message;",
    )?;
    create(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stamps_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 0);
        create(&conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_recreate_replaces_old_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE message (x); PRAGMA user_version = 2;")
            .unwrap();
        recreate(&conn, 2).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);
        let terms: i64 = conn
            .query_row("SELECT COUNT(*) FROM message_terms", [], |row| row.get(0))
            .unwrap();
        assert_eq!(terms, 0);
    }
}
