//! The full-text index store: opening, versioning, writes, vocabulary and matching.

use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, types::Value, Connection, Transaction};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{FtsError, Result};
use crate::index::schema::{self, SCHEMA_VERSION};
use crate::model::message::{IndexEntry, MessageId};
use crate::search::fts5;
use crate::search::query::QuerySpec;

/// What `IndexStore::open` found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// Schema is current; existing entries are valid.
    Ready,
    /// No index existed; a new one was created.
    Created,
    /// The schema was at another version and has been recreated empty.
    Upgraded { from: i32 },
    /// The file was unreadable and has been deleted and recreated empty.
    Recovered,
}

impl OpenStatus {
    /// Whether every message must be marked pending again.
    pub fn requires_rebuild(self) -> bool {
        !matches!(self, Self::Ready)
    }
}

/// Handle to one on-disk full-text index.
///
/// Each thread or caller opens its own handle; SQLite WAL mode lets readers
/// run while a writer holds a transaction.
pub struct IndexStore {
    path: PathBuf,
    conn: Connection,
}

impl IndexStore {
    /// Open (or create) the index at `path`.
    ///
    /// A schema version mismatch drops and recreates the tables. A corrupt or
    /// foreign file is deleted and recreated. Both cases are reported through
    /// [`OpenStatus::requires_rebuild`].
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, OpenStatus)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FtsError::io(parent, e))?;
        }

        match Self::open_checked(&path) {
            Ok(opened) => Ok(opened),
            Err(e) if e.is_fatal() => {
                warn!(path = %path.display(), error = %e, "Index unreadable, recreating");
                delete_files(&path)?;
                let (store, _) = Self::open_checked(&path).map_err(|e| FtsError::Schema {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                Ok((store, OpenStatus::Recovered))
            }
            Err(e) => Err(e),
        }
    }

    fn open_checked(path: &Path) -> Result<(Self, OpenStatus)> {
        let conn = Connection::open(path)?;
        schema::configure(&conn)?;

        let status = match schema::stored_version(&conn)? {
            SCHEMA_VERSION => {
                // Touch the table so a damaged file fails here, not mid-run.
                conn.query_row("SELECT COUNT(*) FROM message", [], |row| row.get::<_, i64>(0))?;
                OpenStatus::Ready
            }
            0 => {
                schema::recreate(&conn, 0)?;
                OpenStatus::Created
            }
            from => {
                schema::recreate(&conn, from)?;
                OpenStatus::Upgraded { from }
            }
        };

        debug!(path = %path.display(), ?status, "Opened full-text index");
        Ok((
            Self {
                path: path.to_path_buf(),
                conn,
            },
            status,
        ))
    }

    /// Path of the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a write transaction. Dropping the writer without
    /// [`IndexWriter::commit`] rolls everything back.
    pub fn begin(&mut self) -> Result<IndexWriter<'_>> {
        Ok(IndexWriter {
            tx: self.conn.transaction()?,
        })
    }

    /// Vocabulary terms starting with `prefix`, rarest first, at most `max`.
    pub fn suggestions(&self, prefix: &str, max: usize) -> Result<Vec<String>> {
        let pattern = format!("{}%", escape_like(&prefix.to_lowercase()));
        let mut stmt = self.conn.prepare_cached(
            "SELECT term FROM message_terms \
             WHERE term LIKE ?1 ESCAPE '\\' \
             ORDER BY cnt \
             LIMIT ?2",
        )?;
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let terms = stmt
            .query_map(params![pattern, limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(terms)
    }

    /// Ids of messages matching `spec`, newest first.
    ///
    /// Scope filters are bound as typed parameters and ANDed with the text
    /// expression. An expression FTS5 rejects matches nothing.
    pub fn match_ids(&self, spec: &QuerySpec) -> Result<Vec<MessageId>> {
        let Some(expression) = fts5::render(spec) else {
            return Ok(Vec::new());
        };

        let scope = &spec.scope;
        let mut sql = String::from("SELECT rowid FROM message WHERE ");
        let mut args: Vec<Value> = Vec::new();

        if let Some(account) = scope.account {
            sql.push_str("account = ? AND ");
            args.push(Value::Integer(account));
        }
        if let Some(folder) = scope.folder {
            sql.push_str("folder = ? AND ");
            args.push(Value::Integer(folder));
        }
        if !scope.exclude_folders.is_empty() {
            let placeholders = vec!["?"; scope.exclude_folders.len()].join(", ");
            sql.push_str(&format!("NOT folder IN ({placeholders}) AND "));
            args.extend(scope.exclude_folders.iter().map(|&f| Value::Integer(f)));
        }
        if let Some(after) = scope.after {
            sql.push_str("time > ? AND ");
            args.push(Value::Integer(after));
        }
        if let Some(before) = scope.before {
            sql.push_str("time < ? AND ");
            args.push(Value::Integer(before));
        }
        sql.push_str("message MATCH ? ORDER BY time DESC");
        args.push(Value::Text(expression.clone()));

        debug!(sql = %sql, search = %expression, "Full-text match");

        let result = self.conn.prepare(&sql).and_then(|mut stmt| {
            let ids = stmt
                .query_map(params_from_iter(args), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<MessageId>>>();
            ids
        });

        match result {
            Ok(ids) => {
                debug!(count = ids.len(), "Full-text match result");
                Ok(ids)
            }
            // FTS5 reports expression syntax errors as plain SQLITE_ERROR
            Err(e) if e.sqlite_error_code() == Some(rusqlite::ErrorCode::Unknown) => {
                debug!(search = %expression, error = %e, "Expression rejected, no matches");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Number of indexed messages.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Merge the FTS5 b-trees into as few segments as possible.
    pub fn optimize(&self) -> Result<()> {
        info!(path = %self.path.display(), "Optimizing full-text index");
        self.conn
            .execute("INSERT INTO message (message) VALUES ('optimize')", [])?;
        Ok(())
    }

    /// Copy committed WAL content back into the main file.
    pub fn checkpoint(&self) -> Result<()> {
        let (busy, log, copied): (i64, i64, i64) =
            self.conn
                .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
        debug!(busy, log, copied, "Index checkpoint");
        Ok(())
    }

    /// Bytes on disk: main file plus write-ahead log.
    pub fn size(&self) -> u64 {
        file_size(&self.path) + file_size(&sibling(&self.path, "-wal"))
    }

    /// Close the connection, reporting any error SQLite raises on close.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| FtsError::Database(e))
    }
}

/// A write transaction on the index.
pub struct IndexWriter<'a> {
    tx: Transaction<'a>,
}

impl IndexWriter<'_> {
    /// Replace the entry for `entry.id`: delete any existing row, then insert.
    pub fn insert(&self, entry: &IndexEntry) -> Result<()> {
        debug!(id = entry.id, "Index insert");
        self.delete(entry.id)?;

        let inserted = self.tx.execute(
            "INSERT INTO message \
             (rowid, account, folder, time, address, subject, keyword, text, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id,
                entry.account,
                entry.folder,
                entry.time,
                entry.address,
                entry.subject,
                entry.keyword,
                entry.text,
                entry.notes,
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(e)
                if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) =>
            {
                Err(FtsError::WriteConflict(entry.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the entry for `id`, if any.
    pub fn delete(&self, id: MessageId) -> Result<()> {
        self.tx
            .execute("DELETE FROM message WHERE rowid = ?1", params![id])?;
        Ok(())
    }

    /// Remove every entry.
    pub fn delete_all(&self) -> Result<()> {
        let removed = self.tx.execute("DELETE FROM message", [])?;
        info!(removed, "Cleared full-text index");
        Ok(())
    }

    /// Make the transaction's writes durable and visible.
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

/// Default index location for a mail root inside the cache directory.
///
/// Example: `~/.cache/mailfts/<sha256_of_root>.fts.db`
pub fn default_index_path(cache_dir: &Path, root: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    cache_dir.join(format!("{hash}.fts.db"))
}

/// Delete the index file and its WAL/shared-memory siblings.
fn delete_files(path: &Path) -> Result<()> {
    for file in [
        path.to_path_buf(),
        sibling(path, "-wal"),
        sibling(path, "-shm"),
    ] {
        match std::fs::remove_file(&file) {
            Ok(()) => debug!(path = %file.display(), "Deleted index file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FtsError::io(file, e)),
        }
    }
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Escape `LIKE` wildcards so a prefix is matched literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::query::{parse_query, SearchScope};

    fn entry(id: MessageId, time: i64, text: &str) -> IndexEntry {
        IndexEntry {
            id,
            account: 1,
            folder: 10,
            time,
            address: "Alice <alice@example.com>".into(),
            subject: format!("subject {id}"),
            keyword: String::new(),
            text: text.into(),
            notes: String::new(),
        }
    }

    fn open_temp() -> (tempfile::TempDir, IndexStore) {
        let dir = tempfile::tempdir().unwrap();
        let (store, status) = IndexStore::open(dir.path().join("fts.db")).unwrap();
        assert_eq!(status, OpenStatus::Created);
        (dir, store)
    }

    fn search(store: &IndexStore, query: &str) -> Vec<MessageId> {
        store
            .match_ids(&parse_query(query, SearchScope::default()))
            .unwrap()
    }

    #[test]
    fn test_reopen_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fts.db");
        let (store, _) = IndexStore::open(&path).unwrap();
        store.close().unwrap();
        let (_, status) = IndexStore::open(&path).unwrap();
        assert_eq!(status, OpenStatus::Ready);
        assert!(!status.requires_rebuild());
    }

    #[test]
    fn test_version_mismatch_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fts.db");
        {
            let (mut store, _) = IndexStore::open(&path).unwrap();
            let w = store.begin().unwrap();
            w.insert(&entry(1, 1, "alpha")).unwrap();
            w.commit().unwrap();
            store.conn.execute_batch("PRAGMA user_version = 4;").unwrap();
        }
        let (store, status) = IndexStore::open(&path).unwrap();
        assert_eq!(status, OpenStatus::Upgraded { from: 4 });
        assert!(status.requires_rebuild());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_file_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fts.db");
        std::fs::write(&path, vec![0x5a_u8; 8192]).unwrap();
        let (store, status) = IndexStore::open(&path).unwrap();
        assert_eq!(status, OpenStatus::Recovered);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_then_delete() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(5, 100, "the alpha release")).unwrap();
        w.commit().unwrap();
        assert_eq!(search(&store, "alpha"), vec![5]);

        let w = store.begin().unwrap();
        w.delete(5).unwrap();
        w.commit().unwrap();
        assert!(search(&store, "alpha").is_empty());
    }

    #[test]
    fn test_insert_twice_keeps_latest() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(5, 100, "first draft")).unwrap();
        w.insert(&entry(5, 100, "second version")).unwrap();
        w.commit().unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert!(search(&store, "draft").is_empty());
        assert_eq!(search(&store, "second"), vec![5]);
    }

    #[test]
    fn test_uncommitted_writes_roll_back() {
        let (_dir, mut store) = open_temp();
        {
            let w = store.begin().unwrap();
            w.insert(&entry(1, 1, "alpha")).unwrap();
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_results_newest_first() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(1, 300, "alpha")).unwrap();
        w.insert(&entry(2, 100, "alpha")).unwrap();
        w.insert(&entry(3, 200, "alpha")).unwrap();
        w.commit().unwrap();
        assert_eq!(search(&store, "alpha"), vec![1, 3, 2]);
    }

    #[test]
    fn test_accent_and_case_folding() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(1, 1, "Café con leña")).unwrap();
        w.commit().unwrap();
        assert_eq!(search(&store, "cafe"), vec![1]);
        assert_eq!(search(&store, "LENA"), vec![1]);
    }

    #[test]
    fn test_time_bounds_are_exclusive() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        for (id, time) in [(1, 100), (2, 200), (3, 300)] {
            w.insert(&entry(id, time, "alpha")).unwrap();
        }
        w.commit().unwrap();
        let scope = SearchScope {
            after: Some(100),
            before: Some(300),
            ..SearchScope::default()
        };
        let ids = store.match_ids(&parse_query("alpha", scope)).unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_suggestions_rarest_first() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(1, 1, "project projector projector")).unwrap();
        w.insert(&entry(2, 2, "projector projection projection")).unwrap();
        w.commit().unwrap();
        let terms = store.suggestions("Proj", 10).unwrap();
        assert_eq!(terms.first().map(String::as_str), Some("project"));
        assert_eq!(terms.last().map(String::as_str), Some("projector"));
        assert_eq!(terms.len(), 3);
        assert_eq!(store.suggestions("proj", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_suggestions_escape_wildcards() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(1, 1, "alpha")).unwrap();
        w.commit().unwrap();
        assert!(store.suggestions("_lpha", 5).unwrap().is_empty());
        assert!(store.suggestions("%", 5).unwrap().is_empty());
    }

    #[test]
    fn test_delete_all_and_optimize() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(1, 1, "alpha")).unwrap();
        w.insert(&entry(2, 2, "beta")).unwrap();
        w.commit().unwrap();
        let w = store.begin().unwrap();
        w.delete_all().unwrap();
        w.commit().unwrap();
        store.optimize().unwrap();
        store.checkpoint().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.size() > 0);
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let (_dir, mut store) = open_temp();
        let w = store.begin().unwrap();
        w.insert(&entry(1, 1, "alpha")).unwrap();
        w.commit().unwrap();
        assert!(search(&store, "").is_empty());
        assert!(search(&store, "  ").is_empty());
    }

    #[test]
    fn test_default_index_path_is_stable() {
        let a = default_index_path(Path::new("/cache"), Path::new("/mail"));
        let b = default_index_path(Path::new("/cache"), Path::new("/mail"));
        assert_eq!(a, b);
        assert!(a.to_string_lossy().ends_with(".fts.db"));
        assert_ne!(a, default_index_path(Path::new("/cache"), Path::new("/other")));
    }
}
