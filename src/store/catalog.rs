//! File-backed message corpus over a directory of `.eml` files.
//!
//! Layout: `<root>/<account>/<folder>[/<subfolder>...]/<name>.eml`. The
//! catalog assigns stable ids and tracks which messages still need indexing.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (64 bytes, fixed)             │
//! │  magic: [u8; 8] = b"MAILFTS\0"      │
//! │  version: u32                        │
//! │  entry_count: u64                    │
//! │  next_id: i64                        │
//! │  (padding to 64 bytes)               │
//! ├──────────────────────────────────────┤
//! │ BODY (variable)                      │
//! │  bincode-serialized CatalogBody      │
//! └──────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FtsError, Result};
use crate::model::message::{AccountId, FolderId, Message, MessageId};
use crate::parser::mime;
use crate::worker::MessageCorpus;

/// Catalog file name, stored in the corpus root.
pub const CATALOG_FILE: &str = ".mailfts-catalog";

/// Magic bytes identifying a catalog file.
pub const MAGIC: &[u8; 8] = b"MAILFTS\0";

/// Current catalog format version.
pub const VERSION: u32 = 1;

const HEADER_SIZE: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogHeader {
    magic: [u8; 8],
    version: u32,
    entry_count: u64,
    next_id: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogBody {
    accounts: Vec<String>,
    folders: Vec<String>,
    entries: Vec<CatalogEntry>,
}

/// One message file known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: MessageId,
    pub account: AccountId,
    pub folder: FolderId,
    /// Path relative to the corpus root, `/`-separated.
    pub rel_path: String,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified: i64,
    /// Not yet reflected in the index.
    pub pending: bool,
}

/// Changes found by [`MailCatalog::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: Vec<MessageId>,
    pub changed: Vec<MessageId>,
    /// Ids whose file disappeared; their index entries should be deleted.
    pub removed: Vec<MessageId>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total: usize,
    pub indexed: usize,
    pub pending: usize,
    pub accounts: usize,
    pub folders: usize,
}

/// The `.eml` directory corpus.
#[derive(Debug)]
pub struct MailCatalog {
    root: PathBuf,
    path: PathBuf,
    accounts: Vec<String>,
    folders: Vec<String>,
    entries: BTreeMap<MessageId, CatalogEntry>,
    next_id: MessageId,
    fresh: bool,
}

impl MailCatalog {
    /// Open the catalog of `root`, starting over if it is missing or invalid.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(FtsError::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let path = root.join(CATALOG_FILE);
        let mut catalog = Self {
            root: root.to_path_buf(),
            path,
            accounts: Vec::new(),
            folders: Vec::new(),
            entries: BTreeMap::new(),
            next_id: 1,
            fresh: true,
        };

        if catalog.path.exists() {
            match load_catalog(&catalog.path) {
                Ok((header, body)) => {
                    catalog.accounts = body.accounts;
                    catalog.folders = body.folders;
                    catalog.entries = body.entries.into_iter().map(|e| (e.id, e)).collect();
                    catalog.next_id = header.next_id;
                    catalog.fresh = false;
                    debug!(entries = catalog.entries.len(), "Catalog loaded");
                }
                Err(e) => {
                    warn!(error = %e, "Discarding catalog");
                }
            }
        }

        Ok(catalog)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if no valid catalog existed: every id is new, so any index built
    /// for this root is stale.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Scan the tree and reconcile it with the catalog.
    ///
    /// New files get fresh ids; new or changed files become pending. Files
    /// that vanished are dropped from the catalog and reported.
    pub fn refresh(&mut self) -> Result<RefreshReport> {
        let mut found = Vec::new();
        scan_dir(&self.root, &self.root, &mut found)?;

        let by_path: HashMap<String, MessageId> = self
            .entries
            .values()
            .map(|e| (e.rel_path.clone(), e.id))
            .collect();

        let mut report = RefreshReport::default();
        let mut seen = HashSet::with_capacity(found.len());

        for file in found {
            let Some((account, folder)) = split_rel_path(&file.rel_path) else {
                debug!(path = %file.rel_path, "Not inside an account folder, skipping");
                continue;
            };

            if let Some(&id) = by_path.get(&file.rel_path) {
                seen.insert(id);
                if let Some(entry) = self.entries.get_mut(&id) {
                    if entry.size != file.size || entry.modified != file.modified {
                        entry.size = file.size;
                        entry.modified = file.modified;
                        entry.pending = true;
                        report.changed.push(id);
                    }
                }
                continue;
            }

            let account = intern(&mut self.accounts, account);
            let folder = intern(&mut self.folders, &folder);
            let id = self.next_id;
            self.next_id += 1;
            self.entries.insert(
                id,
                CatalogEntry {
                    id,
                    account,
                    folder,
                    rel_path: file.rel_path,
                    size: file.size,
                    modified: file.modified,
                    pending: true,
                },
            );
            seen.insert(id);
            report.added.push(id);
        }

        report.removed = self
            .entries
            .keys()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        for id in &report.removed {
            self.entries.remove(id);
        }

        info!(
            added = report.added.len(),
            changed = report.changed.len(),
            removed = report.removed.len(),
            "Catalog refreshed"
        );
        Ok(report)
    }

    /// Persist the catalog, replacing the previous file atomically.
    pub fn save(&mut self) -> Result<()> {
        let header = CatalogHeader {
            magic: *MAGIC,
            version: VERSION,
            entry_count: self.entries.len() as u64,
            next_id: self.next_id,
        };
        let body = CatalogBody {
            accounts: self.accounts.clone(),
            folders: self.folders.clone(),
            entries: self.entries.values().cloned().collect(),
        };

        let encode_err = |e: bincode::Error| FtsError::InvalidCatalog {
            path: self.path.clone(),
            reason: format!("Serialization failed: {e}"),
        };
        let header_bytes = bincode::serialize(&header).map_err(encode_err)?;
        let body_bytes = bincode::serialize(&body).map_err(encode_err)?;

        let mut data = vec![0u8; HEADER_SIZE];
        data[..header_bytes.len().min(HEADER_SIZE)]
            .copy_from_slice(&header_bytes[..header_bytes.len().min(HEADER_SIZE)]);
        data.extend_from_slice(&body_bytes);

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &data).map_err(|e| FtsError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| FtsError::io(&self.path, e))?;
        self.fresh = false;
        debug!(path = %self.path.display(), entries = header.entry_count, "Catalog saved");
        Ok(())
    }

    pub fn stats(&self) -> CatalogStats {
        let pending = self.entries.values().filter(|e| e.pending).count();
        CatalogStats {
            total: self.entries.len(),
            indexed: self.entries.len() - pending,
            pending,
            accounts: self.accounts.len(),
            folders: self.folders.len(),
        }
    }

    pub fn entry(&self, id: MessageId) -> Option<&CatalogEntry> {
        self.entries.get(&id)
    }

    /// Id of the account directory `name`.
    pub fn account_id(&self, name: &str) -> Option<AccountId> {
        position_id(&self.accounts, name)
    }

    /// Id of the folder `path`, given as `account/folder[/subfolder...]`.
    pub fn folder_id(&self, path: &str) -> Option<FolderId> {
        position_id(&self.folders, path.trim_matches('/'))
    }

    pub fn folder_name(&self, id: FolderId) -> Option<&str> {
        usize::try_from(id - 1)
            .ok()
            .and_then(|i| self.folders.get(i))
            .map(String::as_str)
    }
}

impl MessageCorpus for MailCatalog {
    fn pending_index_ids(&self) -> Result<Vec<MessageId>> {
        Ok(self
            .entries
            .values()
            .filter(|e| e.pending)
            .map(|e| e.id)
            .collect())
    }

    fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let Some(entry) = self.entries.get(&id) else {
            return Ok(None);
        };
        let path = self.root.join(&entry.rel_path);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FtsError::io(path, e)),
        };

        let headers = match mime::parse_headers(&raw) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(
                    id,
                    path = %path.display(),
                    error = %e,
                    "No parseable headers, indexing body only"
                );
                mime::MessageHeaders::default()
            }
        };
        Ok(Some(Message {
            id,
            account: entry.account,
            folder: entry.folder,
            time: headers.date_millis.unwrap_or(entry.modified),
            from: headers.from,
            to: headers.to,
            cc: headers.cc,
            bcc: headers.bcc,
            subject: headers.subject,
            keywords: headers.keywords,
            notes: None,
        }))
    }

    fn message_body_path(&self, id: MessageId) -> Result<Option<PathBuf>> {
        Ok(self.entries.get(&id).map(|e| self.root.join(&e.rel_path)))
    }

    fn mark_indexed(&mut self, ids: &[MessageId]) -> Result<()> {
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.pending = false;
            }
        }
        self.save()
    }

    fn reset_pending(&mut self) -> Result<()> {
        for entry in self.entries.values_mut() {
            entry.pending = true;
        }
        self.save()
    }
}

/// Load and validate a catalog file.
fn load_catalog(path: &Path) -> Result<(CatalogHeader, CatalogBody)> {
    let data = fs::read(path).map_err(|e| FtsError::io(path, e))?;
    let invalid = |reason: String| FtsError::InvalidCatalog {
        path: path.to_path_buf(),
        reason,
    };

    if data.len() < HEADER_SIZE {
        return Err(invalid("File too small".into()));
    }

    let header: CatalogHeader = bincode::deserialize(&data[..HEADER_SIZE])
        .map_err(|e| invalid(format!("Header deserialization failed: {e}")))?;
    if header.magic != *MAGIC {
        return Err(invalid("Invalid magic bytes".into()));
    }
    if header.version != VERSION {
        return Err(invalid(format!(
            "Incompatible version: expected {VERSION}, found {}",
            header.version
        )));
    }

    let body: CatalogBody = bincode::deserialize(&data[HEADER_SIZE..])
        .map_err(|e| invalid(format!("Body deserialization failed: {e}")))?;
    if body.entries.len() as u64 != header.entry_count {
        return Err(invalid("Entry count mismatch".into()));
    }

    Ok((header, body))
}

struct FoundFile {
    rel_path: String,
    size: u64,
    modified: i64,
}

/// Collect `.eml` files under `dir`, in name order, skipping hidden entries.
fn scan_dir(root: &Path, dir: &Path, found: &mut Vec<FoundFile>) -> Result<()> {
    let mut children: Vec<_> = fs::read_dir(dir)
        .map_err(|e| FtsError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .collect();
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let name = child.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = child.path();
        let meta = match child.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not stat, skipping");
                continue;
            }
        };

        if meta.is_dir() {
            scan_dir(root, &path, found)?;
        } else if is_eml(&path) {
            let Ok(rel) = path.strip_prefix(root) else { continue };
            let rel_path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            found.push(FoundFile {
                rel_path,
                size: meta.len(),
                modified,
            });
        }
    }
    Ok(())
}

fn is_eml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
}

/// Split `account/folder/.../file.eml` into the account and folder names.
fn split_rel_path(rel_path: &str) -> Option<(&str, String)> {
    let (dir, _file) = rel_path.rsplit_once('/')?;
    let (account, _folder) = dir.split_once('/')?;
    Some((account, dir.to_string()))
}

/// Id (1-based position) of `name` in `names`, appending it if absent.
fn intern(names: &mut Vec<String>, name: &str) -> i64 {
    match names.iter().position(|n| n == name) {
        Some(i) => i as i64 + 1,
        None => {
            names.push(name.to_string());
            names.len() as i64
        }
    }
}

fn position_id(names: &[String], name: &str) -> Option<i64> {
    names.iter().position(|n| n == name).map(|i| i as i64 + 1)
}
