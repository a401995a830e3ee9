//! Durable path → document identity ledger.
//!
//! The ledger decides whether an ingest is new, unchanged, an edit, or a
//! duplicate of content already indexed under another path. It is a JSON
//! snapshot loaded wholesale at open and rewritten (temp file + rename)
//! after every mutation, so a crash leaves either the old or the new
//! snapshot on disk, never a torn one.
//!
//! Invariants:
//! - at most one document id per path, and `id_to_path` mirrors `path_to_id`;
//! - `hash_to_id` is first-writer-wins: committing a fingerprint that
//!   already maps to another document leaves that mapping alone;
//! - a fingerprint mapping is dropped only by the document it points at;
//! - before a path's chunks are written, the number of chunk ids that may
//!   exist for it is recorded in `path_to_pending`, so cleanup after a
//!   failed or interrupted write always knows every id to remove.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current record for one ingested path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub document_id: String,
    pub fingerprint: String,
    pub chunk_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    path_to_id: BTreeMap<String, String>,
    #[serde(default)]
    id_to_path: BTreeMap<String, String>,
    #[serde(default)]
    path_to_hash: BTreeMap<String, String>,
    #[serde(default)]
    hash_to_id: BTreeMap<String, String>,
    #[serde(default)]
    path_to_chunks: BTreeMap<String, usize>,
    #[serde(default)]
    path_to_updated: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    path_to_pending: BTreeMap<String, PendingWrite>,
}

/// A chunk write that started but has not been committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingWrite {
    document_id: String,
    /// Upper bound on chunk ids that may exist for the path.
    chunks: usize,
}

#[derive(Debug)]
pub struct Ledger {
    /// `None` for an ephemeral ledger that is never written to disk.
    file: Option<PathBuf>,
    state: Snapshot,
}

impl Ledger {
    /// Load the ledger at `file`, or start empty if it does not exist yet.
    pub fn open(file: &Path) -> Result<Self> {
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create ledger directory: {}", parent.display())
                })?;
            }
        }

        let state = if file.exists() {
            let raw = std::fs::read(file)
                .with_context(|| format!("Failed to read ledger: {}", file.display()))?;
            serde_json::from_slice(&raw)
                .with_context(|| format!("Corrupt ledger file: {}", file.display()))?
        } else {
            Snapshot::default()
        };

        let ledger = Self {
            file: Some(file.to_path_buf()),
            state,
        };
        tracing::debug!(
            "[ledger] opened {} ({} documents)",
            file.display(),
            ledger.len()
        );
        Ok(ledger)
    }

    /// A ledger that lives only in memory, for ephemeral vector stores.
    pub fn ephemeral() -> Self {
        Self {
            file: None,
            state: Snapshot::default(),
        }
    }

    /// Snapshot file name for an index.
    pub fn file_name(index_name: &str) -> String {
        format!("{index_name}_meta.json")
    }

    pub fn lookup(&self, path: &str) -> Option<LedgerEntry> {
        let document_id = self.state.path_to_id.get(path)?.clone();
        Some(LedgerEntry {
            document_id,
            fingerprint: self.state.path_to_hash.get(path).cloned().unwrap_or_default(),
            chunk_count: self.state.path_to_chunks.get(path).copied().unwrap_or(0),
            updated_at: self
                .state
                .path_to_updated
                .get(path)
                .copied()
                .unwrap_or_default(),
        })
    }

    /// Document id that first committed `fingerprint`.
    pub fn lookup_by_fingerprint(&self, fingerprint: &str) -> Option<&str> {
        self.state.hash_to_id.get(fingerprint).map(String::as_str)
    }

    /// Whether a chunk write for `path` started without being committed.
    pub fn is_pending(&self, path: &str) -> bool {
        self.state.path_to_pending.contains_key(path)
    }

    /// Number of chunk ids that may exist for `path`: the committed count
    /// or the high-water mark of an uncommitted write, whichever is larger.
    pub fn chunk_span(&self, path: &str) -> usize {
        let committed = self.state.path_to_chunks.get(path).copied().unwrap_or(0);
        let pending = self
            .state
            .path_to_pending
            .get(path)
            .map_or(0, |p| p.chunks);
        committed.max(pending)
    }

    /// Document id and chunk span of everything `path` may have in the
    /// vector store, committed or not.
    pub fn footprint(&self, path: &str) -> Option<(String, usize)> {
        let document_id = match self.state.path_to_id.get(path) {
            Some(id) => id.clone(),
            None => self.state.path_to_pending.get(path)?.document_id.clone(),
        };
        Some((document_id, self.chunk_span(path)))
    }

    /// Record, before any store write, that `path` is about to hold up to
    /// `chunks` chunk ids under `document_id`. Never lowers the mark.
    pub fn begin_write(&mut self, path: &str, document_id: &str, chunks: usize) -> Result<()> {
        let chunks = chunks.max(self.chunk_span(path));
        self.state.path_to_pending.insert(
            path.to_string(),
            PendingWrite {
                document_id: document_id.to_string(),
                chunks,
            },
        );
        self.flush()
    }

    /// Forget the fingerprint of `path` after a failed write left its
    /// chunks in an unknown state, so the next ingest rewrites them.
    pub fn invalidate(&mut self, path: &str) -> Result<()> {
        let Some(fingerprint) = self.state.path_to_hash.remove(path) else {
            return Ok(());
        };
        if let Some(document_id) = self.state.path_to_id.get(path).cloned() {
            self.release_fingerprint(&fingerprint, &document_id);
        }
        self.flush()
    }

    /// Record the current state of `path` and persist.
    pub fn commit(
        &mut self,
        path: &str,
        document_id: &str,
        fingerprint: &str,
        chunk_count: usize,
    ) -> Result<()> {
        let old_fp = self.state.path_to_hash.get(path).cloned();
        if let Some(old_fp) = old_fp.filter(|fp| fp != fingerprint) {
            self.release_fingerprint(&old_fp, document_id);
        }
        if let Some(old_id) = self.state.path_to_id.get(path) {
            if old_id != document_id {
                self.state.id_to_path.remove(old_id);
            }
        }

        self.state
            .path_to_id
            .insert(path.to_string(), document_id.to_string());
        self.state
            .id_to_path
            .insert(document_id.to_string(), path.to_string());
        self.state
            .path_to_hash
            .insert(path.to_string(), fingerprint.to_string());
        self.state
            .hash_to_id
            .entry(fingerprint.to_string())
            .or_insert_with(|| document_id.to_string());
        self.state
            .path_to_chunks
            .insert(path.to_string(), chunk_count);
        self.state
            .path_to_updated
            .insert(path.to_string(), Utc::now());
        self.state.path_to_pending.remove(path);

        self.flush()
    }

    /// Forget `path`, including any uncommitted write, and persist.
    /// Returns the committed entry that was removed.
    pub fn remove(&mut self, path: &str) -> Result<Option<LedgerEntry>> {
        let had_pending = self.state.path_to_pending.remove(path).is_some();
        let Some(entry) = self.lookup(path) else {
            if had_pending {
                self.flush()?;
            }
            return Ok(None);
        };

        self.state.path_to_id.remove(path);
        self.state.path_to_hash.remove(path);
        self.state.path_to_chunks.remove(path);
        self.state.path_to_updated.remove(path);
        if self.state.id_to_path.get(&entry.document_id).map(String::as_str) == Some(path) {
            self.state.id_to_path.remove(&entry.document_id);
        }
        self.release_fingerprint(&entry.fingerprint, &entry.document_id);

        self.flush()?;
        Ok(Some(entry))
    }

    /// Ingested paths, sorted.
    pub fn list_paths(&self) -> Vec<String> {
        self.state.path_to_id.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.path_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.path_to_id.is_empty()
    }

    fn release_fingerprint(&mut self, fingerprint: &str, document_id: &str) {
        if self.state.hash_to_id.get(fingerprint).map(String::as_str) == Some(document_id) {
            self.state.hash_to_id.remove(fingerprint);
        }
    }

    fn flush(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let tmp = file.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&self.state)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write ledger: {}", tmp.display()))?;
        std::fs::rename(&tmp, file)
            .with_context(|| format!("Failed to replace ledger: {}", file.display()))?;
        Ok(())
    }
}
