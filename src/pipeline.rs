//! Ingestion pipeline orchestration.
//!
//! Coordinates the per-file flow: load → fingerprint → ledger decision →
//! chunk → embed → vector store → ledger commit. From a caller's point of
//! view each file is processed atomically:
//!
//! - all chunks are embedded before the first store write, so an embedding
//!   failure leaves the store untouched;
//! - before the first store write the ledger records how many chunk ids
//!   the path may occupy, and a failed write clears the path's
//!   fingerprint, so cleanup and the next ingest never trust a half-written
//!   chunk set;
//! - the ledger commit comes last, so a failed or interrupted write is
//!   retried in full by the next ingest of the same path;
//! - at most one ingest or delete runs per path at a time, and the
//!   fingerprint of every in-flight new document is reserved so two
//!   identical files racing each other cannot both be stored.
//!
//! Per-file failures are returned as [`Outcome::Error`] values, never as
//! `Err`, so the watch loop keeps running.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use vecsync_core::chunk::Chunker;
use vecsync_core::models::{chunk_id, fingerprint, ChunkRecord};

use crate::config::{Config, PipelineConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::error::IngestError;
use crate::ledger::Ledger;
use crate::loader::{FileLoader, FsLoader, LoadError};
use crate::store::{index_name, open_store, DimensionMismatch, VectorMatch, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoChange,
    DuplicateContent,
    EmptyFile,
}

/// Result of one ingest or delete, as reported to callers and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ingested {
        id: String,
        chunks: usize,
        hard_splits: usize,
    },
    Skipped {
        reason: SkipReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        duplicate_of: Option<String>,
    },
    Deleted {
        id: String,
        chunks: usize,
    },
    Error {
        reason: String,
        detail: String,
    },
}

impl Outcome {
    fn skipped(reason: SkipReason) -> Self {
        Outcome::Skipped {
            reason,
            duplicate_of: None,
        }
    }

    fn from_error(err: &IngestError) -> Self {
        Outcome::Error {
            reason: err.reason().to_string(),
            detail: err.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    /// Delete of a path that was never ingested, or load of a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Outcome::Error { reason, .. } if reason == "not_found")
    }
}

/// One async mutex per path, created on demand.
#[derive(Default)]
struct PathLocks {
    locks: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    const PRUNE_ABOVE: usize = 1024;

    async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if locks.len() > Self::PRUNE_ABOVE {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

struct LedgerState {
    ledger: Ledger,
    /// fingerprint → document id of new documents currently being written.
    in_flight: HashMap<String, String>,
}

/// What the ledger says to do with a loaded file.
enum Plan {
    Skip(Outcome),
    Write {
        document_id: String,
        /// Chunk ids that may already exist for the path.
        previous_chunks: usize,
        reserved: bool,
    },
}

/// Chunks of one document with their embeddings, ready to write.
struct Embedded {
    records: Vec<ChunkRecord>,
    vectors: Vec<Vec<f32>>,
    hard_splits: usize,
}

pub struct Pipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    loader: Arc<dyn FileLoader>,
    chunker: Chunker,
    state: Mutex<LedgerState>,
    locks: PathLocks,
    load_attempts: u32,
    retry_delay: Duration,
    call_timeout: Duration,
}

impl Pipeline {
    /// Assemble a pipeline. Fails if the embedder and the store disagree
    /// on vector length.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        ledger: Ledger,
        chunker: Chunker,
        settings: &PipelineConfig,
    ) -> Result<Self, IngestError> {
        if embedder.dims() != store.dims() {
            return Err(IngestError::Configuration(
                DimensionMismatch {
                    context: format!("{} store vs {}", store.backend(), embedder.model_name()),
                    expected: store.dims(),
                    found: embedder.dims(),
                }
                .to_string(),
            ));
        }

        Ok(Self {
            embedder,
            store,
            loader: Arc::new(FsLoader),
            chunker,
            state: Mutex::new(LedgerState {
                ledger,
                in_flight: HashMap::new(),
            }),
            locks: PathLocks::default(),
            load_attempts: settings.load_attempts.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
        })
    }

    pub fn with_loader(mut self, loader: Arc<dyn FileLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Build everything from config: embedder, index, store, and ledger.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)
            .map_err(|e| IngestError::Configuration(format!("{e:#}")))?;
        let dims = embedder.dims();
        let index = index_name(embedder.model_name(), dims);

        let store = open_store(&config.store, &index, dims)
            .await
            .map_err(|e| match e.downcast_ref::<DimensionMismatch>() {
                Some(mismatch) => IngestError::Configuration(mismatch.to_string()).into(),
                None => e,
            })?;

        let ledger = if config.store.backend == "memory" {
            Ledger::ephemeral()
        } else {
            Ledger::open(&config.ledger_dir().join(Ledger::file_name(&index)))?
        };

        let chunker = Chunker::new(config.max_tokens(), config.chunking.overlap_tokens);
        tracing::info!(
            "[pipeline] model {} ({} dims), chunks of {} tokens, overlap {}",
            embedder.model_name(),
            dims,
            chunker.max_tokens(),
            chunker.overlap_tokens()
        );
        Ok(Self::new(embedder, store, ledger, chunker, &config.pipeline)?)
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingest one file.
    pub async fn ingest(&self, path: &Path) -> Outcome {
        let path = absolute(path);
        let _guard = self.locks.acquire(&path).await;
        let outcome = match self.ingest_locked(&path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("[pipeline] {}: {}", path.display(), e);
                Outcome::from_error(&e)
            }
        };
        match &outcome {
            Outcome::Ingested { chunks, .. } => {
                tracing::info!("[pipeline] ingested {} ({} chunks)", path.display(), chunks)
            }
            Outcome::Skipped { reason, .. } => {
                tracing::debug!("[pipeline] skipped {} ({:?})", path.display(), reason)
            }
            _ => {}
        }
        outcome
    }

    async fn ingest_locked(&self, path: &Path) -> Result<Outcome, IngestError> {
        let key = path_key(path);
        let text = self.load_with_retry(path).await?;
        if text.trim().is_empty() {
            return Ok(Outcome::skipped(SkipReason::EmptyFile));
        }
        let fp = fingerprint(&text);

        let (document_id, previous_chunks, reserved) = match self.plan(&key, &fp).await {
            Plan::Skip(outcome) => return Ok(outcome),
            Plan::Write {
                document_id,
                previous_chunks,
                reserved,
            } => (document_id, previous_chunks, reserved),
        };

        let result = self
            .embed_and_write(&key, &document_id, &text, &fp, previous_chunks)
            .await;

        let mut state = self.state.lock().await;
        if reserved {
            state.in_flight.remove(&fp);
        }
        let (chunks, hard_splits) = result?;
        state
            .ledger
            .commit(&key, &document_id, &fp, chunks)
            .map_err(|e| IngestError::backend(e.context("ledger commit failed")))?;

        Ok(Outcome::Ingested {
            id: document_id,
            chunks,
            hard_splits,
        })
    }

    /// Embed, mark the write as pending, then write. A failed write
    /// invalidates the path's fingerprint. Returns `(chunk_count, hard_splits)`.
    async fn embed_and_write(
        &self,
        key: &str,
        document_id: &str,
        text: &str,
        fp: &str,
        previous_chunks: usize,
    ) -> Result<(usize, usize), IngestError> {
        let embedded = self.embed_chunks(key, document_id, text, fp).await?;
        let count = embedded.records.len();
        let span = count.max(previous_chunks);

        self.state
            .lock()
            .await
            .ledger
            .begin_write(key, document_id, span)
            .map_err(|e| IngestError::backend(e.context("ledger update failed")))?;

        if let Err(e) = self.write_chunks(key, document_id, &embedded, span).await {
            if let Err(ledger_err) = self.state.lock().await.ledger.invalidate(key) {
                tracing::warn!("[pipeline] {}: {:#}", key, ledger_err);
            }
            return Err(e);
        }
        Ok((count, embedded.hard_splits))
    }

    async fn plan(&self, key: &str, fp: &str) -> Plan {
        let mut state = self.state.lock().await;

        if let Some(entry) = state.ledger.lookup(key) {
            if entry.fingerprint == fp && !state.ledger.is_pending(key) {
                return Plan::Skip(Outcome::skipped(SkipReason::NoChange));
            }
            return Plan::Write {
                document_id: entry.document_id,
                previous_chunks: state.ledger.chunk_span(key),
                reserved: false,
            };
        }

        let owner = state
            .ledger
            .lookup_by_fingerprint(fp)
            .map(str::to_string)
            .or_else(|| state.in_flight.get(fp).cloned());
        if let Some(original) = owner {
            return Plan::Skip(Outcome::Skipped {
                reason: SkipReason::DuplicateContent,
                duplicate_of: Some(original),
            });
        }

        state.in_flight.insert(fp.to_string(), key.to_string());
        Plan::Write {
            document_id: key.to_string(),
            // leftovers of an earlier failed first ingest
            previous_chunks: state.ledger.chunk_span(key),
            reserved: true,
        }
    }

    /// Chunk and embed everything before anything is written.
    async fn embed_chunks(
        &self,
        key: &str,
        document_id: &str,
        text: &str,
        fp: &str,
    ) -> Result<Embedded, IngestError> {
        let chunked = self.chunker.chunk(text);
        let records: Vec<ChunkRecord> = chunked
            .chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| ChunkRecord::new(document_id, i, chunk, fp))
            .collect();

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self
            .bounded("embed", self.embedder.embed_batch(&texts))
            .await?;
        if vectors.len() != records.len() {
            return Err(IngestError::Backend(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                records.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.store.dims()) {
            return Err(IngestError::Backend(
                DimensionMismatch {
                    context: format!("embedding of {key}"),
                    expected: self.store.dims(),
                    found: bad.len(),
                }
                .to_string(),
            ));
        }

        Ok(Embedded {
            records,
            vectors,
            hard_splits: chunked.hard_splits,
        })
    }

    /// Upsert every chunk, then delete ids from the new count up to `span`.
    async fn write_chunks(
        &self,
        key: &str,
        document_id: &str,
        embedded: &Embedded,
        span: usize,
    ) -> Result<(), IngestError> {
        for (record, vector) in embedded.records.iter().zip(&embedded.vectors) {
            let metadata = record.metadata(key);
            self.bounded(
                "upsert",
                self.store.upsert(&record.chunk_id, vector, &metadata),
            )
            .await?;
        }
        for stale in embedded.records.len()..span {
            self.bounded("delete", self.store.delete(&chunk_id(document_id, stale)))
                .await?;
        }
        Ok(())
    }

    async fn load_with_retry(&self, path: &Path) -> Result<String, IngestError> {
        let mut last_detail = String::new();
        for attempt in 1..=self.load_attempts {
            let loader = Arc::clone(&self.loader);
            let owned = path.to_path_buf();
            let loaded = tokio::task::spawn_blocking(move || loader.load(&owned))
                .await
                .map_err(|e| IngestError::Backend(format!("loader task failed: {e}")))?;

            match loaded {
                Ok(text) => return Ok(text),
                Err(LoadError::NotFound) => return Err(IngestError::NotFound(path.to_path_buf())),
                Err(e) if !e.is_transient() => {
                    return Err(IngestError::Extract {
                        path: path.to_path_buf(),
                        detail: e.to_string(),
                    })
                }
                Err(e) => {
                    tracing::debug!(
                        "[pipeline] retry {}/{}: {} ({})",
                        attempt,
                        self.load_attempts,
                        path.display(),
                        e
                    );
                    last_detail = e.to_string();
                    if attempt < self.load_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(IngestError::TransientIo {
            path: path.to_path_buf(),
            attempts: self.load_attempts,
            detail: last_detail,
        })
    }

    /// Retract every vector of `path` and forget it.
    pub async fn delete(&self, path: &Path) -> Outcome {
        let path = absolute(path);
        let _guard = self.locks.acquire(&path).await;
        let key = path_key(&path);

        let Some((document_id, span)) = self.state.lock().await.ledger.footprint(&key) else {
            return Outcome::from_error(&IngestError::NotFound(path));
        };

        for ordinal in 0..span {
            let id = chunk_id(&document_id, ordinal);
            if let Err(e) = self.bounded("delete", self.store.delete(&id)).await {
                tracing::warn!("[pipeline] delete {}: {}", path.display(), e);
                return Outcome::from_error(&e);
            }
        }

        if let Err(e) = self.state.lock().await.ledger.remove(&key) {
            let err = IngestError::backend(e.context("ledger commit failed"));
            return Outcome::from_error(&err);
        }
        tracing::info!("[pipeline] deleted {} ({} chunks)", path.display(), span);
        Outcome::Deleted {
            id: document_id,
            chunks: span,
        }
    }

    /// Embed `text` and return up to `top_k` nearest chunks.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorMatch>, IngestError> {
        let vector = self.bounded("embed", self.embedder.embed(text)).await?;
        if vector.len() != self.store.dims() {
            return Err(IngestError::Backend(
                DimensionMismatch {
                    context: "query embedding".to_string(),
                    expected: self.store.dims(),
                    found: vector.len(),
                }
                .to_string(),
            ));
        }
        self.bounded("query", self.store.query(&vector, top_k)).await
    }

    /// Ingested paths, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.state.lock().await.ledger.list_paths()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T, IngestError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(IngestError::backend(e.context(operation))),
            Err(_) => Err(IngestError::Timeout {
                operation,
                secs: self.call_timeout.as_secs(),
            }),
        }
    }
}

/// Absolute, lexically normalized form of `path`: `.` dropped and `..`
/// applied. Symlinks are not resolved since the file may be gone.
pub fn absolute(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
