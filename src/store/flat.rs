//! Flat-file [`VectorStore`]: the whole index in one JSON document.
//!
//! Suited to small collections that should survive restarts without a
//! database. Every mutation rewrites the file (temp file + rename) while
//! holding the write lock, so readers of the file never see a partial
//! index. Removal is native: the entry is dropped from the map and the
//! file rewritten.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use vecsync_core::embedding::cosine_similarity;
use vecsync_core::models::ChunkMetadata;
use vecsync_core::store::{check_dims, rank, DimensionMismatch, VectorMatch, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlatEntry {
    vector: Vec<f32>,
    metadata: ChunkMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct FlatIndex {
    dims: usize,
    #[serde(default)]
    entries: BTreeMap<String, FlatEntry>,
}

pub struct FlatStore {
    file: PathBuf,
    dims: usize,
    index: RwLock<FlatIndex>,
}

impl FlatStore {
    /// Load the index at `file`, or create an empty one.
    pub async fn open(file: &Path, dims: usize) -> Result<Self> {
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let index = match tokio::fs::read(file).await {
            Ok(raw) => {
                let index: FlatIndex = serde_json::from_slice(&raw)
                    .with_context(|| format!("Corrupt flat index: {}", file.display()))?;
                if index.dims != dims {
                    return Err(DimensionMismatch {
                        context: format!("flat index {}", file.display()),
                        expected: dims,
                        found: index.dims,
                    }
                    .into());
                }
                index
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FlatIndex {
                dims,
                entries: BTreeMap::new(),
            },
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", file.display()));
            }
        };

        tracing::debug!(
            "[store] flat index {} ({} vectors, {} dims)",
            file.display(),
            index.entries.len(),
            dims
        );
        Ok(Self {
            file: file.to_path_buf(),
            dims,
            index: RwLock::new(index),
        })
    }

    async fn persist(&self, index: &FlatIndex) -> Result<()> {
        let tmp = self.file.with_extension("json.tmp");
        let body = serde_json::to_vec(index)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.file)
            .await
            .with_context(|| format!("Failed to replace {}", self.file.display()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FlatStore {
    fn backend(&self) -> &'static str {
        "flat"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()> {
        check_dims("flat upsert", self.dims, vector)?;
        let mut index = self.index.write().await;
        let previous = index.entries.insert(
            id.to_string(),
            FlatEntry {
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        if let Err(e) = self.persist(&index).await {
            // keep memory and disk in agreement
            match previous {
                Some(entry) => index.entries.insert(id.to_string(), entry),
                None => index.entries.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut index = self.index.write().await;
        let Some(previous) = index.entries.remove(id) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&index).await {
            index.entries.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        check_dims("flat query", self.dims, vector)?;
        let index = self.index.read().await;
        let candidates = index
            .entries
            .iter()
            .map(|(id, entry)| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &entry.vector),
                metadata: Some(entry.metadata.clone()),
            })
            .collect();
        Ok(rank(candidates, top_k))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.index.read().await.entries.len())
    }
}
