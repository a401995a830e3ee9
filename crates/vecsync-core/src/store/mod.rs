//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only surface the ingestion pipeline
//! uses to talk to a vector index, so backends (in-memory, local flat
//! file, SQLite collection, managed cloud index) are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Contract |
//! |--------|----------|
//! | [`upsert`](VectorStore::upsert) | Insert or overwrite the vector stored under `id` |
//! | [`delete`](VectorStore::delete) | Remove `id`; a missing id is not an error |
//! | [`query`](VectorStore::query) | Up to `top_k` matches, best first; empty store gives an empty list |
//! | [`len`](VectorStore::len) | Number of stored vectors |
//! | [`close`](VectorStore::close) | Release connections at shutdown |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::ChunkMetadata;

/// One ranked result of a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity; higher is better.
    pub score: f32,
    /// Metadata stored with the vector, when the backend returns it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

/// The embedding model and the vector index disagree on vector length.
///
/// This is a configuration error: retrying cannot fix it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dimension mismatch for {context}: expected {expected}, found {found}")]
pub struct DimensionMismatch {
    pub context: String,
    pub expected: usize,
    pub found: usize,
}

/// Abstract vector index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs (e.g. `"memory"`).
    fn backend(&self) -> &'static str;

    /// Declared vector length. Every stored and queried vector has it.
    fn dims(&self) -> usize;

    /// Insert or overwrite the vector stored under `id`.
    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()>;

    /// Remove `id` if present.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Up to `top_k` nearest vectors, best match first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;

    /// Number of stored vectors.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Release connections before the process exits. Default: nothing to do.
    async fn close(&self) {}
}

/// Fail with [`DimensionMismatch`] unless `vector.len() == expected`.
pub fn check_dims(context: &str, expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(DimensionMismatch {
            context: context.to_string(),
            expected,
            found: vector.len(),
        }
        .into());
    }
    Ok(())
}

/// Sort matches best-first and keep at most `top_k`. Ties break on id so
/// results are deterministic.
pub fn rank(mut matches: Vec<VectorMatch>, top_k: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(top_k);
    matches
}
