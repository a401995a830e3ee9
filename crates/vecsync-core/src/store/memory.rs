//! In-memory [`VectorStore`] for tests and ephemeral runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Query is brute-force
//! cosine similarity over all stored vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ChunkMetadata;

use super::{check_dims, rank, VectorMatch, VectorStore};

struct StoredVector {
    vector: Vec<f32>,
    metadata: ChunkMetadata,
}

/// In-process vector index. Contents are lost when dropped.
pub struct InMemoryStore {
    dims: usize,
    vectors: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Ids currently stored, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.vectors.read() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        ids.sort();
        ids
    }

    /// Metadata stored under `id`, if any.
    pub fn metadata(&self, id: &str) -> Option<ChunkMetadata> {
        self.vectors
            .read()
            .ok()
            .and_then(|guard| guard.get(id).map(|sv| sv.metadata.clone()))
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()> {
        check_dims("memory upsert", self.dims, vector)?;
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        vectors.insert(
            id.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.vectors.write().map_err(poisoned)?.remove(id);
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        check_dims("memory query", self.dims, vector)?;
        let vectors = self.vectors.read().map_err(poisoned)?;
        let candidates = vectors
            .iter()
            .map(|(id, sv)| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &sv.vector),
                metadata: Some(sv.metadata.clone()),
            })
            .collect();
        Ok(rank(candidates, top_k))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.vectors.read().map_err(poisoned)?.len())
    }
}
