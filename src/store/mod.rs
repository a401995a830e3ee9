//! Vector store backends and selection.
//!
//! | `store.backend` | Type | Location |
//! |-----------------|------|----------|
//! | `memory` | [`InMemoryStore`] | process memory |
//! | `flat` | [`FlatStore`] | `<dir>/<index>.flat.json` |
//! | `sqlite` | [`SqliteStore`] | `<dir>/<index>.sqlite` |
//! | `pinecone` | [`PineconeStore`] | managed index named `<index>` |
//!
//! `<index>` is [`index_name`] of the embedding model and dimension, so
//! switching models always targets a fresh index.

pub mod flat;
pub mod pinecone;
pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;

pub use flat::FlatStore;
pub use pinecone::PineconeStore;
pub use sqlite::SqliteStore;
pub use vecsync_core::store::memory::InMemoryStore;
pub use vecsync_core::store::{DimensionMismatch, VectorMatch, VectorStore};

use crate::config::StoreConfig;

/// Index identity for a model and dimension: the model name lowercased,
/// anything outside `[a-z0-9-]` replaced by `-`, then `-{dims}`.
pub fn index_name(model: &str, dims: usize) -> String {
    let sanitized: String = model
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{sanitized}-{dims}")
}

/// Open the configured backend for `index`, checking its dimension.
pub async fn open_store(
    config: &StoreConfig,
    index: &str,
    dims: usize,
) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new(dims)),
        "flat" => {
            let file = config.dir.join(format!("{index}.flat.json"));
            Arc::new(FlatStore::open(&file, dims).await?)
        }
        "sqlite" => {
            let file = config.dir.join(format!("{index}.sqlite"));
            Arc::new(SqliteStore::open(&file, dims).await?)
        }
        "pinecone" => Arc::new(PineconeStore::open(&config.pinecone, index, dims).await?),
        other => anyhow::bail!("Unknown store backend: {}", other),
    };
    tracing::info!("[store] {} backend, index {} ({} dims)", store.backend(), index, dims);
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_sanitizes() {
        assert_eq!(index_name("all-MiniLM-L6-v2", 384), "all-minilm-l6-v2-384");
        assert_eq!(
            index_name("sentence-transformers/all-mpnet-base-v2", 768),
            "sentence-transformers-all-mpnet-base-v2-768"
        );
        assert_eq!(index_name("bge-small-en-v1.5", 384), "bge-small-en-v1-5-384");
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = StoreConfig {
            backend: "memory".to_string(),
            ..StoreConfig::default()
        };
        let store = open_store(&config, "idx-3", 3).await.unwrap();
        assert_eq!(store.backend(), "memory");
        assert_eq!(store.dims(), 3);
    }
}
