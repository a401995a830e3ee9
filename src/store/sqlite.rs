//! SQLite-backed [`VectorStore`]: a persistent local collection.
//!
//! One database file per index. Vectors are little-endian f32 BLOBs;
//! query is brute-force cosine similarity over the collection. The
//! collection's dimension is recorded in `collection_meta` on first open
//! and checked on every later open.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use vecsync_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use vecsync_core::models::ChunkMetadata;
use vecsync_core::store::{check_dims, rank, DimensionMismatch, VectorMatch, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            id TEXT PRIMARY KEY,
            file TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_file ON vectors(file)")
        .execute(pool)
        .await?;

    Ok(())
}

impl SqliteStore {
    /// Open (creating if needed) the collection at `db_path`.
    ///
    /// Fails with [`DimensionMismatch`] if the collection was created for
    /// vectors of a different length.
    pub async fn open(db_path: &Path, dims: usize) -> Result<Self> {
        let pool = connect(db_path)
            .await
            .with_context(|| format!("Failed to open SQLite store: {}", db_path.display()))?;
        migrate(&pool).await?;

        let recorded: Option<String> =
            sqlx::query_scalar("SELECT value FROM collection_meta WHERE key = 'dims'")
                .fetch_optional(&pool)
                .await?;

        match recorded {
            Some(value) => {
                let found: usize = value
                    .parse()
                    .with_context(|| format!("Corrupt dims in {}: {}", db_path.display(), value))?;
                if found != dims {
                    pool.close().await;
                    return Err(DimensionMismatch {
                        context: format!("sqlite collection {}", db_path.display()),
                        expected: dims,
                        found,
                    }
                    .into());
                }
            }
            None => {
                sqlx::query("INSERT INTO collection_meta (key, value) VALUES ('dims', ?)")
                    .bind(dims.to_string())
                    .execute(&pool)
                    .await?;
            }
        }

        tracing::debug!("[store] sqlite collection {} ({} dims)", db_path.display(), dims);
        Ok(Self { pool, dims })
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()> {
        check_dims("sqlite upsert", self.dims, vector)?;
        sqlx::query(
            r#"
            INSERT INTO vectors (id, file, chunk_index, chunk_text, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file = excluded.file,
                chunk_index = excluded.chunk_index,
                chunk_text = excluded.chunk_text,
                hash = excluded.hash,
                embedding = excluded.embedding
            "#,
        )
        .bind(id)
        .bind(&metadata.file)
        .bind(metadata.chunk_index as i64)
        .bind(&metadata.chunk_text)
        .bind(&metadata.hash)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vectors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        check_dims("sqlite query", self.dims, vector)?;
        let rows = sqlx::query(
            "SELECT id, file, chunk_index, chunk_text, hash, embedding FROM vectors",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let chunk_index: i64 = row.get("chunk_index");
            candidates.push(VectorMatch {
                id: row.get("id"),
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                metadata: Some(ChunkMetadata {
                    file: row.get("file"),
                    chunk_index: chunk_index as usize,
                    chunk_text: row.get("chunk_text"),
                    hash: row.get("hash"),
                }),
            });
        }
        Ok(rank(candidates, top_k))
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
