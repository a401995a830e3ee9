use tempfile::TempDir;

use vecsync::models::ChunkMetadata;
use vecsync::store::{open_store, DimensionMismatch, FlatStore, SqliteStore, VectorStore};

fn meta(file: &str, idx: usize) -> ChunkMetadata {
    ChunkMetadata {
        file: file.to_string(),
        chunk_index: idx,
        chunk_text: format!("chunk {} of {}", idx, file),
        hash: "abc123".to_string(),
    }
}

/// Shared contract every persistent backend must satisfy.
async fn exercise(store: &dyn VectorStore) {
    assert!(store.query(&[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());

    store.upsert("/a.txt_chunk0", &[1.0, 0.0, 0.0], &meta("/a.txt", 0)).await.unwrap();
    store.upsert("/a.txt_chunk1", &[0.0, 1.0, 0.0], &meta("/a.txt", 1)).await.unwrap();
    store.upsert("/b.txt_chunk0", &[0.7, 0.7, 0.0], &meta("/b.txt", 0)).await.unwrap();
    assert_eq!(store.len().await.unwrap(), 3);

    let hits = store.query(&[1.0, 0.0, 0.0], 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "/a.txt_chunk0");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert_eq!(hits[1].id, "/b.txt_chunk0");
    let top = hits[0].metadata.as_ref().unwrap();
    assert_eq!(top.file, "/a.txt");
    assert_eq!(top.chunk_index, 0);

    // overwrite in place
    store.upsert("/a.txt_chunk0", &[0.0, 0.0, 1.0], &meta("/a.txt", 0)).await.unwrap();
    assert_eq!(store.len().await.unwrap(), 3);
    let hits = store.query(&[0.0, 0.0, 1.0], 1).await.unwrap();
    assert_eq!(hits[0].id, "/a.txt_chunk0");

    store.delete("/a.txt_chunk1").await.unwrap();
    store.delete("/never-stored").await.unwrap();
    assert_eq!(store.len().await.unwrap(), 2);

    let err = store.upsert("/bad", &[1.0], &meta("/bad", 0)).await.unwrap_err();
    assert!(err.downcast_ref::<DimensionMismatch>().is_some());
}

#[tokio::test]
async fn test_flat_store_contract() {
    let tmp = TempDir::new().unwrap();
    let store = FlatStore::open(&tmp.path().join("idx.flat.json"), 3).await.unwrap();
    exercise(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&tmp.path().join("idx.sqlite"), 3).await.unwrap();
    exercise(&store).await;
    store.close().await;
}

#[tokio::test]
async fn test_flat_store_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("idx.flat.json");
    {
        let store = FlatStore::open(&file, 3).await.unwrap();
        store.upsert("x_chunk0", &[0.0, 1.0, 0.0], &meta("x", 0)).await.unwrap();
        store.upsert("y_chunk0", &[1.0, 0.0, 0.0], &meta("y", 0)).await.unwrap();
        store.delete("y_chunk0").await.unwrap();
    }

    let store = FlatStore::open(&file, 3).await.unwrap();
    assert_eq!(store.len().await.unwrap(), 1);
    let hits = store.query(&[0.0, 1.0, 0.0], 5).await.unwrap();
    assert_eq!(hits[0].id, "x_chunk0");
    assert_eq!(hits[0].metadata.as_ref().unwrap().file, "x");
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("idx.sqlite");
    {
        let store = SqliteStore::open(&file, 3).await.unwrap();
        store.upsert("x_chunk0", &[0.0, 1.0, 0.0], &meta("x", 0)).await.unwrap();
        store.close().await;
    }

    let store = SqliteStore::open(&file, 3).await.unwrap();
    assert_eq!(store.len().await.unwrap(), 1);
    let hits = store.query(&[0.0, 1.0, 0.0], 5).await.unwrap();
    assert_eq!(hits[0].id, "x_chunk0");
    store.close().await;
}

#[tokio::test]
async fn test_reopen_with_other_dims_is_rejected() {
    let tmp = TempDir::new().unwrap();

    let flat = tmp.path().join("idx.flat.json");
    FlatStore::open(&flat, 3)
        .await
        .unwrap()
        .upsert("a", &[1.0, 0.0, 0.0], &meta("a", 0))
        .await
        .unwrap();
    let err = FlatStore::open(&flat, 4).await.err().unwrap();
    let mismatch = err.downcast_ref::<DimensionMismatch>().unwrap();
    assert_eq!((mismatch.expected, mismatch.found), (4, 3));

    let db = tmp.path().join("idx.sqlite");
    SqliteStore::open(&db, 3).await.unwrap().close().await;
    let err = SqliteStore::open(&db, 4).await.err().unwrap();
    let mismatch = err.downcast_ref::<DimensionMismatch>().unwrap();
    assert_eq!((mismatch.expected, mismatch.found), (4, 3));
}

#[tokio::test]
async fn test_open_store_places_files_by_index_name() {
    let tmp = TempDir::new().unwrap();
    let mut config = vecsync::config::StoreConfig {
        backend: "flat".to_string(),
        dir: tmp.path().to_path_buf(),
        ..Default::default()
    };

    let store = open_store(&config, "feature-hash-3", 3).await.unwrap();
    store.upsert("a", &[1.0, 0.0, 0.0], &meta("a", 0)).await.unwrap();
    assert!(tmp.path().join("feature-hash-3.flat.json").exists());

    config.backend = "sqlite".to_string();
    let store = open_store(&config, "feature-hash-3", 3).await.unwrap();
    assert_eq!(store.backend(), "sqlite");
    assert!(tmp.path().join("feature-hash-3.sqlite").exists());

    config.backend = "chroma".to_string();
    assert!(open_store(&config, "feature-hash-3", 3).await.is_err());
}
