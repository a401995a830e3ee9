use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use vecsync::chunk::Chunker;
use vecsync::config::{PipelineConfig, WatchConfig};
use vecsync::embedding::HashEmbedder;
use vecsync::ledger::Ledger;
use vecsync::pipeline::Pipeline;
use vecsync::store::{InMemoryStore, VectorStore};
use vecsync::watcher::{FolderWatcher, WatchState};

const WAIT: Duration = Duration::from_secs(10);

fn pipeline() -> Arc<Pipeline> {
    let settings = PipelineConfig {
        load_attempts: 2,
        retry_delay_ms: 10,
        call_timeout_secs: 5,
    };
    match Pipeline::new(
        Arc::new(HashEmbedder::new("feature-hash", 32)),
        Arc::new(InMemoryStore::new(32)),
        Ledger::ephemeral(),
        Chunker::new(40, 5),
        &settings,
    ) {
        Ok(p) => Arc::new(p),
        Err(e) => panic!("pipeline setup failed: {}", e),
    }
}

fn watch_config() -> WatchConfig {
    WatchConfig {
        workers: 2,
        open_attempts: 3,
        open_retry_delay_ms: 20,
        ..WatchConfig::default()
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Poll `list()` until `check` holds or the deadline passes.
async fn wait_for_list(pipeline: &Pipeline, check: impl Fn(&[String]) -> bool) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let paths = pipeline.list().await;
        if check(&paths) || tokio::time::Instant::now() >= deadline {
            return paths;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scan_then_follow_changes() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let existing = root.join("existing.txt");
    fs::write(&existing, "Already here before the watch. It should be indexed.").unwrap();
    fs::write(root.join("desktop.ini"), "[.ShellClassInfo]").unwrap();
    fs::write(root.join("~$draft.docx"), "lock").unwrap();

    let pipeline = pipeline();
    let watcher = FolderWatcher::new(Arc::clone(&pipeline), &root, &watch_config()).unwrap();
    let mut state = watcher.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(watcher.run(cancel.clone()));

    tokio::time::timeout(WAIT, state.wait_for(|s| *s == WatchState::Watching))
        .await
        .expect("watcher never reached Watching")
        .unwrap();
    assert_eq!(pipeline.list().await, vec![key(&existing)]);

    let created = root.join("created.txt");
    fs::write(&created, "Dropped in while watching. Picked up by events.").unwrap();
    let listed = wait_for_list(&pipeline, |paths| paths.contains(&key(&created))).await;
    assert!(listed.contains(&key(&created)), "create not ingested: {:?}", listed);

    fs::remove_file(&existing).unwrap();
    let listed = wait_for_list(&pipeline, |paths| !paths.contains(&key(&existing))).await;
    assert_eq!(listed, vec![key(&created)]);

    cancel.cancel();
    let summary = tokio::time::timeout(WAIT, handle)
        .await
        .expect("watcher did not stop")
        .unwrap()
        .unwrap();
    assert!(summary.ingested >= 2, "{:?}", summary);
    assert!(summary.deleted >= 1, "{:?}", summary);
    assert_eq!(summary.errors, 0, "{:?}", summary);
    assert_eq!(*state.borrow(), WatchState::Idle);

    // created.txt chunks stay in the store; existing.txt chunks are gone
    assert!(!pipeline.store().is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_root_is_created() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("inbox");

    let pipeline = pipeline();
    let watcher = FolderWatcher::new(Arc::clone(&pipeline), &root, &watch_config()).unwrap();
    let mut state = watcher.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(watcher.run(cancel.clone()));

    tokio::time::timeout(WAIT, state.wait_for(|s| *s == WatchState::Watching))
        .await
        .expect("watcher never reached Watching")
        .unwrap();
    assert!(root.is_dir());

    cancel.cancel();
    let summary = tokio::time::timeout(WAIT, handle)
        .await
        .expect("watcher did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(summary.ingested, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignore_globs_apply_to_scan() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    fs::write(root.join("keep.md"), "Kept. Indexed.").unwrap();
    fs::write(root.join("skip.log"), "Ignored. Never indexed.").unwrap();

    let config = WatchConfig {
        ignore_globs: vec!["*.log".to_string()],
        ..watch_config()
    };
    let pipeline = pipeline();
    let watcher = FolderWatcher::new(Arc::clone(&pipeline), &root, &config).unwrap();
    let mut state = watcher.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(watcher.run(cancel.clone()));

    tokio::time::timeout(WAIT, state.wait_for(|s| *s == WatchState::Watching))
        .await
        .expect("watcher never reached Watching")
        .unwrap();
    assert_eq!(pipeline.list().await, vec![key(&root.join("keep.md"))]);

    cancel.cancel();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
}
