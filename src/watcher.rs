//! Folder watch loop.
//!
//! Keeps the index in sync with one directory. The loop subscribes to
//! filesystem notifications first, then ingests every file already present
//! (catch-up scan), then turns create/modify/remove events into pipeline
//! ingests and deletes until cancelled.
//!
//! ```text
//! Idle ──run()──▶ Scanning ──scan done──▶ Watching ──cancel──▶ Idle
//! ```
//!
//! Notify callbacks run on notify's own thread and are bridged onto a
//! tokio channel. Work is spread over `watch.workers` tasks; the pipeline
//! already serializes work on the same path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::pipeline::{Outcome, Pipeline, SkipReason};

/// Files never worth indexing: OS metadata, editor swap and partial downloads.
pub const HOUSEKEEPING_GLOBS: &[&str] = &[
    "desktop.ini",
    ".DS_Store",
    "Thumbs.db",
    "*.swp",
    "*.swx",
    "*~",
    ".#*",
    "~$*",
    "*.tmp",
    "*.part",
    "*.crdownload",
];

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to scan {path}: {reason}")]
    ScanFailed { path: PathBuf, reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Scanning,
    Watching,
}

/// Outcome counts over one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub ingested: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub errors: usize,
}

impl WatchSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Ingested { .. } => self.ingested += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Deleted { .. } => self.deleted += 1,
            Outcome::Error { .. } => self.errors += 1,
        }
    }
}

/// Include/ignore decision for a path below the watched root.
#[derive(Debug, Clone)]
pub struct PathFilter {
    ignore: GlobSet,
    include: Option<GlobSet>,
}

fn build_globset<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, WatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = Glob::new(pattern).map_err(|e| WatchError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| WatchError::InvalidPattern {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(", "),
        reason: e.to_string(),
    })
}

impl PathFilter {
    pub fn new(config: &WatchConfig) -> Result<Self, WatchError> {
        let mut ignore: Vec<String> = HOUSEKEEPING_GLOBS.iter().map(|g| g.to_string()).collect();
        ignore.extend(config.ignore_globs.iter().cloned());
        let include = if config.include_globs.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_globs)?)
        };
        Ok(Self {
            ignore: build_globset(&ignore)?,
            include,
        })
    }

    /// `relative` is the path below the watched root.
    pub fn accepts(&self, relative: &Path) -> bool {
        let Some(name) = relative.file_name() else {
            return false;
        };
        let name = name.to_string_lossy();
        let lower = name.to_lowercase();
        if lower == "desktop.ini" || lower == ".ds_store" {
            return false;
        }
        if self.ignore.is_match(&*name) || self.ignore.is_match(relative) {
            return false;
        }
        match &self.include {
            Some(include) => include.is_match(&*name) || include.is_match(relative),
            None => true,
        }
    }
}

enum Action {
    Upsert(PathBuf),
    Delete(PathBuf),
}

impl Action {
    fn path(&self) -> &Path {
        match self {
            Action::Upsert(p) | Action::Delete(p) => p,
        }
    }
}

/// Whether a path can be opened, retried while it is locked.
#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    Ready,
    Missing,
    Locked,
}

async fn wait_until_openable(path: &Path, attempts: u32, delay: Duration) -> Readiness {
    for attempt in 1..=attempts {
        match tokio::fs::File::open(path).await {
            Ok(_) => return Readiness::Ready,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Readiness::Missing,
            Err(e) => {
                tracing::debug!(
                    "[watch] still locked ({}/{}): {} ({})",
                    attempt,
                    attempts,
                    path.display(),
                    e
                );
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Readiness::Locked
}

/// Run one action against the pipeline. Files that stay locked are dropped
/// with a `permission_denied` outcome.
async fn process(pipeline: &Pipeline, action: Action, attempts: u32, delay: Duration) -> Outcome {
    match action {
        Action::Delete(path) => pipeline.delete(&path).await,
        Action::Upsert(path) => match wait_until_openable(&path, attempts, delay).await {
            Readiness::Ready => pipeline.ingest(&path).await,
            Readiness::Missing => pipeline.delete(&path).await,
            Readiness::Locked => {
                tracing::warn!("[watch] skipping, still locked: {}", path.display());
                Outcome::Error {
                    reason: "permission_denied".to_string(),
                    detail: format!("{} stayed locked", path.display()),
                }
            }
        },
    }
}

pub struct FolderWatcher {
    pipeline: Arc<Pipeline>,
    root: PathBuf,
    recursive: bool,
    filter: PathFilter,
    workers: Arc<Semaphore>,
    open_attempts: u32,
    open_retry_delay: Duration,
    state: watch::Sender<WatchState>,
}

impl FolderWatcher {
    pub fn new(
        pipeline: Arc<Pipeline>,
        root: impl Into<PathBuf>,
        config: &WatchConfig,
    ) -> Result<Self, WatchError> {
        let (state, _) = watch::channel(WatchState::Idle);
        Ok(Self {
            pipeline,
            root: root.into(),
            recursive: config.recursive,
            filter: PathFilter::new(config)?,
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            open_attempts: config.open_attempts.max(1),
            open_retry_delay: Duration::from_millis(config.open_retry_delay_ms),
            state,
        })
    }

    /// Follow state transitions (e.g. to wait for the catch-up scan).
    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    /// Scan, then watch until `cancel` fires. In-flight work is awaited
    /// before returning.
    pub async fn run(self, cancel: CancellationToken) -> Result<WatchSummary, WatchError> {
        std::fs::create_dir_all(&self.root).map_err(|e| WatchError::PathWatchFailed {
            path: self.root.clone(),
            reason: e.to_string(),
        })?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| WatchError::PathWatchFailed {
                path: self.root.clone(),
                reason: e.to_string(),
            })?;

        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;
        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&root, mode)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        let mut summary = WatchSummary::default();
        let mut tasks: JoinSet<Outcome> = JoinSet::new();

        self.state.send_replace(WatchState::Scanning);
        let existing = self.scan(&root)?;
        tracing::info!(
            "[watch] scanning {} existing files in {}",
            existing.len(),
            root.display()
        );
        for path in existing {
            if cancel.is_cancelled() {
                break;
            }
            self.dispatch(&mut tasks, Action::Upsert(path));
        }
        while let Some(joined) = tasks.join_next().await {
            self.collect(joined, &mut summary);
        }

        self.state.send_replace(WatchState::Watching);
        tracing::info!("[watch] watching {}", root.display());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.collect(joined, &mut summary);
                }
                event = rx.recv() => match event {
                    Some(Ok(event)) => {
                        for action in self.classify(&root, &event) {
                            self.dispatch(&mut tasks, action);
                        }
                    }
                    Some(Err(e)) => tracing::warn!("[watch] event error: {}", e),
                    None => {
                        tracing::warn!("[watch] notification channel closed");
                        break;
                    }
                },
            }
        }

        drop(watcher);
        tracing::info!("[watch] stopping, waiting for {} in-flight tasks", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            self.collect(joined, &mut summary);
        }
        self.state.send_replace(WatchState::Idle);
        tracing::info!(
            "[watch] stopped: {} ingested, {} skipped, {} deleted, {} errors",
            summary.ingested,
            summary.skipped,
            summary.deleted,
            summary.errors
        );
        Ok(summary)
    }

    /// Regular files directly in `root` (or below it when recursive), sorted.
    fn scan(&self, root: &Path) -> Result<Vec<PathBuf>, WatchError> {
        let mut walker = WalkDir::new(root).min_depth(1);
        if !self.recursive {
            walker = walker.max_depth(1);
        }
        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| WatchError::ScanFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if self.filter.accepts(relative) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn classify(&self, root: &Path, event: &Event) -> Vec<Action> {
        let mut actions = Vec::new();
        for path in &event.paths {
            let relative = path.strip_prefix(root).unwrap_or(path);
            if !self.filter.accepts(relative) || path.is_dir() {
                continue;
            }
            if matches!(event.kind, EventKind::Modify(ModifyKind::Metadata(_))) {
                continue;
            }
            let action = match event.kind {
                EventKind::Remove(_) => Action::Delete(path.clone()),
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any => {
                    if path.exists() {
                        Action::Upsert(path.clone())
                    } else {
                        // renamed away or removed before we looked
                        Action::Delete(path.clone())
                    }
                }
                EventKind::Access(_) | EventKind::Other => continue,
            };
            tracing::debug!(
                "[watch] {:?} {}",
                event.kind,
                action.path().display()
            );
            actions.push(action);
        }
        actions
    }

    fn dispatch(&self, tasks: &mut JoinSet<Outcome>, action: Action) {
        let pipeline = Arc::clone(&self.pipeline);
        let workers = Arc::clone(&self.workers);
        let attempts = self.open_attempts;
        let delay = self.open_retry_delay;

        tasks.spawn(async move {
            let _permit = workers.acquire_owned().await;
            process(&pipeline, action, attempts, delay).await
        });
    }

    fn collect(&self, joined: Result<Outcome, tokio::task::JoinError>, summary: &mut WatchSummary) {
        match joined {
            Ok(outcome) => {
                // deletes of files that were never indexed are routine
                if !outcome.is_not_found() {
                    summary.record(&outcome);
                }
                if let Outcome::Skipped {
                    reason: SkipReason::DuplicateContent,
                    duplicate_of: Some(original),
                } = &outcome
                {
                    tracing::info!("[watch] duplicate of {}", original);
                }
            }
            Err(e) => {
                tracing::error!("[watch] worker task failed: {}", e);
                summary.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorStore;

    fn filter(ignore: &[&str], include: &[&str]) -> PathFilter {
        let config = WatchConfig {
            ignore_globs: ignore.iter().map(|s| s.to_string()).collect(),
            include_globs: include.iter().map(|s| s.to_string()).collect(),
            ..WatchConfig::default()
        };
        PathFilter::new(&config).unwrap()
    }

    #[test]
    fn test_housekeeping_files_filtered() {
        let f = filter(&[], &[]);
        assert!(!f.accepts(Path::new("desktop.ini")));
        assert!(!f.accepts(Path::new("Desktop.INI")));
        assert!(!f.accepts(Path::new(".DS_Store")));
        assert!(!f.accepts(Path::new(".notes.md.swp")));
        assert!(!f.accepts(Path::new("~$report.docx")));
        assert!(!f.accepts(Path::new("download.crdownload")));
        assert!(f.accepts(Path::new("notes.md")));
        assert!(f.accepts(Path::new("report.docx")));
    }

    #[test]
    fn test_include_and_ignore_globs() {
        let f = filter(&["drafts/**"], &["*.md", "*.txt"]);
        assert!(f.accepts(Path::new("a.md")));
        assert!(f.accepts(Path::new("sub/b.txt")));
        assert!(!f.accepts(Path::new("c.pdf")));
        assert!(!f.accepts(Path::new("drafts/d.md")));
    }

    #[test]
    fn test_invalid_glob_is_error() {
        let config = WatchConfig {
            ignore_globs: vec!["[".to_string()],
            ..WatchConfig::default()
        };
        assert!(matches!(
            PathFilter::new(&config),
            Err(WatchError::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_until_openable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(
            wait_until_openable(&file, 3, Duration::from_millis(1)).await,
            Readiness::Ready
        );
        assert_eq!(
            wait_until_openable(&tmp.path().join("gone"), 3, Duration::from_millis(1)).await,
            Readiness::Missing
        );
    }

    fn memory_pipeline() -> Pipeline {
        let settings = crate::config::PipelineConfig {
            load_attempts: 1,
            retry_delay_ms: 1,
            call_timeout_secs: 5,
        };
        match Pipeline::new(
            Arc::new(crate::embedding::HashEmbedder::new("feature-hash", 16)),
            Arc::new(crate::store::InMemoryStore::new(16)),
            crate::ledger::Ledger::ephemeral(),
            vecsync_core::chunk::Chunker::new(20, 2),
            &settings,
        ) {
            Ok(p) => p,
            Err(e) => panic!("pipeline setup failed: {}", e),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_locked_file_is_dropped() {
        let tmp = tempfile::TempDir::new().unwrap();
        // a symlink to itself can never be opened, whoever we run as
        let looped = tmp.path().join("looped.txt");
        std::os::unix::fs::symlink(&looped, &looped).unwrap();

        assert_eq!(
            wait_until_openable(&looped, 3, Duration::from_millis(1)).await,
            Readiness::Locked
        );

        let pipeline = memory_pipeline();
        let outcome = process(
            &pipeline,
            Action::Upsert(looped.clone()),
            3,
            Duration::from_millis(1),
        )
        .await;
        match outcome {
            Outcome::Error { reason, detail } => {
                assert_eq!(reason, "permission_denied");
                assert!(detail.contains("stayed locked"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert!(pipeline.list().await.is_empty());
        assert!(pipeline.store().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_vanished_file_routes_to_delete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "Here now. Gone soon.").unwrap();

        let pipeline = memory_pipeline();
        let ready = process(&pipeline, Action::Upsert(file.clone()), 1, Duration::ZERO).await;
        assert!(matches!(ready, Outcome::Ingested { .. }));

        std::fs::remove_file(&file).unwrap();
        let gone = process(&pipeline, Action::Upsert(file.clone()), 1, Duration::ZERO).await;
        assert!(matches!(gone, Outcome::Deleted { chunks: 1, .. }));
        assert!(pipeline.store().is_empty().await.unwrap());
    }

    #[test]
    fn test_summary_counts() {
        let mut s = WatchSummary::default();
        s.record(&Outcome::Deleted {
            id: "/a".into(),
            chunks: 1,
        });
        s.record(&Outcome::Error {
            reason: "timeout".into(),
            detail: String::new(),
        });
        assert_eq!(s.deleted, 1);
        assert_eq!(s.errors, 1);
    }
}
