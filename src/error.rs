//! Per-document failure taxonomy.
//!
//! The pipeline classifies every failure into an [`IngestError`] and turns
//! it into an outcome at its boundary; [`IngestError::reason`] is the
//! stable machine-readable code reported in that outcome.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The file stayed locked or unreadable after every retry.
    #[error("{path} could not be read after {attempts} attempts: {detail}")]
    TransientIo {
        path: PathBuf,
        attempts: u32,
        detail: String,
    },

    #[error("{0} does not exist")]
    NotFound(PathBuf),

    /// Fatal: the pipeline cannot run with this setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Embedding or vector-store failure for one document.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    /// The file exists but its content could not be turned into text.
    #[error("extraction failed for {path}: {detail}")]
    Extract { path: PathBuf, detail: String },
}

impl IngestError {
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::TransientIo { .. } => "permission_denied",
            IngestError::NotFound(_) => "not_found",
            IngestError::Configuration(_) => "configuration_error",
            IngestError::Backend(_) => "backend_error",
            IngestError::Timeout { .. } => "timeout",
            IngestError::Extract { .. } => "extract_failed",
        }
    }

    /// Wrap an embedding/store failure, keeping the whole context chain.
    pub fn backend(err: anyhow::Error) -> Self {
        IngestError::Backend(format!("{err:#}"))
    }
}
