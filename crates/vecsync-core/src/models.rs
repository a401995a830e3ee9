//! Core data models shared by the pipeline, the ledger, and the stores.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum number of characters of chunk text kept in vector metadata.
pub const EXCERPT_CHARS: usize = 500;

/// SHA-256 hex digest of a document's extracted text.
///
/// Used both to detect unchanged re-ingests of the same path and to
/// detect byte-identical content under different paths.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic vector-store id for the `ordinal`-th chunk of a document.
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    format!("{}_chunk{}", document_id, ordinal)
}

/// Truncate `text` to at most [`EXCERPT_CHARS`] characters on a char boundary.
pub fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

/// Metadata stored next to every chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Absolute path of the source file.
    pub file: String,
    /// Position of the chunk within its document, starting at 0.
    pub chunk_index: usize,
    /// Leading excerpt of the chunk text.
    pub chunk_text: String,
    /// Fingerprint of the parent document at ingest time.
    pub hash: String,
}

/// A chunk ready to be embedded and written to a vector store.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub fingerprint: String,
}

impl ChunkRecord {
    pub fn new(document_id: &str, ordinal: usize, text: String, fingerprint: &str) -> Self {
        Self {
            chunk_id: chunk_id(document_id, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text,
            fingerprint: fingerprint.to_string(),
        }
    }

    /// Metadata for this chunk as written alongside its vector.
    pub fn metadata(&self, source_path: &str) -> ChunkMetadata {
        ChunkMetadata {
            file: source_path.to_string(),
            chunk_index: self.ordinal,
            chunk_text: excerpt(&self.text),
            hash: self.fingerprint.clone(),
        }
    }
}
