//! File loading: bytes on disk to extracted text.

use std::io::ErrorKind;
use std::path::Path;

use thiserror::Error;

use crate::extract::{extract_text, DocumentFormat, ExtractError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found")]
    NotFound,
    /// Locked by another process or not readable by us; may clear on retry.
    #[error("permission denied: {0}")]
    PermissionDenied(std::io::Error),
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl LoadError {
    /// Worth retrying after a short delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, LoadError::PermissionDenied(_) | LoadError::Io(_))
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => LoadError::NotFound,
            ErrorKind::PermissionDenied => LoadError::PermissionDenied(err),
            _ => LoadError::Io(err),
        }
    }
}

/// Turns a file into plain text. Called from blocking threads.
pub trait FileLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<String, LoadError>;
}

/// Default loader: PDF and OOXML through [`crate::extract`], everything else
/// (txt, md, csv, ...) read as lossy UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl FileLoader for FsLoader {
    fn load(&self, path: &Path) -> Result<String, LoadError> {
        let bytes = std::fs::read(path)?;
        match DocumentFormat::from_path(path) {
            Some(format) => Ok(extract_text(&bytes, format)?),
            None => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_text_and_csv() {
        let tmp = TempDir::new().unwrap();
        let txt = tmp.path().join("a.txt");
        let csv = tmp.path().join("b.csv");
        std::fs::write(&txt, "hello world").unwrap();
        std::fs::write(&csv, "id,name\n1,alice\n").unwrap();
        assert_eq!(FsLoader.load(&txt).unwrap(), "hello world");
        assert_eq!(FsLoader.load(&csv).unwrap(), "id,name\n1,alice\n");
    }

    #[test]
    fn invalid_utf8_is_lossy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bin.txt");
        std::fs::write(&path, [b'o', b'k', 0xff, b'!']).unwrap();
        assert_eq!(FsLoader.load(&path).unwrap(), "ok\u{fffd}!");
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = FsLoader.load(&tmp.path().join("gone.txt")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound));
        assert!(!err.is_transient());
    }

    #[test]
    fn broken_pdf_is_extract_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.pdf");
        std::fs::write(&path, "definitely not a pdf").unwrap();
        let err = FsLoader.load(&path).unwrap_err();
        assert!(matches!(err, LoadError::Extract(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn permission_denied_is_transient() {
        let err = LoadError::from(std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(err.is_transient());
    }
}
