//! Centralized error types for emlShell.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the emlShell library.
#[derive(Error, Debug)]
pub enum EmlError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("EML file not found: {0}")]
    FileNotFound(PathBuf),

    /// The stream, or the file handle shared by all its sibling windows, is closed.
    #[error("Stream closed")]
    Closed,

    /// A window was requested with a negative start offset.
    #[error("Invalid window range: start {start}, end {end:?}")]
    InvalidRange { start: i64, end: Option<i64> },

    /// Header or body decoding failed (only surfaced by strict helpers).
    #[error("Decoding error: {0}")]
    Decode(String),

    /// An export operation failed.
    #[error("Export error: {0}")]
    Export(String),
}

/// Convenience alias for `Result<T, EmlError>`.
pub type Result<T> = std::result::Result<T, EmlError>;

impl EmlError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map an `open` failure, distinguishing a missing file from other I/O errors.
    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path)
        } else {
            Self::io(path, source)
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `EmlError::io`).
impl From<std::io::Error> for EmlError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

/// Let windows be used through `std::io::Read`.
impl From<EmlError> for std::io::Error {
    fn from(err: EmlError) -> Self {
        match err {
            EmlError::Io { source, .. } => source,
            EmlError::FileNotFound(path) => std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("EML file not found: {}", path.display()),
            ),
            other => std::io::Error::other(other.to_string()),
        }
    }
}
