//! Error types for archive operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing release archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Entry would be written outside the extraction directory
    #[error("archive entry escapes extraction root: {0}")]
    UnsafePath(String),

    /// File extension is not a supported archive format
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Nothing to pack
    #[error("source directory has no content to pack: {0}")]
    EmptySource(PathBuf),
}

impl ArchiveError {
    /// Whether the error means the archive bytes themselves are unusable.
    pub fn is_corruption(&self) -> bool {
        matches!(self, ArchiveError::Zip(_) | ArchiveError::UnsafePath(_))
    }
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
