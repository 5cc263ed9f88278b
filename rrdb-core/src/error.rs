use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when working with archive files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error when reading or writing an archive file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive list violates a creation invariant
    #[error("invalid archive config: {0}")]
    InvalidConfig(String),

    /// Unparsable retention string or inverted fetch range
    #[error("invalid time: {0}")]
    InvalidTime(String),

    /// Refusing to create over an existing archive file
    #[error("file already exists: {}", .0.display())]
    FileExists(PathBuf),

    /// Header bytes do not describe a well-formed archive file
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    /// A slot's tag does not hold the metric a logical delete named
    #[error("unexpected metric in slot {slot}: expected '{expected}', found '{found}'")]
    UnexpectedMetric {
        slot: usize,
        expected: String,
        found: String,
    },
}

/// A specialized Result type for archive file operations
pub type Result<T> = std::result::Result<T, StorageError>;
