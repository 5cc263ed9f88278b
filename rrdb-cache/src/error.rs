use thiserror::Error;

/// Errors that can occur on the in-memory write path.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error on the index file or while scanning data directories
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the archive engine
    #[error(transparent)]
    Storage(#[from] rrdb_core::StorageError),

    /// Malformed schema configuration
    #[error("invalid schema config: {0}")]
    Config(String),

    /// Slot allocation rejected by the create rate limit
    #[error("create rate limit exhausted")]
    TokenBucketFull,

    /// The index file has more malformed lines than recovery tolerates
    #[error("index file is corrupt: {0}")]
    CorruptIndex(String),
}

/// A specialized Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
