//! In-memory write path for multi-metric archive files.
//!
//! This crate buffers incoming datapoints in per-file ring caches, keeps
//! the global metric -> (schema, file, slot) index durable through an
//! append-only index file, rate-limits the creation of new metrics and
//! runs the background writer that drains ready buffers into the
//! `rrdb-core` archive engine.

pub mod error;
pub mod file_cache;
pub mod metric_cache;
pub mod paths;
pub mod schema;
pub mod schema_cache;
pub mod stats;
pub mod token_bucket;
pub mod writer;

pub use error::{CacheError, Result};
pub use file_cache::FileCache;
pub use metric_cache::{CacheOptions, MetricCache};
pub use paths::Layout;
pub use schema::{Schema, Schemas};
pub use schema_cache::SchemaCache;
pub use stats::{Stats, StatsSnapshot};
pub use token_bucket::TokenBucket;
pub use writer::Writer;

/// Default grace period (seconds) past a ring's retention before it
/// becomes eligible for flushing.
pub const DEFAULT_WAIT_TIME: u32 = 10;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
