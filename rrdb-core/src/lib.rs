//! Core functionality for multi-metric round-robin archive files.
//!
//! An archive file co-locates a group of related metric series: every
//! point row carries one value per metric slot, and each retention tier
//! stores those rows in a fixed-size circular buffer. This crate provides:
//! - The on-disk format: [`header`] module
//! - Create/update/fetch and tier propagation: [`archive`] module
//! - Consolidation methods, retention parsing and instance sharding:
//!   [`agg`], [`retention`] and [`hash`] modules
//!
//! For the in-memory write path and the flush scheduler, see the
//! `rrdb-cache` crate.

#[macro_use]
extern crate static_assertions;

pub mod agg;
pub mod archive;
pub mod error;
pub mod hash;
pub mod header;
pub mod retention;

// Re-export commonly used types for convenience
pub use agg::Agg;
pub use archive::{
    Point, Series, TimeInfo, add_tag, clear_tag, create, fetch, update, validate_archive_list,
};
pub use error::{Result, StorageError};
pub use header::{ArchiveInfo, Header, pack_header, read_header};
pub use retention::{parse_retention_def, parse_time_str};

/// On-disk sentinel for "no data". Chosen far outside any realistic metric
/// range; the value is part of the format ABI and must never change.
pub const NULL_VALUE: f64 = -4_294_967_296.0;

/// Reserved filler bytes added per empty tag slot at create time.
pub const DEFAULT_TAG_LENGTH: usize = 32;

/// Block size for zero-filling data regions and copying files.
pub const CHUNK_SIZE: usize = 16384;
