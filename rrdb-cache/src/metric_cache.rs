//! The process-wide metric index and write entry point.
//!
//! `MetricCache` owns the metric -> (schema, file, slot) table, routes
//! incoming datapoints into the per-file ring buffers and allocates slots
//! for metrics seen for the first time. Allocation creates the archive
//! file on demand, tags the slot, mirrors the metric into the link
//! directory and appends one line to the index file.
//!
//! Locking: one coarse lock guards the index state (the metric table, the
//! schema caches, the token bucket and the index file handle); each
//! `FileCache` has its own finer lock. The coarse lock is always taken
//! first, never the other way around.

use crate::error::{CacheError, Result};
use crate::file_cache::FileCache;
use crate::paths::{self, Layout};
use crate::schema::Schemas;
use crate::schema_cache::SchemaCache;
use crate::stats::Stats;
use crate::token_bucket::TokenBucket;
use crate::unix_now;
use parking_lot::Mutex;
use rrdb_core::NULL_VALUE;
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Malformed index lines tolerated during replay (a crash can truncate
/// the final line).
const MAX_INDEX_ERRORS: usize = 1;

/// Tuning knobs that are not part of any schema.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Grace period past a ring's retention before it may flush.
    pub wait_time: u32,
    /// Cap on new-metric creations per minute; `None` means unlimited.
    pub max_creates_per_minute: Option<f64>,
}

impl Default for CacheOptions {
    fn default() -> CacheOptions {
        CacheOptions {
            wait_time: crate::DEFAULT_WAIT_TIME,
            max_creates_per_minute: None,
        }
    }
}

#[derive(Debug, Clone)]
struct MetricIdx {
    schema_name: String,
    file_idx: usize,
    pos_idx: usize,
}

struct CacheState {
    metric_idxs: FxHashMap<String, MetricIdx>,
    schema_caches: FxHashMap<String, SchemaCache>,
    token_bucket: TokenBucket,
    /// Long-lived append handle; `Some` once `init` has run.
    index_fh: Option<File>,
}

/// The global metric cache. One per process, shared between the receive
/// path, the query path and the writer thread.
pub struct MetricCache {
    layout: Layout,
    schemas: Schemas,
    wait_time: u32,
    stats: Arc<Stats>,
    state: Mutex<CacheState>,
}

impl MetricCache {
    pub fn new(layout: Layout, schemas: Schemas, options: CacheOptions) -> MetricCache {
        let token_bucket = match options.max_creates_per_minute {
            Some(capacity) => TokenBucket::new(capacity, capacity / 60.0),
            None => TokenBucket::unlimited(),
        };

        MetricCache {
            layout,
            schemas,
            wait_time: options.wait_time,
            stats: Arc::new(Stats::default()),
            state: Mutex::new(CacheState {
                metric_idxs: FxHashMap::default(),
                schema_caches: FxHashMap::default(),
                token_bucket,
                index_fh: None,
            }),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Bootstrap: rebuild the index and link mirror when missing, replay
    /// the index file and open it for appending. Idempotent.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.index_fh.is_some() {
            return Ok(());
        }

        let instance_data_dir = self.layout.instance_data_dir();
        let instance_link_dir = self.layout.instance_link_dir();
        let index_file = self.layout.index_file();

        if instance_data_dir.exists() {
            if !index_file.exists() {
                paths::rebuild_index(&instance_data_dir, &index_file)?;
            }
            if !instance_link_dir.exists() {
                paths::rebuild_link(&instance_data_dir, &instance_link_dir)?;
            }
        }

        if index_file.exists() {
            self.replay_index(&mut state, &index_file)?;
        }

        std::fs::create_dir_all(&self.layout.data_dir)?;
        state.index_fh = Some(OpenOptions::new().create(true).append(true).open(&index_file)?);
        info!(
            instance = %self.layout.instance,
            metrics = state.metric_idxs.len(),
            "metric cache initialized"
        );
        Ok(())
    }

    fn replay_index(&self, state: &mut CacheState, index_file: &Path) -> Result<()> {
        let reader = BufReader::new(File::open(index_file)?);
        let mut err_line_cnt = 0;

        for line in reader.lines() {
            let line = line?;
            match self.replay_line(state, &line) {
                Ok(()) => {}
                Err(err) => {
                    err_line_cnt += 1;
                    if err_line_cnt > MAX_INDEX_ERRORS {
                        return Err(CacheError::CorruptIndex(format!(
                            "{} malformed lines, last: {err}",
                            err_line_cnt
                        )));
                    }
                    warn!(line = %line, %err, "skipping malformed index line");
                }
            }
        }
        Ok(())
    }

    fn replay_line(&self, state: &mut CacheState, line: &str) -> Result<()> {
        let mut parts = line.split(' ');
        let (Some(metric), Some(schema_name), Some(file_idx), Some(pos_idx), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(CacheError::CorruptIndex(format!("bad record '{line}'")));
        };
        let file_idx: usize = file_idx
            .parse()
            .map_err(|_| CacheError::CorruptIndex(format!("bad file index '{file_idx}'")))?;
        let pos_idx: usize = pos_idx
            .parse()
            .map_err(|_| CacheError::CorruptIndex(format!("bad slot index '{pos_idx}'")))?;
        let schema = self
            .schemas
            .by_name(schema_name)
            .ok_or_else(|| CacheError::CorruptIndex(format!("unknown schema '{schema_name}'")))?
            .clone();
        if pos_idx >= schema.metrics_max_num {
            return Err(CacheError::CorruptIndex(format!(
                "slot {pos_idx} out of range for schema '{schema_name}'"
            )));
        }

        state
            .schema_caches
            .entry(schema_name.to_owned())
            .or_default()
            .add(&schema, file_idx, pos_idx);
        state.metric_idxs.insert(
            metric.to_owned(),
            MetricIdx {
                schema_name: schema_name.to_owned(),
                file_idx,
                pos_idx,
            },
        );
        Ok(())
    }

    /// Buffer one datapoint. Never fails observably: rate-limited creates
    /// drop the point silently, anything else is logged and counted.
    pub fn put(&self, metric: &str, datapoint: (u32, f64)) {
        Stats::incr(&self.stats.metrics_received, 1);
        match self.metric_slot(metric) {
            Ok((file_cache, pos_idx)) => file_cache.put(pos_idx, datapoint),
            Err(CacheError::TokenBucketFull) => {
                Stats::incr(&self.stats.dropped_creates, 1);
            }
            Err(err) => {
                Stats::incr(&self.stats.errors, 1);
                warn!(metric, %err, "dropping datapoint");
            }
        }
    }

    /// Cache-side read of one metric, NULL cells filtered out.
    pub fn get(&self, metric: &str) -> Vec<(u32, f64)> {
        Stats::incr(&self.stats.cache_queries, 1);
        let (file_cache, pos_idx) = {
            let state = self.state.lock();
            let Some(idx) = state.metric_idxs.get(metric) else {
                return Vec::new();
            };
            let Some(file_cache) = state
                .schema_caches
                .get(&idx.schema_name)
                .and_then(|sc| sc.get(idx.file_idx))
            else {
                return Vec::new();
            };
            (Arc::clone(file_cache), idx.pos_idx)
        };

        file_cache
            .get(Some(unix_now()), false)
            .into_iter()
            .filter_map(|(ts, row)| {
                let value = row[pos_idx];
                (value != NULL_VALUE).then_some((ts, value))
            })
            .collect()
    }

    /// The `(schema, file_idx)` pairs whose rings are ready to flush.
    pub fn writable_file_caches(&self) -> Vec<(String, usize)> {
        let now = unix_now();
        let state = self.state.lock();
        state
            .schema_caches
            .iter()
            .flat_map(|(schema_name, schema_cache)| {
                schema_cache.iter().filter_map(move |(file_idx, cache)| {
                    cache
                        .can_write(now, self.wait_time)
                        .then(|| (schema_name.clone(), file_idx))
                })
            })
            .collect()
    }

    /// Every known `(schema, file_idx)` pair; used for the shutdown flush.
    pub fn all_file_caches(&self) -> Vec<(String, usize)> {
        let state = self.state.lock();
        state
            .schema_caches
            .iter()
            .flat_map(|(schema_name, schema_cache)| {
                schema_cache
                    .iter()
                    .map(move |(file_idx, _)| (schema_name.clone(), file_idx))
            })
            .collect()
    }

    /// Drain (or peek at) one file's ring; see [`FileCache::get`].
    pub fn pop(
        &self,
        schema_name: &str,
        file_idx: usize,
        end_ts: Option<u32>,
        clear: bool,
    ) -> Vec<(u32, Vec<f64>)> {
        let file_cache = {
            let state = self.state.lock();
            match state
                .schema_caches
                .get(schema_name)
                .and_then(|sc| sc.get(file_idx))
            {
                Some(file_cache) => Arc::clone(file_cache),
                None => return Vec::new(),
            }
        };
        file_cache.get(end_ts, clear)
    }

    /// Resolve a metric to its file cache and slot, allocating on first
    /// sight. The whole critical section runs under the coarse lock,
    /// including file creation and the index append.
    fn metric_slot(&self, metric: &str) -> Result<(Arc<FileCache>, usize)> {
        let mut state = self.state.lock();

        if let Some(idx) = state.metric_idxs.get(metric) {
            let file_cache = state
                .schema_caches
                .get(&idx.schema_name)
                .and_then(|sc| sc.get(idx.file_idx))
                .ok_or_else(|| {
                    CacheError::CorruptIndex(format!(
                        "metric '{metric}' maps to missing file {}/{}",
                        idx.schema_name, idx.file_idx
                    ))
                })?;
            return Ok((Arc::clone(file_cache), idx.pos_idx));
        }

        if !state.token_bucket.consume(1.0) {
            return Err(CacheError::TokenBucketFull);
        }

        let schema = Arc::clone(self.schemas.by_metric(metric));
        let (file_idx, file_cache) = state
            .schema_caches
            .entry(schema.name.clone())
            .or_default()
            .alloc_file(&schema);
        let pos_idx = file_cache.alloc_slot().ok_or_else(|| {
            CacheError::Config(format!("no free slot in {}/{}", schema.name, file_idx))
        })?;

        let file_path = self.layout.file_path(&schema.name, file_idx);
        if !file_path.exists() {
            let tags = vec![String::new(); schema.metrics_max_num];
            rrdb_core::create(
                &file_path,
                &tags,
                &schema.archives,
                schema.x_files_factor,
                schema.aggregation_method,
            )?;
        }
        rrdb_core::add_tag(metric, &file_path, pos_idx)?;

        if let Err(err) = paths::create_link(metric, &file_path, &self.layout) {
            warn!(metric, %err, "could not create metric link");
        }

        if let Some(fh) = state.index_fh.as_mut() {
            writeln!(fh, "{metric} {} {file_idx} {pos_idx}", schema.name)?;
        }

        state.metric_idxs.insert(
            metric.to_owned(),
            MetricIdx {
                schema_name: schema.name.clone(),
                file_idx,
                pos_idx,
            },
        );
        Stats::incr(&self.stats.creates, 1);
        Ok((file_cache, pos_idx))
    }
}
