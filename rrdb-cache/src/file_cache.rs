//! Per-file ring buffer absorbing recent writes for all metrics that
//! share one archive file.
//!
//! The ring holds `cache_size` steps per metric slot in one flat f64
//! array. `start_ts` names the oldest step currently buffered and
//! `start_offset` its index, so the cell for `(slot, ts)` is
//!
//! ```text
//! slot * cache_size + (start_offset + (ts - start_ts) / resolution) mod cache_size
//! ```
//!
//! Timestamps outside the ring overwrite by modular arithmetic; the flush
//! scheduler drains the ring before live traffic can lap it.

use crate::schema::Schema;
use parking_lot::Mutex;
use rrdb_core::NULL_VALUE;
use tracing::warn;

/// Allocation state of the metric slots in one file.
#[derive(Debug)]
struct SlotBitmap {
    words: Vec<u64>,
    len: usize,
}

impl SlotBitmap {
    fn new(len: usize) -> SlotBitmap {
        SlotBitmap {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    fn set(&mut self, idx: usize) {
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    fn is_set(&self, idx: usize) -> bool {
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn is_full(&self) -> bool {
        (0..self.len).all(|i| self.is_set(i))
    }
}

#[derive(Debug)]
struct Ring {
    bitmap: SlotBitmap,
    available_pos_idx: usize,
    points: Vec<f64>,
    start_ts: Option<u32>,
    max_ts: u32,
    start_offset: usize,
}

/// Write buffer for one archive file.
#[derive(Debug)]
pub struct FileCache {
    metrics_max_num: usize,
    resolution: u32,
    retention: u32,
    /// Steps the ring is expected to hold before a flush.
    points_num: usize,
    /// Actual ring length per slot, overprovisioned by the cache ratio.
    cache_size: usize,
    inner: Mutex<Ring>,
}

impl FileCache {
    pub fn new(schema: &Schema) -> FileCache {
        let resolution = schema.archives[0].0;
        let retention = schema.cache_retention;
        // +1 so a zero retention still buffers one step
        let points_num = (retention / resolution) as usize + 1;
        let cache_size = (points_num as f64 * schema.cache_ratio) as usize;

        FileCache {
            metrics_max_num: schema.metrics_max_num,
            resolution,
            retention,
            points_num,
            cache_size,
            inner: Mutex::new(Ring {
                bitmap: SlotBitmap::new(schema.metrics_max_num),
                available_pos_idx: 0,
                points: vec![NULL_VALUE; schema.metrics_max_num * cache_size],
                start_ts: None,
                max_ts: 0,
                start_offset: 0,
            }),
        }
    }

    /// Record a slot as occupied; used while replaying the index file.
    pub fn mark_slot(&self, pos_idx: usize) {
        self.inner.lock().bitmap.set(pos_idx);
    }

    /// Claim the smallest free slot, or `None` when the file is full.
    pub fn alloc_slot(&self) -> Option<usize> {
        let mut ring = self.inner.lock();
        while ring.available_pos_idx < self.metrics_max_num {
            let idx = ring.available_pos_idx;
            ring.available_pos_idx += 1;
            if !ring.bitmap.is_set(idx) {
                ring.bitmap.set(idx);
                return Some(idx);
            }
        }
        None
    }

    pub fn is_metric_full(&self) -> bool {
        self.inner.lock().bitmap.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().start_ts.is_none()
    }

    /// Whether the buffered range is old enough to flush. The wait-time
    /// grace keeps the ring open until late-arriving points have likely
    /// landed.
    pub fn can_write(&self, now: u32, wait_time: u32) -> bool {
        match self.inner.lock().start_ts {
            Some(start_ts) => {
                i64::from(now) - i64::from(start_ts) - i64::from(self.retention)
                    > i64::from(wait_time)
            }
            None => false,
        }
    }

    pub fn put(&self, pos_idx: usize, datapoint: (u32, f64)) {
        let mut ring = self.inner.lock();
        if pos_idx >= self.metrics_max_num {
            warn!(pos_idx, max = self.metrics_max_num, "slot out of range");
            return;
        }

        let (ts, value) = datapoint;
        ring.max_ts = ring.max_ts.max(ts);

        let base_idx = pos_idx * self.cache_size;
        let idx = match ring.start_ts {
            None => {
                ring.start_ts = Some(ts - ts % self.resolution);
                base_idx
            }
            Some(start_ts) => {
                let offset = (i64::from(ts) - i64::from(start_ts))
                    .div_euclid(i64::from(self.resolution));
                let wrapped = (ring.start_offset as i64 + offset)
                    .rem_euclid(self.cache_size as i64) as usize;
                base_idx + wrapped
            }
        };
        ring.points[idx] = value;
    }

    /// Ring index of `ts`, clamped to the newest cell when `ts` lies past
    /// the ring's reach.
    fn offset_of(&self, ring: &Ring, start_ts: u32, ts: u32) -> usize {
        let interval =
            (i64::from(ts) - i64::from(start_ts)).div_euclid(i64::from(self.resolution));
        let interval = interval.min(self.cache_size as i64 - 1);
        (ring.start_offset as i64 + interval).rem_euclid(self.cache_size as i64) as usize
    }

    /// Drain (or peek at) the buffered rows, oldest first.
    ///
    /// Without `end_ts` the read covers `points_num` steps; with it, up to
    /// and including the step holding `end_ts`. With `clear` the consumed
    /// cells reset to NULL and the ring either advances past the read or,
    /// when nothing newer is buffered, empties entirely.
    pub fn get(&self, end_ts: Option<u32>, clear: bool) -> Vec<(u32, Vec<f64>)> {
        let mut ring = self.inner.lock();
        let Some(start_ts) = ring.start_ts else {
            return Vec::new();
        };

        let begin_offset = ring.start_offset;
        let end_offset = match end_ts {
            Some(ts) => self.offset_of(&ring, start_ts, ts),
            None => (begin_offset + self.points_num) % self.cache_size,
        };

        let length = if begin_offset < end_offset {
            end_offset - begin_offset
        } else {
            self.cache_size - begin_offset + end_offset
        };

        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(self.metrics_max_num);
        for slot in 0..self.metrics_max_num {
            let base_idx = slot * self.cache_size;
            let mut column = Vec::with_capacity(length);
            if begin_offset < end_offset {
                column.extend_from_slice(&ring.points[base_idx + begin_offset..base_idx + end_offset]);
            } else {
                column.extend_from_slice(
                    &ring.points[base_idx + begin_offset..base_idx + self.cache_size],
                );
                column.extend_from_slice(&ring.points[base_idx..base_idx + end_offset]);
            }
            columns.push(column);
        }

        if clear {
            for slot in 0..self.metrics_max_num {
                let base_idx = slot * self.cache_size;
                if begin_offset < end_offset {
                    clear_cells(&mut ring.points[base_idx + begin_offset..base_idx + end_offset]);
                } else {
                    clear_cells(
                        &mut ring.points[base_idx + begin_offset..base_idx + self.cache_size],
                    );
                    clear_cells(&mut ring.points[base_idx..base_idx + end_offset]);
                }
            }

            let next_ts = start_ts + length as u32 * self.resolution;
            if ring.max_ts < next_ts {
                // nothing newer is buffered; the ring is logically empty
                ring.start_ts = None;
                ring.start_offset = 0;
            } else {
                ring.start_ts = Some(next_ts);
                ring.start_offset = end_offset;
            }
        }

        (0..length)
            .map(|i| {
                let ts = start_ts + i as u32 * self.resolution;
                (ts, columns.iter().map(|column| column[i]).collect())
            })
            .collect()
    }
}

fn clear_cells(cells: &mut [f64]) {
    for cell in cells {
        *cell = NULL_VALUE;
    }
}
