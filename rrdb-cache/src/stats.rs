//! Instrumentation counters for the cache and the writer.
//!
//! Counters accumulate between snapshots; a snapshot drains them, so the
//! periodic self-metric recorder sees per-interval figures.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    pub metrics_received: AtomicU64,
    pub committed_points: AtomicU64,
    pub update_operations: AtomicU64,
    pub update_micros: AtomicU64,
    pub creates: AtomicU64,
    pub dropped_creates: AtomicU64,
    pub errors: AtomicU64,
    pub cache_queries: AtomicU64,
}

impl Stats {
    pub fn incr(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Drain all counters into a snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            metrics_received: self.metrics_received.swap(0, Ordering::Relaxed),
            committed_points: self.committed_points.swap(0, Ordering::Relaxed),
            update_operations: self.update_operations.swap(0, Ordering::Relaxed),
            update_micros: self.update_micros.swap(0, Ordering::Relaxed),
            creates: self.creates.swap(0, Ordering::Relaxed),
            dropped_creates: self.dropped_creates.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
            cache_queries: self.cache_queries.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub metrics_received: u64,
    pub committed_points: u64,
    pub update_operations: u64,
    pub update_micros: u64,
    pub creates: u64,
    pub dropped_creates: u64,
    pub errors: u64,
    pub cache_queries: u64,
}

impl StatsSnapshot {
    /// Named values for the self-metric recorder, including the derived
    /// per-update figures.
    pub fn records(&self) -> Vec<(&'static str, f64)> {
        let mut records = vec![
            ("metrics_received", self.metrics_received as f64),
            ("committed_points", self.committed_points as f64),
            ("update_operations", self.update_operations as f64),
            ("creates", self.creates as f64),
            ("dropped_creates", self.dropped_creates as f64),
            ("errors", self.errors as f64),
            ("cache_queries", self.cache_queries as f64),
        ];
        if self.update_operations > 0 {
            let ops = self.update_operations as f64;
            records.push((
                "avg_update_time",
                self.update_micros as f64 / ops / 1_000_000.0,
            ));
            records.push(("points_per_update", self.committed_points as f64 / ops));
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_drains_counters() {
        let stats = Stats::default();
        Stats::incr(&stats.metrics_received, 3);
        Stats::incr(&stats.errors, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.metrics_received, 3);
        assert_eq!(snapshot.errors, 1);

        let empty = stats.snapshot();
        assert_eq!(empty.metrics_received, 0);
        assert_eq!(empty.errors, 0);
    }

    #[test]
    fn derived_records_need_updates() {
        let stats = Stats::default();
        let names: Vec<&str> = stats.snapshot().records().iter().map(|r| r.0).collect();
        assert!(!names.contains(&"avg_update_time"));

        Stats::incr(&stats.update_operations, 2);
        Stats::incr(&stats.update_micros, 4_000_000);
        Stats::incr(&stats.committed_points, 10);
        let records = stats.snapshot().records();
        let avg = records.iter().find(|r| r.0 == "avg_update_time").unwrap();
        assert_eq!(avg.1, 2.0);
        let ppu = records.iter().find(|r| r.0 == "points_per_update").unwrap();
        assert_eq!(ppu.1, 5.0);
    }
}
