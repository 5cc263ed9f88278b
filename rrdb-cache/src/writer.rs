//! The flush scheduler: a background thread that drains ready file
//! buffers into the archive engine.

use crate::metric_cache::MetricCache;
use crate::stats::Stats;
use crate::unix_now;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error};

const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Background writer. Any message (or disconnect) on `shutdown` stops the
/// loop; residual ring contents are then flushed without clearing, so a
/// crash between flush and exit only re-writes the same points on the
/// next boot.
pub struct Writer {
    cache: Arc<MetricCache>,
    shutdown: Receiver<()>,
}

impl Writer {
    pub fn spawn(
        cache: Arc<MetricCache>,
        shutdown: Receiver<()>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("rrdb-writer".to_owned())
            .spawn(move || Writer { cache, shutdown }.run())
    }

    fn run(self) {
        loop {
            let wrote = self.write_cached_points();

            // sleep only when there was nothing to write
            let wait = if wrote { Duration::ZERO } else { IDLE_SLEEP };
            match self.shutdown.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        self.flush_on_stop();
    }

    /// One pass over every ring that is ready; per-file failures are
    /// logged and counted, never propagated.
    fn write_cached_points(&self) -> bool {
        let stats = self.cache.stats();
        let mut wrote = false;

        for (schema_name, file_idx) in self.cache.writable_file_caches() {
            let datapoints = self.cache.pop(&schema_name, file_idx, None, true);
            let path = self.cache.layout().file_path(&schema_name, file_idx);

            let started = Instant::now();
            match rrdb_core::update(&path, &datapoints, None, None) {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    Stats::incr(&stats.committed_points, datapoints.len() as u64);
                    Stats::incr(&stats.update_operations, 1);
                    Stats::incr(&stats.update_micros, elapsed.as_micros() as u64);
                    debug!(
                        schema = schema_name,
                        file_idx,
                        points = datapoints.len(),
                        ?elapsed,
                        "flushed datapoints"
                    );
                }
                Err(err) => {
                    Stats::incr(&stats.errors, 1);
                    error!(path = %path.display(), %err, "error writing datapoints");
                }
            }
            wrote = true;
        }
        wrote
    }

    /// Final flush at shutdown. Rings are read without clearing, so an
    /// interrupted flush is simply repeated after restart.
    fn flush_on_stop(&self) {
        let now = unix_now();
        for (schema_name, file_idx) in self.cache.all_file_caches() {
            let datapoints = self.cache.pop(&schema_name, file_idx, Some(now), false);
            if datapoints.is_empty() {
                continue;
            }
            let path = self.cache.layout().file_path(&schema_name, file_idx);
            if let Err(err) = rrdb_core::update(&path, &datapoints, None, None) {
                error!(path = %path.display(), %err, "error writing datapoints at stop");
            }
        }
    }
}
