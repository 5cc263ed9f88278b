//! Round-robin archive engine.
//!
//! Each archive file holds every retention tier of a group of co-located
//! metrics. Writes land in the finest tier and are consolidated
//! ("propagated") into each coarser tier in turn; reads pick the finest
//! tier that still covers the requested window.
//!
//! Within a tier the data region is a circular buffer anchored by its base
//! point: the timestamp stored at the region's first slot. A timestamp `t`
//! lives at `offset + ((t - base_ts) / step * point_size) mod size`, so
//! in-place updates never move existing points.

use crate::agg::Agg;
use crate::error::{Result, StorageError};
use crate::header::{self, ArchiveInfo, Header, TIMESTAMP_SIZE, VALUE_SIZE};
use crate::{CHUNK_SIZE, DEFAULT_TAG_LENGTH, NULL_VALUE};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// A timestamped row of values, one per metric slot in the file.
pub type Point = (u32, Vec<f64>);

/// The aligned window a fetch actually covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    pub from: u32,
    pub until: u32,
    pub step: u32,
}

/// Result of a fetch: one row per step in `[from, until)`, each row one
/// `Option<f64>` per metric slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub header: Header,
    pub time_info: TimeInfo,
    pub values: Vec<Vec<Option<f64>>>,
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn file_mtime(path: &Path) -> Result<u32> {
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0))
}

/// Round `x` up to the nearest multiple of `base`.
pub(crate) fn roundup(x: u32, base: u32) -> u32 {
    let rem = x % base;
    if rem == 0 { x } else { x - rem + base }
}

/// Check the archive-list creation invariants, sorting the list by
/// precision as a side effect.
///
/// An archive list must be non-empty, contain no duplicate precisions,
/// have every finer precision evenly divide every coarser one, cover a
/// strictly larger time span at each coarser tier, and keep enough points
/// per tier to consolidate one point of the next tier at the given
/// x-files-factor.
pub fn validate_archive_list(archive_list: &mut [(u32, u32)], xff: f32) -> Result<()> {
    if archive_list.is_empty() {
        return Err(StorageError::InvalidConfig(
            "must specify at least one archive config".into(),
        ));
    }

    if let Some(&(sec, cnt)) = archive_list.iter().find(|&&(sec, cnt)| sec == 0 || cnt == 0) {
        return Err(StorageError::InvalidConfig(format!(
            "archive config must be positive: ({sec}, {cnt})"
        )));
    }

    archive_list.sort_by_key(|a| a.0);

    for pair in archive_list.windows(2) {
        let (sec, cnt) = pair[0];
        let (next_sec, next_cnt) = pair[1];

        if sec >= next_sec {
            return Err(StorageError::InvalidConfig(format!(
                "two configs with the same precision: ({sec}, {cnt}) and ({next_sec}, {next_cnt})"
            )));
        }
        if next_sec % sec != 0 {
            return Err(StorageError::InvalidConfig(format!(
                "higher precision must evenly divide lower precision: {sec} and {next_sec}"
            )));
        }

        let retention = sec * cnt;
        let next_retention = next_sec * next_cnt;
        if next_retention <= retention {
            return Err(StorageError::InvalidConfig(format!(
                "lower precision archive must cover a larger time span than \
                 higher precision archive: {retention} and {next_retention}"
            )));
        }

        let points_per_consolidation = next_sec / sec;
        if (f64::from(cnt) / f64::from(xff)) < f64::from(points_per_consolidation) {
            return Err(StorageError::InvalidConfig(format!(
                "each archive must have enough points to consolidate to the \
                 next archive: ({sec}, {cnt}) and ({next_sec}, {next_cnt}) xff={xff}"
            )));
        }
    }
    Ok(())
}

/// Create a new archive file.
///
/// The tag list supplies one entry per metric slot (empty = free); each
/// empty slot contributes `DEFAULT_TAG_LENGTH` bytes of reclaimable filler
/// so future tags can be set without rewriting the data regions.
pub fn create(
    path: &Path,
    tag_list: &[String],
    archive_list: &[(u32, u32)],
    x_files_factor: f32,
    agg: Agg,
) -> Result<()> {
    let mut archives = archive_list.to_vec();
    validate_archive_list(&mut archives, x_files_factor)?;

    if path.exists() {
        return Err(StorageError::FileExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let empty_tag_cnt = tag_list.iter().filter(|t| t.is_empty()).count();
    let mut inter_tag_list = tag_list.to_vec();
    inter_tag_list.push("N".repeat(DEFAULT_TAG_LENGTH * empty_tag_cnt));

    let (packed, end_offset) =
        header::pack_header(&inter_tag_list, &archives, x_files_factor, agg)?;

    let mut fh = OpenOptions::new().write(true).create_new(true).open(path)?;
    fh.write_all(&packed)?;

    let zeroes = [0u8; CHUNK_SIZE];
    let mut remaining = end_offset - packed.len() as u64;
    while remaining > 0 {
        let n = remaining.min(CHUNK_SIZE as u64) as usize;
        fh.write_all(&zeroes[..n])?;
        remaining -= n as u64;
    }

    debug!(path = %path.display(), archives = archives.len(), "created archive file");
    Ok(())
}

/// Set the tag at `pos_idx`.
///
/// When the new tag fits in the slot plus the reserved filler only the
/// header is rewritten. Otherwise the whole file is rebuilt through a
/// temp-and-rename with the data regions copied byte for byte.
pub fn add_tag(tag: &str, path: &Path, pos_idx: usize) -> Result<()> {
    let mut fh = OpenOptions::new().read(true).write(true).open(path)?;
    let mut header = header::read_header(&mut fh)?;
    let archive_list = header.archive_list();

    let slot = header
        .tag_list
        .get(pos_idx)
        .ok_or_else(|| {
            StorageError::InvalidConfig(format!(
                "slot {pos_idx} out of range ({} slots)",
                header.tag_list.len()
            ))
        })?
        .len();

    if tag.len() <= slot + header.reserved_size {
        let diff = slot + header.reserved_size - tag.len();
        header.tag_list[pos_idx] = tag.to_owned();
        let mut inter_tag_list = header.tag_list;
        inter_tag_list.push("N".repeat(diff));
        let (packed, _) =
            header::pack_header(&inter_tag_list, &archive_list, header.x_files_factor, header.agg)?;
        fh.seek(SeekFrom::Start(0))?;
        fh.write_all(&packed)?;
    } else {
        debug!(path = %path.display(), tag, "tag exceeds reserved space, rewriting file");
        header.tag_list[pos_idx] = tag.to_owned();
        let first_data_offset = u64::from(header.archives[0].offset);
        let mut inter_tag_list = header.tag_list;
        inter_tag_list.push(String::new());
        let (packed, _) =
            header::pack_header(&inter_tag_list, &archive_list, header.x_files_factor, header.agg)?;

        let mut tmp_os = path.as_os_str().to_owned();
        tmp_os.push(".tmp");
        let tmp_path = PathBuf::from(tmp_os);

        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&packed)?;
        fh.seek(SeekFrom::Start(first_data_offset))?;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = fh.read(&mut buf)?;
            if n == 0 {
                break;
            }
            tmp.write_all(&buf[..n])?;
        }
        std::fs::rename(&tmp_path, path)?;
    }
    Ok(())
}

/// Logically delete a metric: blank its tag and return the bytes to the
/// filler. The data region is untouched; the slot becomes reusable.
///
/// The slot must still hold `metric`; a non-empty mismatch is
/// [`StorageError::UnexpectedMetric`]. Clearing an already-empty slot is a
/// no-op.
pub fn clear_tag(path: &Path, metric: &str, pos_idx: usize) -> Result<()> {
    let mut fh = OpenOptions::new().read(true).write(true).open(path)?;
    let mut header = header::read_header(&mut fh)?;

    let current = header.tag_list.get(pos_idx).ok_or_else(|| {
        StorageError::InvalidConfig(format!(
            "slot {pos_idx} out of range ({} slots)",
            header.tag_list.len()
        ))
    })?;

    if current.is_empty() {
        return Ok(());
    }
    if current != metric {
        return Err(StorageError::UnexpectedMetric {
            slot: pos_idx,
            expected: metric.to_owned(),
            found: current.clone(),
        });
    }

    let released = current.len();
    let archive_list = header.archive_list();
    header.tag_list[pos_idx] = String::new();
    let mut inter_tag_list = header.tag_list;
    inter_tag_list.push("N".repeat(header.reserved_size + released));
    let (packed, _) =
        header::pack_header(&inter_tag_list, &archive_list, header.x_files_factor, header.agg)?;
    fh.seek(SeekFrom::Start(0))?;
    fh.write_all(&packed)?;
    Ok(())
}

/// Write a batch of points.
///
/// Points may arrive in any order and may span several tiers: each point
/// goes to the finest tier whose retention still covers its age, and every
/// touched tier propagates into the next coarser one. `mtime` defaults to
/// the file's modification time and bounds the propagation window on the
/// old side, so late batches re-consolidate the windows they affect.
pub fn update(path: &Path, points: &[Point], now: Option<u32>, mtime: Option<u32>) -> Result<()> {
    if points.is_empty() {
        return Ok(());
    }

    let mtime = match mtime {
        Some(t) => t,
        None => file_mtime(path)?,
    };

    // newest first
    let mut points = points.to_vec();
    points.sort_by(|a, b| b.0.cmp(&a.0));

    let mut fh = OpenOptions::new().read(true).write(true).open(path)?;
    let header = header::read_header(&mut fh)?;
    let now = now.unwrap_or_else(unix_now);

    let mut archive_idx = 0;
    let mut batch: Vec<Point> = Vec::new();

    'points: for point in points {
        let age = i64::from(now) - i64::from(point.0);

        while age > i64::from(header.archives[archive_idx].retention) {
            // this tier cannot hold the point; flush what it got and move on
            if !batch.is_empty() {
                let range = batch_range(mtime, &batch);
                update_archive(&mut fh, &header, archive_idx, &batch, range)?;
                batch.clear();
            }
            archive_idx += 1;
            if archive_idx == header.archives.len() {
                // drop remaining points that are older than every tier
                break 'points;
            }
        }

        batch.push(point);
    }

    if archive_idx < header.archives.len() && !batch.is_empty() {
        let range = batch_range(mtime, &batch);
        update_archive(&mut fh, &header, archive_idx, &batch, range)?;
    }
    Ok(())
}

/// Propagation window of a newest-first batch.
fn batch_range(mtime: u32, batch: &[Point]) -> (u32, u32) {
    let newest = batch[0].0;
    let oldest = batch[batch.len() - 1].0;
    (mtime.min(oldest), newest)
}

fn update_archive(
    fh: &mut File,
    header: &Header,
    archive_idx: usize,
    points: &[Point],
    timestamp_range: (u32, u32),
) -> Result<()> {
    let archive = header.archives[archive_idx];
    let step = archive.sec_per_point;
    let point_size = header.point_size;

    let mut aligned: Vec<(u32, &[f64])> = points
        .iter()
        .map(|(ts, values)| (ts - ts % step, values.as_slice()))
        .collect();
    aligned.sort_by_key(|p| p.0);
    if aligned.is_empty() {
        return Ok(());
    }

    // Pack each contiguous sequence of timestamps into a single run so it
    // can land in one write. Duplicate timestamps keep the last occurrence.
    let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut current = Vec::new();
    let mut current_start = 0;
    let mut previous_ts: Option<u32> = None;
    for i in 0..aligned.len() {
        if i + 1 < aligned.len() && aligned[i].0 == aligned[i + 1].0 {
            continue;
        }
        let (ts, values) = aligned[i];
        match previous_ts {
            Some(prev) if ts == prev + step => pack_point(&mut current, ts, values),
            _ => {
                if !current.is_empty() {
                    runs.push((current_start, std::mem::take(&mut current)));
                }
                current_start = ts;
                pack_point(&mut current, ts, values);
            }
        }
        previous_ts = Some(ts);
    }
    if !current.is_empty() {
        runs.push((current_start, current));
    }

    let mut base_ts = read_base_ts(fh, &archive)?;
    let first_ts = aligned[0].0;
    if base_ts == 0 {
        // first write into this tier anchors it
        base_ts = first_ts;
    }

    let archive_end = u64::from(archive.end());
    for (start_ts, packed) in &runs {
        let offset = timestamp_to_offset(*start_ts, base_ts, point_size, &archive);
        let bytes_beyond = (offset + packed.len() as u64) as i64 - archive_end as i64;
        fh.seek(SeekFrom::Start(offset))?;
        if bytes_beyond > 0 {
            let split = packed.len() - bytes_beyond as usize;
            fh.write_all(&packed[..split])?;
            fh.seek(SeekFrom::Start(u64::from(archive.offset)))?;
            fh.write_all(&packed[split..])?;
        } else {
            fh.write_all(packed)?;
        }
    }

    if archive_idx + 1 < header.archives.len() {
        let (time_start, time_end) = timestamp_range;
        let range = (
            time_start.min(first_ts),
            time_end.max(aligned[aligned.len() - 1].0),
        );
        propagate(fh, header, archive_idx + 1, range)?;
    }
    Ok(())
}

/// The shortest fine-grained window that can produce one consolidated
/// point at the given x-files-factor.
pub fn propagate_timeunit(low_sec_per_point: u32, high_sec_per_point: u32, xff: f32) -> u32 {
    let num_point = f64::from(low_sec_per_point / high_sec_per_point);
    ((num_point * f64::from(xff)).ceil() as u32).max(1) * high_sec_per_point
}

fn propagate(
    fh: &mut File,
    header: &Header,
    lower_idx: usize,
    timestamp_range: (u32, u32),
) -> Result<()> {
    let higher = header.archives[lower_idx - 1];
    let lower = header.archives[lower_idx];
    let (from_time, until_time) = timestamp_range;

    let timeunit =
        propagate_timeunit(lower.sec_per_point, higher.sec_per_point, header.x_files_factor);
    let from_boundary = from_time / timeunit;
    let until_boundary = until_time / timeunit;
    if from_boundary == until_boundary && from_time % timeunit != 0 {
        // the written range stays inside one consolidation window and does
        // not complete it
        return Ok(());
    }

    let (lower_start, lower_end) = if lower.sec_per_point <= timeunit {
        let end = until_boundary * timeunit;
        let start = end.saturating_sub(timeunit).min(from_boundary * timeunit);
        (start, end)
    } else {
        (
            from_time - from_time % lower.sec_per_point,
            roundup(until_time, lower.sec_per_point),
        )
    };

    let higher_base_ts = read_base_ts(fh, &higher)?;
    let higher_first_offset = if higher_base_ts == 0 {
        u64::from(higher.offset)
    } else {
        timestamp_to_offset(lower_start, higher_base_ts, header.point_size, &higher)
    };

    let higher_point_num = u64::from((lower_end - lower_start) / higher.sec_per_point);
    let higher_size = higher_point_num * header.point_size as u64;
    let relative_first = higher_first_offset - u64::from(higher.offset);
    let relative_last = (relative_first + higher_size) % u64::from(higher.size);
    let higher_last_offset = relative_last + u64::from(higher.offset);

    let series = read_series(fh, &higher, higher_first_offset, higher_last_offset)?;
    let fine_points = unpack_points(&series, header.point_size);

    let tag_cnt = header.metric_count();
    let agg_cnt = (lower.sec_per_point / higher.sec_per_point) as usize;
    let point_cnt = ((lower_end - lower_start) / lower.sec_per_point) as usize;

    // Walk consolidation windows from the end of the read range backwards;
    // a trailing partial window consumes whatever fine points remain.
    let mut lower_points: Vec<Point> = Vec::with_capacity(point_cnt);
    let fine_cnt = fine_points.len();
    for k in 0..point_cnt {
        let Some(chunk_end) = fine_cnt.checked_sub(k * agg_cnt) else {
            break;
        };
        if chunk_end == 0 {
            break;
        }
        let chunk_start = chunk_end.saturating_sub(agg_cnt);
        let ts = lower_end - (k as u32 + 1) * lower.sec_per_point;
        let values = consolidate_chunk(
            &fine_points[chunk_start..chunk_end],
            tag_cnt,
            header.agg,
            lower_start,
            lower_end,
        );
        if ts != 0 {
            lower_points.push((ts, values));
        }
    }

    let range = (lower_start, lower_end.max(until_time));
    update_archive(fh, header, lower_idx, &lower_points, range)
}

/// Consolidate one window of fine points into a single row of values.
///
/// Fine points outside `[ts_start, ts_end)` are ring residue and are
/// dropped; per slot, NULL placeholders are stripped before aggregating,
/// and a slot with no surviving values stays NULL.
fn consolidate_chunk(
    chunk: &[Point],
    tag_cnt: usize,
    agg: Agg,
    ts_start: u32,
    ts_end: u32,
) -> Vec<f64> {
    let valid: Vec<&Point> = chunk
        .iter()
        .filter(|p| ts_start <= p.0 && p.0 < ts_end)
        .collect();
    if valid.is_empty() {
        return vec![NULL_VALUE; tag_cnt];
    }

    (0..tag_cnt)
        .map(|slot| {
            let values: Vec<f64> = valid
                .iter()
                .map(|p| p.1[slot])
                .filter(|v| *v != NULL_VALUE)
                .collect();
            if values.is_empty() {
                NULL_VALUE
            } else {
                agg.apply(&values)
            }
        })
        .collect()
}

/// Read an aligned timeline out of the file.
///
/// Picks the finest tier still covering `from_time`, rounds both bounds up
/// to its step and returns one row per step. Returns `Ok(None)` when the
/// requested window lies entirely outside the retained range.
pub fn fetch(
    path: &Path,
    from_time: u32,
    until_time: Option<u32>,
    now: Option<u32>,
) -> Result<Option<Series>> {
    let mut fh = File::open(path)?;
    let header = header::read_header(&mut fh)?;

    let now = now.unwrap_or_else(unix_now);
    let until_time = until_time.unwrap_or(now);
    if from_time >= until_time {
        return Err(StorageError::InvalidTime(format!(
            "from_time {from_time} is not before until_time {until_time}"
        )));
    }

    let oldest_time = now.saturating_sub(header.max_retention);
    if from_time > now || until_time < oldest_time {
        return Ok(None);
    }

    let until_time = until_time.min(now);
    let from_time = from_time.max(oldest_time);

    let diff = now - from_time;
    let archive_idx = header
        .archives
        .iter()
        .position(|a| a.retention >= diff)
        .unwrap_or(header.archives.len() - 1);

    let (time_info, values) = archive_fetch(&mut fh, &header, archive_idx, from_time, until_time)?;
    Ok(Some(Series {
        header,
        time_info,
        values,
    }))
}

fn archive_fetch(
    fh: &mut File,
    header: &Header,
    archive_idx: usize,
    from_time: u32,
    until_time: u32,
) -> Result<(TimeInfo, Vec<Vec<Option<f64>>>)> {
    let archive = header.archives[archive_idx];
    let step = archive.sec_per_point;
    let from_time = roundup(from_time, step);
    let until_time = roundup(until_time, step);
    let tag_cnt = header.metric_count();

    let time_info = TimeInfo {
        from: from_time,
        until: until_time,
        step,
    };

    let base_ts = read_base_ts(fh, &archive)?;
    if base_ts == 0 {
        let cnt = ((until_time - from_time) / step) as usize;
        return Ok((time_info, vec![vec![None; tag_cnt]; cnt]));
    }

    let from_offset = timestamp_to_offset(from_time, base_ts, header.point_size, &archive);
    let until_offset = timestamp_to_offset(until_time, base_ts, header.point_size, &archive);

    let series = read_series(fh, &archive, from_offset, until_offset)?;
    let points = unpack_points(&series, header.point_size);

    let mut values = vec![vec![None; tag_cnt]; points.len()];
    for (ts, row) in points {
        // the ring may still hold residue from previous wraps
        if from_time <= ts && ts < until_time {
            let idx = ((ts - from_time) / step) as usize;
            if idx < values.len() {
                values[idx] = row
                    .into_iter()
                    .map(|v| if v == NULL_VALUE { None } else { Some(v) })
                    .collect();
            }
        }
    }
    Ok((time_info, values))
}

fn read_base_ts(fh: &mut File, archive: &ArchiveInfo) -> Result<u32> {
    fh.seek(SeekFrom::Start(u64::from(archive.offset)))?;
    let mut buf = [0u8; TIMESTAMP_SIZE];
    fh.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Byte offset of `ts` inside the archive's circular data region.
fn timestamp_to_offset(ts: u32, base_ts: u32, point_size: usize, archive: &ArchiveInfo) -> u64 {
    let time_distance = i64::from(ts) - i64::from(base_ts);
    let point_distance = time_distance.div_euclid(i64::from(archive.sec_per_point));
    let byte_distance = point_distance * point_size as i64;
    u64::from(archive.offset) + byte_distance.rem_euclid(i64::from(archive.size)) as u64
}

/// Read `[from_offset, until_offset)` out of the data region, wrapping at
/// the region end when the range does.
fn read_series(
    fh: &mut File,
    archive: &ArchiveInfo,
    from_offset: u64,
    until_offset: u64,
) -> Result<Vec<u8>> {
    fh.seek(SeekFrom::Start(from_offset))?;
    if from_offset < until_offset {
        let mut buf = vec![0; (until_offset - from_offset) as usize];
        fh.read_exact(&mut buf)?;
        Ok(buf)
    } else {
        let mut buf = vec![0; (u64::from(archive.end()) - from_offset) as usize];
        fh.read_exact(&mut buf)?;
        let mut tail = vec![0; (until_offset - u64::from(archive.offset)) as usize];
        fh.seek(SeekFrom::Start(u64::from(archive.offset)))?;
        fh.read_exact(&mut tail)?;
        buf.extend(tail);
        Ok(buf)
    }
}

fn pack_point(buf: &mut Vec<u8>, ts: u32, values: &[f64]) {
    buf.extend_from_slice(&ts.to_be_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
}

fn unpack_points(series: &[u8], point_size: usize) -> Vec<Point> {
    series
        .chunks_exact(point_size)
        .map(|chunk| {
            let ts = u32::from_be_bytes(chunk[..TIMESTAMP_SIZE].try_into().unwrap());
            let values = chunk[TIMESTAMP_SIZE..]
                .chunks_exact(VALUE_SIZE)
                .map(|b| f64::from_be_bytes(b.try_into().unwrap()))
                .collect();
            (ts, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundup_to_base() {
        assert_eq!(roundup(19, 10), 20);
        assert_eq!(roundup(20, 10), 20);
        assert_eq!(roundup(21, 10), 30);
    }

    #[test]
    fn validate_accepts_and_sorts() {
        let mut archives = vec![(60, 600), (1, 60)];
        validate_archive_list(&mut archives, 0.5).unwrap();
        assert_eq!(archives, vec![(1, 60), (60, 600)]);
    }

    #[test]
    fn validate_rejects_bad_lists() {
        let cases: [&[(u32, u32)]; 4] = [
            &[(1, 60), (1, 120)],  // duplicate precision
            &[(2, 60), (3, 120)],  // non-divisible steps
            &[(1, 60), (60, 1)],   // non-monotone retention
            &[(1, 2), (60, 600)],  // not enough points to consolidate
        ];
        for case in cases {
            let mut archives = case.to_vec();
            assert!(
                validate_archive_list(&mut archives, 1.0).is_err(),
                "accepted {case:?}"
            );
        }
        let mut empty: Vec<(u32, u32)> = Vec::new();
        assert!(validate_archive_list(&mut empty, 1.0).is_err());
    }

    #[test]
    fn timeunit_covers_xff_window() {
        assert_eq!(propagate_timeunit(3, 1, 1.0), 3);
        assert_eq!(propagate_timeunit(6, 1, 0.5), 3);
        assert_eq!(propagate_timeunit(60, 10, 0.3), 20);
        // degenerate factor still yields a non-zero window
        assert_eq!(propagate_timeunit(6, 2, 0.0), 2);
    }

    #[test]
    fn ring_addressing_is_congruent() {
        let archive = ArchiveInfo {
            offset: 100,
            sec_per_point: 2,
            count: 6,
            size: 6 * 20,
            retention: 12,
        };
        let base_ts = 1_440_392_088;
        for ts in (base_ts - 24..base_ts + 24).step_by(2) {
            let offset = timestamp_to_offset(ts, base_ts, 20, &archive);
            let slot = (offset - 100) / 20;
            let expected =
                (i64::from(ts) - i64::from(base_ts)).div_euclid(2).rem_euclid(6) as u64;
            assert_eq!(slot, expected, "ts={ts}");
        }
    }
}
