//! Archive file header: pack and unpack.
//!
//! Every archive file starts with a fixed metadata block, a tag block and an
//! archive table, all big-endian:
//!
//! ```text
//! [Metadata: agg_id u32 | max_retention u32 | x_files_factor f32
//!            | archive_cnt u32 | tag_size u32 | point_size u32]
//! [Tag block: tag_size bytes, TAB-separated, metric_count + 1 fields;
//!            the final field is reclaimable filler]
//! [Archive table: archive_cnt x (offset u32 | sec_per_point u32 | count u32)]
//! [Data regions, one circular buffer per archive]
//! ```
//!
//! A point is `timestamp u32` followed by one f64 per metric slot, so
//! `point_size = 4 + 8 * metric_count`.

use crate::agg::Agg;
use crate::error::{Result, StorageError};
use std::io::{Read, Seek, SeekFrom};
use zerocopy::byteorder::big_endian::{F32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const METADATA_SIZE: usize = 24;
pub const ARCHIVE_INFO_SIZE: usize = 12;
pub const TIMESTAMP_SIZE: usize = 4;
pub const VALUE_SIZE: usize = 8;

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawMetadata {
    agg_id: U32,
    max_retention: U32,
    x_files_factor: F32,
    archive_cnt: U32,
    tag_size: U32,
    point_size: U32,
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawArchiveInfo {
    offset: U32,
    sec_per_point: U32,
    count: U32,
}

const_assert_eq!(std::mem::size_of::<RawMetadata>(), METADATA_SIZE);
const_assert_eq!(std::mem::size_of::<RawArchiveInfo>(), ARCHIVE_INFO_SIZE);

/// Size in bytes of one multi-metric point.
pub fn point_size_for(metric_count: usize) -> usize {
    TIMESTAMP_SIZE + VALUE_SIZE * metric_count
}

/// One retention tier as described by the archive table, with its derived
/// byte size and covered time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub offset: u32,
    pub sec_per_point: u32,
    pub count: u32,
    pub size: u32,
    pub retention: u32,
}

impl ArchiveInfo {
    /// First byte past this archive's data region.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

/// Parsed header of an archive file.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub agg: Agg,
    pub max_retention: u32,
    pub x_files_factor: f32,
    /// Metric names by slot; an empty string marks a free slot.
    pub tag_list: Vec<String>,
    /// Length of the filler field, reusable when a tag grows.
    pub reserved_size: usize,
    pub point_size: usize,
    pub archives: Vec<ArchiveInfo>,
}

impl Header {
    /// Number of metric slots in this file.
    pub fn metric_count(&self) -> usize {
        self.tag_list.len()
    }

    /// The `(sec_per_point, count)` pairs of the archive table.
    pub fn archive_list(&self) -> Vec<(u32, u32)> {
        self.archives
            .iter()
            .map(|a| (a.sec_per_point, a.count))
            .collect()
    }
}

/// Build the wire representation of a header.
///
/// `inter_tag_list` is the slot tags plus the trailing filler field.
/// Returns the packed bytes and the offset of the first byte past the last
/// data region (the total file size).
pub fn pack_header(
    inter_tag_list: &[String],
    archive_list: &[(u32, u32)],
    x_files_factor: f32,
    agg: Agg,
) -> Result<(Vec<u8>, u64)> {
    let Some(metric_count) = inter_tag_list.len().checked_sub(1) else {
        return Err(StorageError::InvalidConfig(
            "tag list must contain at least the filler field".into(),
        ));
    };
    let Some(&(last_sec, last_cnt)) = archive_list.last() else {
        return Err(StorageError::InvalidConfig(
            "must specify at least one archive config".into(),
        ));
    };

    let tag = inter_tag_list.join("\t");
    let point_size = point_size_for(metric_count);

    let metadata = RawMetadata {
        agg_id: U32::new(agg.id()),
        max_retention: U32::new(last_sec * last_cnt),
        x_files_factor: F32::new(x_files_factor),
        archive_cnt: U32::new(archive_list.len() as u32),
        tag_size: U32::new(tag.len() as u32),
        point_size: U32::new(point_size as u32),
    };

    let mut packed =
        Vec::with_capacity(METADATA_SIZE + tag.len() + ARCHIVE_INFO_SIZE * archive_list.len());
    packed.extend_from_slice(metadata.as_bytes());
    packed.extend_from_slice(tag.as_bytes());

    let mut offset =
        (METADATA_SIZE + tag.len() + ARCHIVE_INFO_SIZE * archive_list.len()) as u64;
    for &(sec, cnt) in archive_list {
        let info = RawArchiveInfo {
            offset: U32::new(offset as u32),
            sec_per_point: U32::new(sec),
            count: U32::new(cnt),
        };
        packed.extend_from_slice(info.as_bytes());
        offset += (point_size as u64) * u64::from(cnt);
    }

    Ok((packed, offset))
}

/// Parse the header, restoring the reader's position afterwards.
///
/// Cheap enough to be called per operation; callers that hold a file open
/// across operations may cache the result.
pub fn read_header<R: Read + Seek>(fh: &mut R) -> Result<Header> {
    let origin = fh.stream_position()?;
    if origin != 0 {
        fh.seek(SeekFrom::Start(0))?;
    }

    let mut buf = [0u8; METADATA_SIZE];
    fh.read_exact(&mut buf)?;
    let metadata = RawMetadata::ref_from_bytes(&buf).unwrap();

    let agg = Agg::from_id(metadata.agg_id.get()).ok_or_else(|| {
        StorageError::CorruptHeader(format!("unknown aggregation id {}", metadata.agg_id))
    })?;

    let mut tag_buf = vec![0u8; metadata.tag_size.get() as usize];
    fh.read_exact(&mut tag_buf)?;
    let tag = String::from_utf8(tag_buf)
        .map_err(|_| StorageError::CorruptHeader("tag block is not UTF-8".into()))?;
    let mut inter_tag_list: Vec<String> = tag.split('\t').map(str::to_owned).collect();

    let point_size = metadata.point_size.get() as usize;
    if point_size != point_size_for(inter_tag_list.len() - 1) {
        return Err(StorageError::CorruptHeader(format!(
            "point size {} does not match {} metric slots",
            point_size,
            inter_tag_list.len() - 1,
        )));
    }

    let mut archives = Vec::with_capacity(metadata.archive_cnt.get() as usize);
    for _ in 0..metadata.archive_cnt.get() {
        let mut buf = [0u8; ARCHIVE_INFO_SIZE];
        fh.read_exact(&mut buf)?;
        let info = RawArchiveInfo::ref_from_bytes(&buf).unwrap();
        archives.push(ArchiveInfo {
            offset: info.offset.get(),
            sec_per_point: info.sec_per_point.get(),
            count: info.count.get(),
            size: info.count.get() * metadata.point_size.get(),
            retention: info.sec_per_point.get() * info.count.get(),
        });
    }

    fh.seek(SeekFrom::Start(origin))?;

    let filler = inter_tag_list.pop().unwrap_or_default();
    Ok(Header {
        agg,
        max_retention: metadata.max_retention.get(),
        x_files_factor: metadata.x_files_factor.get(),
        tag_list: inter_tag_list,
        reserved_size: filler.len(),
        point_size,
        archives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let inter_tags = vec![
            "host=web01,cpu=0".to_string(),
            "host=web01,cpu=1".to_string(),
            "NNNNNNNN".to_string(),
        ];
        let archive_list = [(1, 6), (3, 6)];
        let (packed, end_offset) = pack_header(&inter_tags, &archive_list, 0.5, Agg::Min).unwrap();

        let point_size = point_size_for(2);
        let header_len = METADATA_SIZE + (16 + 1 + 16 + 1 + 8) + 2 * ARCHIVE_INFO_SIZE;
        assert_eq!(packed.len(), header_len);
        assert_eq!(end_offset, (header_len + 12 * point_size) as u64);

        let mut cursor = Cursor::new(packed);
        let header = read_header(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 0);

        assert_eq!(header.agg, Agg::Min);
        assert_eq!(header.max_retention, 18);
        assert_eq!(header.x_files_factor, 0.5);
        assert_eq!(header.tag_list, &inter_tags[..2]);
        assert_eq!(header.reserved_size, 8);
        assert_eq!(header.point_size, point_size);
        assert_eq!(header.archive_list(), archive_list);

        let first = header.archives[0];
        assert_eq!(first.offset as usize, header_len);
        assert_eq!(first.size as usize, 6 * point_size);
        assert_eq!(first.retention, 6);
        let second = header.archives[1];
        assert_eq!(second.offset, first.end());
        assert_eq!(second.retention, 18);
    }

    #[test]
    fn position_is_restored_from_nonzero_origin() {
        let inter_tags = vec!["a".to_string(), String::new()];
        let (packed, _) = pack_header(&inter_tags, &[(60, 10)], 1.0, Agg::Average).unwrap();
        let mut cursor = Cursor::new(packed);
        cursor.seek(SeekFrom::Start(7)).unwrap();
        let header = read_header(&mut cursor).unwrap();
        assert_eq!(header.tag_list, vec!["a".to_string()]);
        assert_eq!(cursor.position(), 7);
    }

    #[test]
    fn rejects_unknown_agg_id() {
        let inter_tags = vec!["a".to_string(), String::new()];
        let (mut packed, _) = pack_header(&inter_tags, &[(60, 10)], 1.0, Agg::Average).unwrap();
        packed[3] = 9;
        let mut cursor = Cursor::new(packed);
        assert!(matches!(
            read_header(&mut cursor),
            Err(StorageError::CorruptHeader(_))
        ));
    }
}
