//! End-to-end tests of the archive engine against real files.

use rrdb_core::{Agg, NULL_VALUE, Point, StorageError};
use std::fs::File;
use std::path::PathBuf;
use tempfile::TempDir;

const NOW_TS: u32 = 1411628779;

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
}

fn create_file(tags: &[&str], archives: &[(u32, u32)], xff: f32, agg: Agg) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sys").join("cpu").join("user.hs");
    let tag_list: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    rrdb_core::create(&path, &tag_list, archives, xff, agg).unwrap();
    Fixture { _dir: dir, path }
}

fn basic_fixture() -> Fixture {
    create_file(
        &["host=web01,cpu=0", "host=web01,cpu=1"],
        &[(1, 6), (3, 6)],
        1.0,
        Agg::Min,
    )
}

/// Values for seed `i`: slot j holds `10 * j + i`.
fn gen_val(i: u32, num: usize) -> Vec<f64> {
    (0..num).map(|j| (10 * j + i as usize) as f64).collect()
}

fn seed_points(seeds: impl IntoIterator<Item = u32>, num: usize) -> Vec<Point> {
    seeds
        .into_iter()
        .map(|i| (NOW_TS - i, gen_val(i, num)))
        .collect()
}

fn some_row(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|v| Some(*v)).collect()
}

fn null_row(num: usize) -> Vec<Option<f64>> {
    vec![None; num]
}

#[test]
fn header_survives_create() {
    let fx = basic_fixture();
    let mut fh = File::open(&fx.path).unwrap();
    let header = rrdb_core::read_header(&mut fh).unwrap();

    assert_eq!(header.tag_list, vec!["host=web01,cpu=0", "host=web01,cpu=1"]);
    assert_eq!(header.x_files_factor, 1.0);
    assert_eq!(header.agg, Agg::Min);
    assert_eq!(header.archive_list(), vec![(1, 6), (3, 6)]);
    assert_eq!(header.reserved_size, 0);
    assert_eq!(header.point_size, 4 + 2 * 8);
    assert_eq!(header.max_retention, 18);
}

#[test]
fn create_refuses_existing_file() {
    let fx = basic_fixture();
    let err = rrdb_core::create(&fx.path, &[String::new()], &[(1, 6)], 1.0, Agg::Min).unwrap_err();
    assert!(matches!(err, StorageError::FileExists(_)));
}

#[test]
fn basic_update_fetch() {
    let fx = basic_fixture();
    let points = seed_points(1..=5, 2);
    rrdb_core::update(&fx.path, &points, Some(NOW_TS), None).unwrap();

    let from_ts = NOW_TS - 5;
    let series = rrdb_core::fetch(&fx.path, from_ts, None, Some(NOW_TS))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.from, from_ts);
    assert_eq!(series.time_info.until, NOW_TS);
    assert_eq!(series.time_info.step, 1);
    let expected: Vec<Vec<Option<f64>>> = (1..=5)
        .rev()
        .map(|i| some_row(&gen_val(i, 2)))
        .collect();
    assert_eq!(series.values, expected);
}

#[test]
fn update_propagates_on_overflow() {
    let fx = basic_fixture();
    let points = seed_points(1..=6, 2);
    rrdb_core::update(&fx.path, &points, Some(NOW_TS), None).unwrap();

    let from_ts = NOW_TS - 7;
    let series = rrdb_core::fetch(&fx.path, from_ts, None, Some(NOW_TS))
        .unwrap()
        .unwrap();

    // the 1s tier no longer covers the window, so the 3s tier serves it
    assert_eq!(series.time_info.step, 3);
    assert_eq!(series.time_info.until, NOW_TS + 2);
    assert_eq!(
        series.values,
        vec![
            some_row(&[5.0, 15.0]),
            some_row(&[2.0, 12.0]),
            null_row(2),
        ]
    );
}

#[test]
fn null_values_survive_propagation() {
    let fx = basic_fixture();
    let mut points = seed_points(1..=6, 2);
    // the two oldest points carry no data
    points[4] = (NOW_TS - 5, vec![NULL_VALUE, NULL_VALUE]);
    points[5] = (NOW_TS - 6, vec![NULL_VALUE, NULL_VALUE]);
    rrdb_core::update(&fx.path, &points, Some(NOW_TS), None).unwrap();

    let from_ts = NOW_TS - 7;
    let series = rrdb_core::fetch(&fx.path, from_ts, None, Some(NOW_TS))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.step, 3);
    assert_eq!(
        series.values,
        vec![null_row(2), some_row(&[2.0, 12.0]), null_row(2)]
    );
}

#[test]
fn old_points_land_in_coarser_tier() {
    let fx = basic_fixture();
    let points = seed_points(7..=12, 2);
    rrdb_core::update(&fx.path, &points, Some(NOW_TS), None).unwrap();

    let from_ts = NOW_TS - 13;
    let series = rrdb_core::fetch(&fx.path, from_ts, None, Some(NOW_TS))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.step, 3);
    assert_eq!(
        series.values,
        vec![
            some_row(&[12.0, 22.0]),
            some_row(&[10.0, 20.0]),
            some_row(&[7.0, 17.0]),
            null_row(2),
            null_row(2),
        ]
    );
}

#[test]
fn sparse_update_leaves_gaps() {
    let fx = create_file(
        &["host=web01,cpu=0", "host=web01,cpu=1"],
        &[(1, 60), (3, 60)],
        5.0,
        Agg::Min,
    );
    let points = seed_points([1, 2, 4, 5], 2);
    rrdb_core::update(&fx.path, &points, Some(NOW_TS), None).unwrap();

    let from_ts = NOW_TS - 5;
    let series = rrdb_core::fetch(&fx.path, from_ts, None, Some(NOW_TS))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.step, 1);
    assert_eq!(
        series.values,
        vec![
            some_row(&[5.0, 15.0]),
            some_row(&[4.0, 14.0]),
            null_row(2),
            some_row(&[2.0, 12.0]),
            some_row(&[1.0, 11.0]),
        ]
    );
}

#[test]
fn fetch_empty_archive_yields_nulls() {
    let fx = basic_fixture();
    let from_ts = NOW_TS - 4;
    let series = rrdb_core::fetch(&fx.path, from_ts, None, Some(NOW_TS))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.from, from_ts);
    assert_eq!(series.time_info.until, NOW_TS);
    assert_eq!(series.time_info.step, 1);
    assert_eq!(series.values, vec![null_row(2); 4]);
}

#[test]
fn fetch_rejects_inverted_range() {
    let fx = basic_fixture();
    let err = rrdb_core::fetch(&fx.path, NOW_TS, Some(NOW_TS - 5), Some(NOW_TS)).unwrap_err();
    assert!(matches!(err, StorageError::InvalidTime(_)));
}

#[test]
fn fetch_outside_retention_is_none() {
    let fx = basic_fixture();
    let result = rrdb_core::fetch(&fx.path, NOW_TS - 100, Some(NOW_TS - 50), Some(NOW_TS)).unwrap();
    assert!(result.is_none());
}

// A late batch must re-consolidate the windows it lands in: the second
// update passes the previous flush time as mtime so propagation reaches
// back over the gap.
#[test]
fn late_batches_reconsolidate() {
    let fx = create_file(
        &["host=web01,cpu=0", "host=web01,cpu=1"],
        &[(1, 60), (3, 60)],
        5.0,
        Agg::Min,
    );

    let first = seed_points(30..45, 2);
    rrdb_core::update(&fx.path, &first, Some(NOW_TS), None).unwrap();
    let second = seed_points(0..15, 2);
    rrdb_core::update(&fx.path, &second, Some(NOW_TS), Some(NOW_TS - 44)).unwrap();

    let from_ts = NOW_TS - 61;
    let series = rrdb_core::fetch(&fx.path, from_ts, None, Some(NOW_TS))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.step, 3);
    let null = null_row(2);
    let expected = vec![
        null.clone(),
        null.clone(),
        null.clone(),
        null.clone(),
        null.clone(),
        some_row(&[44.0, 54.0]),
        some_row(&[41.0, 51.0]),
        some_row(&[38.0, 48.0]),
        some_row(&[35.0, 45.0]),
        some_row(&[32.0, 42.0]),
        some_row(&[30.0, 40.0]),
        null.clone(),
        null.clone(),
        null.clone(),
        null.clone(),
        some_row(&[14.0, 24.0]),
        some_row(&[11.0, 21.0]),
        some_row(&[8.0, 18.0]),
        some_row(&[5.0, 15.0]),
        null.clone(),
        null,
    ];
    assert_eq!(series.values, expected);
}

#[test]
fn late_batch_with_aligned_start() {
    let fx = create_file(
        &["host=web01,cpu=0", "host=web01,cpu=1"],
        &[(1, 60), (3, 60)],
        5.0,
        Agg::Min,
    );

    let first = seed_points(10..20, 2);
    rrdb_core::update(&fx.path, &first, Some(NOW_TS), None).unwrap();
    let second = seed_points(1..7, 2);
    rrdb_core::update(&fx.path, &second, Some(NOW_TS), Some(NOW_TS - 19)).unwrap();

    let from_ts = 1411628760;
    let until_ts = from_ts + 15;
    let series = rrdb_core::fetch(&fx.path, from_ts, Some(until_ts), Some(from_ts + 61))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.step, 3);
    assert_eq!(
        series.values,
        vec![
            some_row(&[17.0, 27.0]),
            some_row(&[14.0, 24.0]),
            some_row(&[11.0, 21.0]),
            some_row(&[10.0, 20.0]),
            some_row(&[5.0, 15.0]),
        ]
    );
}

#[test]
fn fetch_spans_three_tiers() {
    let fx = create_file(
        &["host=web01,cpu=0", "host=web01,cpu=1", "host=web01,cpu=2"],
        &[(1, 60), (3, 60), (6, 60)],
        5.0,
        Agg::Min,
    );

    let points = seed_points(19..30, 3);
    rrdb_core::update(&fx.path, &points, Some(NOW_TS), None).unwrap();

    let from_ts = 1411628760 - 2 * 6;
    let until_ts = 1411628760;
    let series = rrdb_core::fetch(&fx.path, from_ts, Some(until_ts), Some(from_ts + 181))
        .unwrap()
        .unwrap();

    assert_eq!(series.time_info.step, 6);
    assert_eq!(
        series.values,
        vec![
            some_row(&[26.0, 36.0, 46.0]),
            some_row(&[20.0, 30.0, 40.0]),
        ]
    );
}

#[test]
fn add_tag_within_reserved_space() {
    let fx = create_file(&["", ""], &[(1, 6), (3, 6)], 1.0, Agg::Min);

    {
        let mut fh = File::open(&fx.path).unwrap();
        let header = rrdb_core::read_header(&mut fh).unwrap();
        assert_eq!(header.reserved_size, 64);
    }

    rrdb_core::add_tag("host=web01,cpu=0", &fx.path, 0).unwrap();

    let mut fh = File::open(&fx.path).unwrap();
    let header = rrdb_core::read_header(&mut fh).unwrap();
    assert_eq!(header.tag_list, vec!["host=web01,cpu=0", ""]);
    assert_eq!(header.reserved_size, 64 - 16);
}

#[test]
fn add_tag_beyond_reserved_space_preserves_data() {
    let fx = create_file(&["short", "x"], &[(1, 6), (3, 6)], 1.0, Agg::Min);

    let points = seed_points(1..=5, 2);
    rrdb_core::update(&fx.path, &points, Some(NOW_TS), None).unwrap();

    // no slack was reserved, so this forces the rewrite path
    let long_tag = "host=web01,region=eu-west-1,rack=42,cpu=0";
    rrdb_core::add_tag(long_tag, &fx.path, 0).unwrap();

    let mut fh = File::open(&fx.path).unwrap();
    let header = rrdb_core::read_header(&mut fh).unwrap();
    assert_eq!(header.tag_list, vec![long_tag, "x"]);
    assert_eq!(header.reserved_size, 0);

    let series = rrdb_core::fetch(&fx.path, NOW_TS - 5, None, Some(NOW_TS))
        .unwrap()
        .unwrap();
    let expected: Vec<Vec<Option<f64>>> = (1..=5)
        .rev()
        .map(|i| some_row(&gen_val(i, 2)))
        .collect();
    assert_eq!(series.values, expected);
}

#[test]
fn clear_tag_releases_slot() {
    let fx = create_file(&["host=web01,cpu=0", "host=web01,cpu=1"], &[(1, 6), (3, 6)], 1.0, Agg::Min);

    let err = rrdb_core::clear_tag(&fx.path, "host=other,cpu=0", 0).unwrap_err();
    assert!(matches!(err, StorageError::UnexpectedMetric { .. }));

    rrdb_core::clear_tag(&fx.path, "host=web01,cpu=0", 0).unwrap();
    // clearing an already-empty slot is a no-op
    rrdb_core::clear_tag(&fx.path, "host=web01,cpu=0", 0).unwrap();

    let mut fh = File::open(&fx.path).unwrap();
    let header = rrdb_core::read_header(&mut fh).unwrap();
    assert_eq!(header.tag_list, vec!["", "host=web01,cpu=1"]);
    assert_eq!(header.reserved_size, 16);
}
