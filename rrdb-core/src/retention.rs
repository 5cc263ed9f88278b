//! Retention string parsing.
//!
//! A retention definition is `"<precision>:<count>"`, e.g. `"60s:2d"` for
//! one point per minute kept for two days. Both parts accept a plain number
//! or a number with a time-unit suffix; a suffixed count is divided by the
//! precision to obtain the number of points.

use crate::error::{Result, StorageError};

/// Unit names with their length in seconds. A suffix matches by prefix,
/// so `s`, `sec` and `seconds` all select seconds.
const TIME_UNITS: [(&str, u32); 6] = [
    ("seconds", 1),
    ("minutes", 60),
    ("hours", 3600),
    ("days", 86400),
    ("weeks", 86400 * 7),
    ("years", 86400 * 365),
];

fn unit_seconds(unit: &str) -> Result<u32> {
    TIME_UNITS
        .iter()
        .find(|(name, _)| name.starts_with(unit))
        .map(|&(_, secs)| secs)
        .ok_or_else(|| StorageError::InvalidTime(format!("invalid time unit '{unit}'")))
}

/// Parse a time string like `"12h"` into seconds. Bare digits pass through.
pub fn parse_time_str(s: &str) -> Result<u32> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse()
            .map_err(|_| StorageError::InvalidTime(format!("invalid time '{s}'")));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(0);
    let (num, unit) = s.split_at(split);
    if num.is_empty() || unit.is_empty() || !unit.bytes().all(|b| b.is_ascii_lowercase()) {
        return Err(StorageError::InvalidTime(format!(
            "invalid retention specification '{s}'"
        )));
    }

    let num: u32 = num
        .parse()
        .map_err(|_| StorageError::InvalidTime(format!("invalid time '{s}'")))?;
    Ok(num * unit_seconds(unit)?)
}

/// Parse a `"<precision>:<count>"` retention definition into
/// `(seconds_per_point, point_count)`.
pub fn parse_retention_def(retention_def: &str) -> Result<(u32, u32)> {
    let (precision, count) = retention_def.trim().split_once(':').ok_or_else(|| {
        StorageError::InvalidTime(format!("invalid retention definition '{retention_def}'"))
    })?;

    let precision = parse_time_str(precision)?;
    let count = if !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit()) {
        count
            .parse()
            .map_err(|_| StorageError::InvalidTime(format!("invalid point count '{count}'")))?
    } else {
        parse_time_str(count)? / precision
    };

    Ok((precision, count))
}
