//! Storage schemas: which retention layout a metric gets and how its
//! file cache is sized.
//!
//! Schemas load once at boot and stay constant for the process lifetime.
//! The file is a TOML list of `[[schema]]` tables matched in order; an
//! always-matching `default` schema is appended last, so every metric
//! resolves to exactly one schema.
//!
//! ```toml
//! [[schema]]
//! name = "sys"
//! pattern = "^sys\\."
//! retentions = "10s:1d,60s:30d"
//! x_files_factor = 0.5
//! aggregation_method = "average"
//! cache_retention = "10m"
//! metrics_per_file = 64
//! ```

use crate::error::{CacheError, Result};
use regex::Regex;
use rrdb_core::Agg;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Ring overprovisioning applied when a schema does not set its own ratio.
const DEFAULT_CACHE_RATIO: f64 = 1.2;

/// One storage schema, immutable after load.
#[derive(Debug)]
pub struct Schema {
    pub name: String,
    /// Matching is anchored at the start of the metric name; `None`
    /// matches everything.
    pub pattern: Option<Regex>,
    /// `(sec_per_point, count)` per tier, finest first.
    pub archives: Vec<(u32, u32)>,
    pub x_files_factor: f32,
    pub aggregation_method: Agg,
    /// How long a file cache holds points before they may flush.
    pub cache_retention: u32,
    /// Metric slots per archive file.
    pub metrics_max_num: usize,
    /// Ring overprovision factor, >= 1.
    pub cache_ratio: f64,
}

impl Schema {
    pub fn matches(&self, metric: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.find(metric).is_some_and(|m| m.start() == 0),
            None => true,
        }
    }
}

fn default_schema() -> Schema {
    Schema {
        name: "default".to_owned(),
        pattern: None,
        archives: vec![(60, 60 * 24 * 7)],
        x_files_factor: 1.0,
        aggregation_method: Agg::Average,
        cache_retention: 600,
        metrics_max_num: 40,
        cache_ratio: DEFAULT_CACHE_RATIO,
    }
}

#[derive(Deserialize)]
struct RawSchemas {
    #[serde(default, rename = "schema")]
    schemas: Vec<RawSchema>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    name: String,
    pattern: String,
    retentions: String,
    x_files_factor: f32,
    aggregation_method: String,
    cache_retention: String,
    metrics_per_file: usize,
    #[serde(default)]
    cache_ratio: Option<f64>,
}

/// The ordered schema list.
#[derive(Debug)]
pub struct Schemas {
    schemas: Vec<Arc<Schema>>,
}

impl Schemas {
    /// Load schemas from a TOML file, appending the default schema.
    pub fn load(path: &Path) -> Result<Schemas> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Schemas> {
        let raw: RawSchemas = toml::from_str(text)
            .map_err(|err| CacheError::Config(format!("unparsable schema file: {err}")))?;

        let mut schemas = Vec::with_capacity(raw.schemas.len() + 1);
        for raw in raw.schemas {
            schemas.push(Arc::new(Schema::try_from(raw)?));
        }
        schemas.push(Arc::new(default_schema()));
        Ok(Schemas { schemas })
    }

    /// Only the default schema; used when no schema file is configured.
    pub fn defaults() -> Schemas {
        Schemas {
            schemas: vec![Arc::new(default_schema())],
        }
    }

    /// First schema whose pattern matches, falling back to `default`.
    pub fn by_metric(&self, metric: &str) -> &Arc<Schema> {
        self.schemas
            .iter()
            .find(|s| s.matches(metric))
            .unwrap_or_else(|| &self.schemas[self.schemas.len() - 1])
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.iter().find(|s| s.name == name)
    }
}

impl TryFrom<RawSchema> for Schema {
    type Error = CacheError;

    fn try_from(raw: RawSchema) -> Result<Schema> {
        let mut archives = raw
            .retentions
            .split(',')
            .map(rrdb_core::parse_retention_def)
            .collect::<rrdb_core::Result<Vec<_>>>()
            .map_err(|err| CacheError::Config(format!("schema '{}': {err}", raw.name)))?;

        rrdb_core::validate_archive_list(&mut archives, raw.x_files_factor)
            .map_err(|err| CacheError::Config(format!("schema '{}': {err}", raw.name)))?;

        let pattern = Regex::new(&raw.pattern).map_err(|err| {
            CacheError::Config(format!("schema '{}': bad pattern: {err}", raw.name))
        })?;

        let aggregation_method = Agg::from_name(&raw.aggregation_method).ok_or_else(|| {
            CacheError::Config(format!(
                "schema '{}': unknown aggregation method '{}'",
                raw.name, raw.aggregation_method
            ))
        })?;

        let cache_retention = rrdb_core::parse_time_str(&raw.cache_retention)
            .map_err(|err| CacheError::Config(format!("schema '{}': {err}", raw.name)))?;

        if raw.metrics_per_file == 0 {
            return Err(CacheError::Config(format!(
                "schema '{}': metrics_per_file must be positive",
                raw.name
            )));
        }

        Ok(Schema {
            name: raw.name,
            pattern: Some(pattern),
            archives,
            x_files_factor: raw.x_files_factor,
            aggregation_method,
            cache_retention,
            metrics_max_num: raw.metrics_per_file,
            cache_ratio: raw.cache_ratio.unwrap_or(DEFAULT_CACHE_RATIO),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[schema]]
        name = "sys"
        pattern = "^sys\\."
        retentions = "1s:6,3s:6"
        x_files_factor = 1.0
        aggregation_method = "min"
        cache_retention = "10s"
        metrics_per_file = 2
    "#;

    #[test]
    fn parses_and_appends_default() {
        let schemas = Schemas::parse(SAMPLE).unwrap();

        let sys = schemas.by_metric("sys.cpu.user");
        assert_eq!(sys.name, "sys");
        assert_eq!(sys.archives, vec![(1, 6), (3, 6)]);
        assert_eq!(sys.aggregation_method, Agg::Min);
        assert_eq!(sys.cache_retention, 10);
        assert_eq!(sys.metrics_max_num, 2);
        assert_eq!(sys.cache_ratio, DEFAULT_CACHE_RATIO);

        // pattern is anchored: a mid-name match must not count
        assert_eq!(schemas.by_metric("app.sys.cpu").name, "default");
        assert_eq!(schemas.by_metric("unmatched").name, "default");
        assert!(schemas.by_name("sys").is_some());
        assert!(schemas.by_name("nope").is_none());
    }

    #[test]
    fn empty_file_still_has_default() {
        let schemas = Schemas::parse("").unwrap();
        assert_eq!(schemas.by_metric("anything").name, "default");
    }

    #[test]
    fn rejects_bad_retentions() {
        let text = SAMPLE.replace("1s:6,3s:6", "1s:6,3x:6");
        assert!(matches!(
            Schemas::parse(&text),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn rejects_invalid_archive_list() {
        let text = SAMPLE.replace("1s:6,3s:6", "1s:6,3s:2");
        assert!(matches!(
            Schemas::parse(&text),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn rejects_unknown_aggregation() {
        let text = SAMPLE.replace("\"min\"", "\"median\"");
        assert!(matches!(
            Schemas::parse(&text),
            Err(CacheError::Config(_))
        ));
    }
}
