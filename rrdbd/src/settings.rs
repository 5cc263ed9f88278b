//! Daemon configuration.
//!
//! All knobs live in one TOML file; every field has a default so a bare
//! `rrdbd` run works against `./storage`.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Archive data root; instance directories live below it.
    pub data_dir: PathBuf,
    /// Root of the metric-name symlink mirror.
    pub link_dir: PathBuf,
    /// Storage schema definitions.
    pub schemas_file: PathBuf,
    /// Cache instance this daemon manages.
    pub instance: String,
    /// Plain-text line ingest address.
    pub line_listen: String,
    /// Cache query address.
    pub query_listen: String,
    /// Grace seconds past a ring's retention before it may flush.
    pub wait_time: u32,
    /// Cap on new-metric creations per minute; unset means unlimited.
    pub max_creates_per_minute: Option<f64>,
    /// Prefix for the daemon's own metrics.
    pub self_metric_prefix: String,
    /// Seconds between self-metric records; 0 disables them.
    pub self_metric_interval: u64,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            data_dir: PathBuf::from("storage/data"),
            link_dir: PathBuf::from("storage/link"),
            schemas_file: PathBuf::from("storage-schemas.toml"),
            instance: "a".to_owned(),
            line_listen: "0.0.0.0:2003".to_owned(),
            query_listen: "0.0.0.0:7002".to_owned(),
            wait_time: rrdb_cache::DEFAULT_WAIT_TIME,
            max_creates_per_minute: None,
            self_metric_prefix: "rrdb".to_owned(),
            self_metric_interval: 60,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Settings> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            instance = "b"
            wait_time = 5
            max_creates_per_minute = 120.0
            "#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.instance, "b");
        assert_eq!(settings.wait_time, 5);
        assert_eq!(settings.max_creates_per_minute, Some(120.0));
        // untouched fields keep their defaults
        assert_eq!(settings.line_listen, "0.0.0.0:2003");
    }

    #[test]
    fn rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "no_such_knob = 1").unwrap();
        assert!(Settings::load(file.path()).is_err());
    }
}
