//! On-disk layout: data files, the append-only index and the symlink
//! mirror from metric names to archive files.
//!
//! ```text
//! <data_dir>/<instance>/<schema>/<file_idx>.hs    archive data
//! <data_dir>/<instance>.idx                       index file
//! <link_dir>/<instance>/a/b/c.hs                  symlink for metric a.b.c
//! ```
//!
//! The index file is the canonical store; links are a navigable mirror.
//! Both can be rebuilt from the data files after a crash or manual edit.

use crate::error::Result;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory layout of one cache instance.
#[derive(Debug, Clone)]
pub struct Layout {
    pub data_dir: PathBuf,
    pub link_dir: PathBuf,
    pub instance: String,
}

impl Layout {
    pub fn new(data_dir: PathBuf, link_dir: PathBuf, instance: String) -> Layout {
        Layout {
            data_dir,
            link_dir,
            instance,
        }
    }

    pub fn instance_data_dir(&self) -> PathBuf {
        self.data_dir.join(&self.instance)
    }

    pub fn instance_link_dir(&self) -> PathBuf {
        self.link_dir.join(&self.instance)
    }

    pub fn index_file(&self) -> PathBuf {
        self.data_dir.join(format!("{}.idx", self.instance))
    }

    /// Path of an archive data file.
    pub fn file_path(&self, schema_name: &str, file_idx: usize) -> PathBuf {
        self.instance_data_dir()
            .join(schema_name)
            .join(format!("{file_idx}.hs"))
    }

    /// Path of a metric's symlink: dots become directory separators.
    pub fn metric_path(&self, metric: &str) -> PathBuf {
        let mut path = self.instance_link_dir();
        for part in metric.split('.') {
            path.push(part);
        }
        path.set_extension("hs");
        path
    }
}

/// Create (or replace) the symlink for `metric`. A pre-existing link is
/// kept as `<link>.bak`.
pub fn create_link(metric: &str, file_path: &Path, layout: &Layout) -> std::io::Result<()> {
    let link_path = layout.metric_path(metric);
    create_link_helper(&link_path, file_path)
}

fn create_link_helper(link_path: &Path, file_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = link_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    if link_path.symlink_metadata().is_ok() {
        let mut backup = link_path.as_os_str().to_owned();
        backup.push(".bak");
        std::fs::rename(link_path, PathBuf::from(backup))?;
    }
    std::os::unix::fs::symlink(file_path, link_path)
}

/// Walk every data file under `instance_data_dir` in schema/file order,
/// yielding `(schema_name, file_path)` pairs.
fn data_files(instance_data_dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for schema_entry in std::fs::read_dir(instance_data_dir)? {
        let schema_entry = schema_entry?;
        if !schema_entry.file_type()?.is_dir() {
            continue;
        }
        let schema_name = schema_entry.file_name().to_string_lossy().into_owned();
        for file_entry in std::fs::read_dir(schema_entry.path())? {
            let path = file_entry?.path();
            if path.extension().is_some_and(|ext| ext == "hs") {
                files.push((schema_name.clone(), path));
            }
        }
    }
    Ok(files)
}

fn file_idx_of(path: &Path) -> Option<usize> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Rebuild the index file by scanning the data files. Data files left with
/// no occupied slot are removed.
pub fn rebuild_index(instance_data_dir: &Path, index_file: &Path) -> Result<()> {
    info!(dir = %instance_data_dir.display(), "rebuilding index from data files");
    let mut out = File::create(index_file)?;

    for (schema_name, path) in data_files(instance_data_dir)? {
        let Some(file_idx) = file_idx_of(&path) else {
            continue;
        };
        let mut fh = File::open(&path)?;
        let header = rrdb_core::read_header(&mut fh)?;

        let mut empty = true;
        for (pos_idx, tag) in header.tag_list.iter().enumerate() {
            if !tag.is_empty() {
                empty = false;
                writeln!(out, "{tag} {schema_name} {file_idx} {pos_idx}")?;
            }
        }
        if empty {
            debug!(path = %path.display(), "removing data file with no metrics");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Rebuild the symlink mirror by scanning the data files.
pub fn rebuild_link(instance_data_dir: &Path, instance_link_dir: &Path) -> Result<()> {
    info!(dir = %instance_link_dir.display(), "rebuilding metric links");

    for (_, path) in data_files(instance_data_dir)? {
        let mut fh = File::open(&path)?;
        let header = rrdb_core::read_header(&mut fh)?;

        for tag in header.tag_list.iter().filter(|t| !t.is_empty()) {
            let mut link_path = instance_link_dir.to_path_buf();
            for part in tag.split('.') {
                link_path.push(part);
            }
            link_path.set_extension("hs");
            create_link_helper(&link_path, &path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::new(
            PathBuf::from("/srv/storage/data"),
            PathBuf::from("/srv/storage/link"),
            "a".to_owned(),
        )
    }

    #[test]
    fn path_conventions() {
        let layout = layout();
        assert_eq!(
            layout.file_path("sys", 3),
            PathBuf::from("/srv/storage/data/a/sys/3.hs")
        );
        assert_eq!(
            layout.metric_path("sys.cpu.user"),
            PathBuf::from("/srv/storage/link/a/sys/cpu/user.hs")
        );
        assert_eq!(layout.index_file(), PathBuf::from("/srv/storage/data/a.idx"));
    }

    #[test]
    fn file_idx_parses_stem() {
        assert_eq!(file_idx_of(Path::new("/d/sys/12.hs")), Some(12));
        assert_eq!(file_idx_of(Path::new("/d/sys/x.hs")), None);
    }
}
