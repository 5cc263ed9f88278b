//! The ordered list of file caches belonging to one schema.

use crate::file_cache::FileCache;
use crate::schema::Schema;
use std::sync::Arc;

/// File caches of a schema, in file-index order. Files fill up from the
/// front; `curr_idx` never moves backwards, so a cleared slot in an older
/// file is only reused after a restart.
#[derive(Debug, Default)]
pub struct SchemaCache {
    file_caches: Vec<Arc<FileCache>>,
    curr_idx: usize,
}

impl SchemaCache {
    pub fn new() -> SchemaCache {
        SchemaCache::default()
    }

    pub fn len(&self) -> usize {
        self.file_caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_caches.is_empty()
    }

    pub fn get(&self, file_idx: usize) -> Option<&Arc<FileCache>> {
        self.file_caches.get(file_idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<FileCache>)> {
        self.file_caches.iter().enumerate()
    }

    /// Index of a file with a free metric slot, appending a fresh cache
    /// when every existing one is full.
    pub fn alloc_file(&mut self, schema: &Schema) -> (usize, Arc<FileCache>) {
        while self.curr_idx < self.file_caches.len() {
            if !self.file_caches[self.curr_idx].is_metric_full() {
                return (self.curr_idx, Arc::clone(&self.file_caches[self.curr_idx]));
            }
            self.curr_idx += 1;
        }
        let cache = Arc::new(FileCache::new(schema));
        self.file_caches.push(Arc::clone(&cache));
        (self.curr_idx, cache)
    }

    /// Record an occupied slot while replaying the index file, growing the
    /// list as needed.
    pub fn add(&mut self, schema: &Schema, file_idx: usize, pos_idx: usize) {
        while self.file_caches.len() <= file_idx {
            self.file_caches.push(Arc::new(FileCache::new(schema)));
        }
        self.file_caches[file_idx].mark_slot(pos_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schemas;

    fn two_slot_schema() -> Arc<Schema> {
        let schemas = Schemas::parse(
            r#"
            [[schema]]
            name = "sys"
            pattern = "^sys\\."
            retentions = "1s:6,3s:6"
            x_files_factor = 1.0
            aggregation_method = "min"
            cache_retention = "10s"
            metrics_per_file = 2
            "#,
        )
        .unwrap();
        Arc::clone(schemas.by_name("sys").unwrap())
    }

    #[test]
    fn allocates_new_file_when_all_full() {
        let schema = two_slot_schema();
        let mut schema_cache = SchemaCache::new();

        let (idx, cache) = schema_cache.alloc_file(&schema);
        assert_eq!(idx, 0);
        cache.alloc_slot().unwrap();

        // still a free slot in file 0
        let (idx, cache) = schema_cache.alloc_file(&schema);
        assert_eq!(idx, 0);
        cache.alloc_slot().unwrap();

        let (idx, _) = schema_cache.alloc_file(&schema);
        assert_eq!(idx, 1);
        assert_eq!(schema_cache.len(), 2);
    }

    #[test]
    fn add_grows_list_and_marks_slots() {
        let schema = two_slot_schema();
        let mut schema_cache = SchemaCache::new();

        schema_cache.add(&schema, 2, 0);
        assert_eq!(schema_cache.len(), 3);
        schema_cache.add(&schema, 2, 1);

        // replayed file 2 is full, files 0 and 1 are not
        let (idx, _) = schema_cache.alloc_file(&schema);
        assert_eq!(idx, 0);
        assert!(schema_cache.get(2).unwrap().is_metric_full());
    }
}
