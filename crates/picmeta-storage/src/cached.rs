//! File store with the attribute cache in front of it

use crate::cache::CacheStore;
use crate::compose::MetadataCodec;
use crate::file_store::{file_times, FileStore};
use crate::storage::AttributeStorage;
use picmeta_common::config::Config;
use picmeta_common::{Entity, Error, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Loads through the cache when it holds a fresh copy, otherwise from the
/// file (and queues the result). Every mutation goes to the file first; a
/// cache failure after that is logged, never reported.
pub struct CachedStorage {
    files: FileStore,
    cache: Option<Arc<CacheStore>>,
}

impl CachedStorage {
    pub const fn new(files: FileStore, cache: Option<Arc<CacheStore>>) -> Self {
        Self { files, cache }
    }

    /// Storage as described by `config`; the cache is opened only when enabled
    pub fn from_config(config: &Config) -> Result<Self> {
        let files = FileStore::new(MetadataCodec::from_config(&config.codec));
        let cache = if config.cache.enabled {
            Some(Arc::new(CacheStore::open(&config.cache)?))
        } else {
            None
        };
        Ok(Self::new(files, cache))
    }

    pub const fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_deref()
    }

    /// Queue `entity` as just written, with the file's new times
    fn cache_stored(&self, cache: &CacheStore, entity: &Entity) {
        let mut stored = entity.clone();
        match self.files.restamp(&mut stored) {
            Ok(()) => cache.record(&stored),
            Err(e) => warn!(
                "Not caching {}: reading back its times failed: {}",
                entity.path().display(),
                e
            ),
        }
    }
}

impl AttributeStorage for CachedStorage {
    fn load(&self, path: &Path) -> Result<Entity> {
        let metadata = fs::metadata(path).map_err(|e| Error::from_io(path, e))?;

        if let Some(cache) = &self.cache {
            let (modified, _) = file_times(&metadata);
            match cache.load(path, modified) {
                Ok(Some(mut entity)) => {
                    debug!("Cache hit for {}", path.display());
                    self.files.refresh(&mut entity, &metadata)?;
                    return Ok(entity);
                }
                Ok(None) => {}
                Err(e) => warn!("Cache lookup for {} failed: {}", path.display(), e),
            }
        }

        let entity = self.files.load(path)?;
        if let Some(cache) = &self.cache {
            cache.record(&entity);
        }
        Ok(entity)
    }

    fn store(&self, entity: &Entity) -> Result<()> {
        self.files.store(entity)?;
        if let Some(cache) = &self.cache {
            self.cache_stored(cache, entity);
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.files.remove(path)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(path) {
                warn!("Failed to drop cache row for {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.files.move_path(from, to)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.move_path(from, to) {
                warn!(
                    "Failed to move cache row {} -> {}: {}",
                    from.display(),
                    to.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_jpeg, write_file};
    use crate::cache::tables::FileRow;
    use picmeta_common::config::CacheConfig;
    use picmeta_common::{Attribute, Value};
    use std::sync::atomic::Ordering;

    fn storage(dir: &Path) -> CachedStorage {
        let cache = CacheStore::open(&CacheConfig {
            flush_threshold: 1_000,
            flush_interval_ms: 60_000,
            ..CacheConfig::with_path(dir.join("cache.redb"))
        })
        .unwrap();
        CachedStorage::new(FileStore::default(), Some(Arc::new(cache)))
    }

    #[test]
    fn test_second_load_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.jpg", &minimal_jpeg());
        let storage = storage(dir.path());
        let cache = storage.cache().unwrap();

        let first = storage.load(&path).unwrap();
        cache.flush().unwrap();
        let second = storage.load(&path).unwrap();

        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(
            second.get("FileName").map(|a| a.value().clone()),
            Some(Value::text("a.jpg"))
        );
        assert_eq!(
            first.custom_attributes().count(),
            second.custom_attributes().count()
        );
    }

    #[test]
    fn test_store_updates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "b.jpg", &minimal_jpeg());
        let storage = storage(dir.path());

        let mut entity = storage.load(&path).unwrap();
        entity.set_attribute(Attribute::int("rating", 5));
        storage.store(&entity).unwrap();

        let reloaded = storage.load(&path).unwrap();
        assert_eq!(
            reloaded.get("rating").map(|a| a.value().clone()),
            Some(Value::integer(5))
        );
        assert!(storage.cache().unwrap().stats().hits.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_external_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "c.jpg", &minimal_jpeg());
        let storage = storage(dir.path());
        let _ = storage.load(&path).unwrap();

        // Rewrite the file behind the cache's back with a newer write time
        let mut entity = FileStore::default().load(&path).unwrap();
        entity.set_attribute(Attribute::text("caption", "edited elsewhere"));
        FileStore::default().store(&entity).unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let reloaded = storage.load(&path).unwrap();
        assert_eq!(
            reloaded.get("caption").map(|a| a.value().clone()),
            Some(Value::text("edited elsewhere"))
        );
    }

    #[test]
    fn test_move_and_remove_follow_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.jpg", &minimal_jpeg());
        let b = dir.path().join("b.jpg");
        let storage = storage(dir.path());
        let _ = storage.load(&a).unwrap();

        storage.move_path(&a, &b).unwrap();
        let moved = storage.load(&b).unwrap();
        assert_eq!(moved.path(), b.as_path());
        assert_eq!(
            moved.get("FileName").map(|a| a.value().clone()),
            Some(Value::text("b.jpg"))
        );

        storage.remove(&b).unwrap();
        assert!(storage.load(&b).unwrap_err().is_not_found());
    }

    #[test]
    fn test_corrupt_cache_rows_fall_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "e.jpg", &minimal_jpeg());
        let mut entity = FileStore::default().load(&path).unwrap();
        entity.set_attribute(Attribute::int("rating", 4));
        FileStore::default().store(&entity).unwrap();

        let storage = storage(dir.path());
        let cache = storage.cache().unwrap();
        let fresh = FileRow {
            last_write_time: chrono::Utc::now() + chrono::TimeDelta::days(1),
            last_access_time: chrono::Utc::now(),
        };
        let corrupt_rows: [(Vec<u8>, Vec<u8>); 2] = [
            (vec![0xFF; 3], vec![0xFF; 3]),
            (bincode::serialize(&fresh).unwrap(), vec![0x07, 0x00, 0x01]),
        ];

        for (row, attributes) in corrupt_rows {
            cache.put_raw_row(&path, &row, &attributes).unwrap();
            let misses = cache.stats().misses.load(Ordering::Relaxed);

            let loaded = storage.load(&path).unwrap();
            assert_eq!(
                loaded.get("rating").map(|a| a.value().clone()),
                Some(Value::integer(4))
            );
            assert_eq!(cache.stats().misses.load(Ordering::Relaxed), misses + 1);
            assert_eq!(cache.pending_len(), 1);

            // The re-queued row replaces the corrupt one
            cache.flush().unwrap();
            let hits = cache.stats().hits.load(Ordering::Relaxed);
            let cached = storage.load(&path).unwrap();
            assert_eq!(cache.stats().hits.load(Ordering::Relaxed), hits + 1);
            assert_eq!(
                cached.get("rating").map(|a| a.value().clone()),
                Some(Value::integer(4))
            );
            cache.flush().unwrap();
        }
    }

    #[test]
    fn test_unreadable_times_skip_cache() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let cache = storage.cache().unwrap();

        let gone = Entity::new(dir.path().join("gone.jpg"));
        storage.cache_stored(cache, &gone);
        assert_eq!(cache.pending_len(), 0);

        let path = write_file(dir.path(), "f.jpg", &minimal_jpeg());
        storage.cache_stored(cache, &Entity::new(&path));
        assert_eq!(cache.pending_len(), 1);
    }

    #[test]
    fn test_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "d.jpg", &minimal_jpeg());
        let mut config = Config::default();
        config.cache.enabled = false;
        let storage = CachedStorage::from_config(&config).unwrap();
        assert!(storage.cache().is_none());
        assert!(storage.load(&path).is_ok());
    }
}
