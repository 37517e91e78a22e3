//! Entity manager: one live entity per path
//!
//! Entities handed out by [`EntityManager::get`] are shared handles. As long
//! as any caller holds the handle for a path, every `get` for that path
//! returns the same handle; once all holders drop it, the manager forgets
//! it and the next `get` loads a fresh copy.
//!
//! Modified entities are kept as deep copies until a save pipeline drains
//! them with [`EntityManager::get_modified`].

use crate::storage::AttributeStorage;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use picmeta_common::{Entity, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shared, lockable entity
pub type EntityHandle = Arc<RwLock<Entity>>;

#[derive(Default)]
struct Registry {
    live: HashMap<PathBuf, Weak<RwLock<Entity>>>,
    modified: HashMap<PathBuf, Entity>,
}

impl Registry {
    fn live_handle(&self, path: &Path) -> Option<EntityHandle> {
        self.live.get(path).and_then(Weak::upgrade)
    }

    fn prune(&mut self) {
        self.live.retain(|_, weak| weak.strong_count() > 0);
    }
}

pub struct EntityManager {
    storage: Arc<dyn AttributeStorage>,
    registry: RwLock<Registry>,
}

impl EntityManager {
    pub fn new(storage: Arc<dyn AttributeStorage>) -> Self {
        Self {
            storage,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn AttributeStorage> {
        &self.storage
    }

    /// Live handle for `path`, loading the entity if nobody holds one
    pub fn get(&self, path: &Path) -> Result<EntityHandle> {
        if let Some(handle) = self.registry.read().live_handle(path) {
            return Ok(handle);
        }

        // Load without holding the registry lock
        let entity = self.storage.load(path)?;

        let mut registry = self.registry.write();
        // Someone else may have registered a handle meanwhile
        if let Some(handle) = registry.live_handle(path) {
            return Ok(handle);
        }
        registry.prune();
        let handle = Arc::new(RwLock::new(entity));
        registry
            .live
            .insert(path.to_path_buf(), Arc::downgrade(&handle));
        debug!("Loaded entity {}", path.display());
        Ok(handle)
    }

    /// Register `handle` as the live entity for its path and queue a copy
    /// of its current state for saving
    pub fn set(&self, handle: &EntityHandle) {
        let snapshot = handle.read().clone();
        let path = snapshot.path().to_path_buf();

        let mut registry = self.registry.write();
        registry.prune();
        registry.live.insert(path.clone(), Arc::downgrade(handle));
        registry.modified.insert(path, snapshot);
    }

    /// Rename the file, then re-key the live and modified entries
    pub fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.storage.move_path(from, to)?;

        let registry = self.registry.upgradable_read();
        if !registry.live.contains_key(from) && !registry.modified.contains_key(from) {
            return Ok(());
        }
        let mut registry = RwLockUpgradableReadGuard::upgrade(registry);

        let live = registry.live.remove(from).and_then(|weak| {
            let handle = weak.upgrade()?;
            registry.live.insert(to.to_path_buf(), weak);
            Some(handle)
        });
        if let Some(mut entity) = registry.modified.remove(from) {
            entity.change_path(to);
            registry.modified.insert(to.to_path_buf(), entity);
        }
        // Entity locks are never taken while the registry is held
        drop(registry);

        if let Some(handle) = live {
            handle.write().change_path(to);
        }
        debug!("Moved entity {} to {}", from.display(), to.display());
        Ok(())
    }

    /// Delete the file and drop every trace of its entity
    pub fn remove(&self, path: &Path) -> Result<()> {
        self.storage.remove(path)?;
        let mut registry = self.registry.write();
        registry.live.remove(path);
        registry.modified.remove(path);
        Ok(())
    }

    /// Take every modified entity; the internal set starts over empty
    pub fn get_modified(&self) -> HashMap<PathBuf, Entity> {
        std::mem::take(&mut self.registry.write().modified)
    }

    /// Whether a modification of `path` is waiting to be saved
    pub fn has_modified(&self, path: &Path) -> bool {
        self.registry.read().modified.contains_key(path)
    }

    /// Number of paths with a live handle
    pub fn len(&self) -> usize {
        self.registry
            .read()
            .live
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::FileStore;
    use crate::test_support::{minimal_jpeg, write_file};
    use picmeta_common::{Attribute, Value};
    use std::thread;

    fn manager() -> EntityManager {
        EntityManager::new(Arc::new(FileStore::default()))
    }

    #[test]
    fn test_get_returns_same_live_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.jpg", &minimal_jpeg());
        let manager = manager();

        let first = manager.get(&path).unwrap();
        let second = manager.get(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.len(), 1);

        drop(first);
        drop(second);
        assert_eq!(manager.len(), 0);
        let third = manager.get(&path).unwrap();
        assert_eq!(third.read().path(), path.as_path());
    }

    #[test]
    fn test_concurrent_get_shares_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "b.jpg", &minimal_jpeg());
        let manager = Arc::new(manager());
        let anchor = manager.get(&path).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let path = path.clone();
                thread::spawn(move || manager.get(&path).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(Arc::ptr_eq(&anchor, &handle.join().unwrap()));
        }
    }

    #[test]
    fn test_set_queues_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "c.jpg", &minimal_jpeg());
        let manager = manager();

        let handle = manager.get(&path).unwrap();
        handle.write().set_attribute(Attribute::int("rating", 3));
        manager.set(&handle);
        // Later edits do not leak into the queued copy
        handle.write().set_attribute(Attribute::int("rating", 1));

        assert!(manager.has_modified(&path));
        let modified = manager.get_modified();
        assert_eq!(modified.len(), 1);
        assert_eq!(
            modified[&path].get("rating").map(|a| a.value().clone()),
            Some(Value::integer(3))
        );
        assert!(manager.get_modified().is_empty());
        assert!(!manager.has_modified(&path));
    }

    #[test]
    fn test_set_registers_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "d.jpg", &minimal_jpeg());
        let manager = manager();

        let handle = Arc::new(RwLock::new(Entity::new(&path)));
        manager.set(&handle);
        assert!(Arc::ptr_eq(&handle, &manager.get(&path).unwrap()));
    }

    #[test]
    fn test_move_rekeys_entries() {
        let dir = tempfile::tempdir().unwrap();
        let from = write_file(dir.path(), "e.jpg", &minimal_jpeg());
        let to = dir.path().join("f.jpg");
        let manager = manager();

        let handle = manager.get(&from).unwrap();
        manager.set(&handle);
        manager.move_path(&from, &to).unwrap();

        assert_eq!(handle.read().path(), to.as_path());
        assert!(Arc::ptr_eq(&handle, &manager.get(&to).unwrap()));
        let modified = manager.get_modified();
        assert_eq!(modified[&to].path(), to.as_path());
        assert!(!modified.contains_key(&from));
    }

    #[test]
    fn test_move_while_entity_is_read() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let from = write_file(dir.path(), "m.jpg", &minimal_jpeg());
        let other = write_file(dir.path(), "n.jpg", &minimal_jpeg());
        let to = dir.path().join("o.jpg");
        let manager = Arc::new(manager());
        let handle = manager.get(&from).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let reader = {
            let manager = Arc::clone(&manager);
            let handle = Arc::clone(&handle);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let guard = handle.read();
                thread::sleep(Duration::from_millis(200));
                let other = manager.get(&other).unwrap();
                drop(guard);
                drop(other);
                done_tx.send("reader").unwrap();
            })
        };
        let mover = {
            let (manager, from, to) = (Arc::clone(&manager), from.clone(), to.clone());
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                manager.move_path(&from, &to).unwrap();
                done_tx.send("mover").unwrap();
            })
        };

        for _ in 0..2 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        reader.join().unwrap();
        mover.join().unwrap();
        assert_eq!(handle.read().path(), to.as_path());
    }

    #[test]
    fn test_failed_move_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let from = write_file(dir.path(), "g.jpg", &minimal_jpeg());
        let taken = write_file(dir.path(), "h.jpg", &minimal_jpeg());
        let manager = manager();

        let handle = manager.get(&from).unwrap();
        assert!(manager.move_path(&from, &taken).is_err());
        assert_eq!(handle.read().path(), from.as_path());
    }

    #[test]
    fn test_remove_forgets_entity() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "i.jpg", &minimal_jpeg());
        let manager = manager();

        let handle = manager.get(&path).unwrap();
        manager.set(&handle);
        manager.remove(&path).unwrap();

        assert!(!manager.has_modified(&path));
        assert!(manager.get(&path).unwrap_err().is_not_found());
    }
}
