//! Persistent attribute cache backed by redb.
//!
//! Changes are queued in memory and written by a background worker in
//! batches, one write transaction per batch. The worker runs when the
//! number of queued changes reaches the flush threshold or when the flush
//! interval elapses, whichever comes first. After each batch, rows not
//! accessed within the configured lifespan are evicted.

use super::error::{CacheError, CacheResult};
use super::tables::{self, AttributeRows, FileRow};
use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use picmeta_common::config::CacheConfig;
use picmeta_common::Entity;
use redb::{Database, ReadableTable};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub flushes: AtomicU64,
    pub rows_written: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }

    /// Reset statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.rows_written.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Full attribute sets written
    pub written: usize,
    /// Access times bumped
    pub touched: usize,
    /// Rows evicted for age
    pub evicted: usize,
}

/// A queued change for one path
#[derive(Debug)]
enum Pending {
    /// Bump the access time of an existing row
    Touch(DateTime<Utc>),
    /// Replace the row with a full attribute set
    Write { entity: Entity, at: DateTime<Utc> },
}

fn path_key(path: &Path) -> Cow<'_, str> {
    path.to_string_lossy()
}

/// State shared with the flush worker
struct Shared {
    db: Database,
    pending: Mutex<HashMap<PathBuf, Pending>>,
    pending_count: AtomicUsize,
    /// Serializes batches so an older batch never lands after a newer one
    flush_lock: Mutex<()>,
    lifespan: TimeDelta,
    stats: CacheStats,
}

impl Shared {
    fn flush(&self) -> CacheResult<FlushReport> {
        let _guard = self.flush_lock.lock();
        let batch = {
            let mut pending = self.pending.lock();
            self.pending_count.store(0, Ordering::Release);
            std::mem::take(&mut *pending)
        };

        let mut report = FlushReport::default();
        if !batch.is_empty() {
            let write_txn = self.db.begin_write()?;
            {
                let mut files = write_txn.open_table(tables::FILES)?;
                let mut attributes = write_txn.open_table(tables::ATTRIBUTES)?;
                for (path, change) in batch {
                    let key = path_key(&path);
                    match change {
                        Pending::Touch(at) => {
                            let existing = files
                                .get(key.as_ref())?
                                .map(|row| bincode::deserialize::<FileRow>(row.value()));
                            if let Some(Ok(mut row)) = existing {
                                row.last_access_time = row.last_access_time.max(at);
                                files.insert(key.as_ref(), bincode::serialize(&row)?.as_slice())?;
                                report.touched += 1;
                            }
                        }
                        Pending::Write { entity, at } => {
                            let row = FileRow {
                                last_write_time: entity.last_write_time(),
                                last_access_time: at,
                            };
                            let rows: AttributeRows = entity.into_attributes();
                            files.insert(key.as_ref(), bincode::serialize(&row)?.as_slice())?;
                            attributes
                                .insert(key.as_ref(), bincode::serialize(&rows)?.as_slice())?;
                            report.written += 1;
                        }
                    }
                }
            }
            write_txn.commit()?;
        }

        report.evicted = self.evict_expired()?;

        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rows_written
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        if report != FlushReport::default() {
            debug!(
                "Cache flush: {} written, {} touched, {} evicted",
                report.written, report.touched, report.evicted
            );
        }
        Ok(report)
    }

    /// Drop rows whose access time is older than the lifespan. Rows that no
    /// longer decode go too.
    fn evict_expired(&self) -> CacheResult<usize> {
        let cutoff = Utc::now()
            .checked_sub_signed(self.lifespan)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let write_txn = self.db.begin_write()?;
        let expired = {
            let files = write_txn.open_table(tables::FILES)?;
            let mut expired = Vec::new();
            for entry in files.iter()? {
                let (key, value) = entry?;
                let fresh = bincode::deserialize::<FileRow>(value.value())
                    .is_ok_and(|row| row.last_access_time >= cutoff);
                if !fresh {
                    expired.push(key.value().to_string());
                }
            }
            expired
        };
        if !expired.is_empty() {
            let mut files = write_txn.open_table(tables::FILES)?;
            let mut attributes = write_txn.open_table(tables::ATTRIBUTES)?;
            for key in &expired {
                files.remove(key.as_str())?;
                attributes.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(expired.len())
    }

    fn read_row(&self, path: &Path) -> CacheResult<Option<(FileRow, AttributeRows)>> {
        let key = path_key(path);
        let read_txn = self.db.begin_read()?;

        let files = read_txn.open_table(tables::FILES)?;
        let Some(row) = files.get(key.as_ref())? else {
            return Ok(None);
        };
        let row: FileRow = match bincode::deserialize(row.value()) {
            Ok(row) => row,
            Err(e) => {
                warn!("Ignoring undecodable cache row for {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        let attributes = read_txn.open_table(tables::ATTRIBUTES)?;
        let Some(bytes) = attributes.get(key.as_ref())? else {
            return Ok(None);
        };
        match bincode::deserialize::<AttributeRows>(bytes.value()) {
            Ok(rows) => Ok(Some((row, rows))),
            Err(e) => {
                warn!("Ignoring undecodable cache attributes for {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

fn flush_loop(shared: &Shared, wake: &Receiver<()>, interval: Duration) {
    info!("Cache flush worker started (interval {:?})", interval);
    loop {
        match wake.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Err(e) = shared.flush() {
            error!("Cache flush failed: {}", e);
        }
    }
    info!("Cache flush worker stopped");
}

/// Write-behind attribute cache keyed by file path
///
/// A cached attribute set is only served while the file has not been
/// written since it was cached. The persistent store stays authoritative:
/// any row that cannot be used is treated as a miss.
pub struct CacheStore {
    shared: Arc<Shared>,
    threshold: usize,
    wake: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CacheStore {
    /// Open (or create) the cache database and start the flush worker
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        config
            .validate()
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        let path = config.path.as_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::FILES)?;
            let _t = write_txn.open_table(tables::ATTRIBUTES)?;
        }
        write_txn.commit()?;

        let shared = Arc::new(Shared {
            db,
            pending: Mutex::new(HashMap::new()),
            pending_count: AtomicUsize::new(0),
            flush_lock: Mutex::new(()),
            lifespan: TimeDelta::from_std(config.lifespan()).unwrap_or(TimeDelta::MAX),
            stats: CacheStats::default(),
        });

        let (tx, rx) = bounded(1);
        let worker_shared = Arc::clone(&shared);
        let interval = config.flush_interval();
        let worker = thread::Builder::new()
            .name("picmeta-cache-flush".into())
            .spawn(move || flush_loop(&worker_shared, &rx, interval))?;

        info!(
            "Opened attribute cache at {} (threshold {}, interval {:?}, lifespan {:?})",
            path.display(),
            config.flush_threshold,
            interval,
            config.lifespan()
        );

        Ok(Self {
            shared,
            threshold: config.flush_threshold,
            wake: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    /// Number of queued, unflushed changes
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Number of cached files
    pub fn len(&self) -> CacheResult<usize> {
        let read_txn = self.shared.db.begin_read()?;
        let files = read_txn.open_table(tables::FILES)?;
        let mut count = 0;
        for entry in files.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Cached attribute set for `path`, if it is at least as new as
    /// `last_write_time` (the file's current write time)
    ///
    /// Unflushed writes are visible. A hit bumps the row's access time.
    pub fn load(&self, path: &Path, last_write_time: DateTime<Utc>) -> CacheResult<Option<Entity>> {
        let now = Utc::now();
        {
            let mut pending = self.shared.pending.lock();
            if let Some(Pending::Write { entity, at }) = pending.get_mut(path) {
                if entity.last_write_time() >= last_write_time {
                    *at = now;
                    self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entity.clone()));
                }
            }
        }

        match self.shared.read_row(path)? {
            Some((row, attributes)) if row.last_write_time >= last_write_time => {
                self.touch(path, now);
                self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(
                    Entity::from_attributes(path, attributes).with_times(row.last_write_time, now),
                ))
            }
            Some(_) => {
                debug!("Cache row for {} is stale", path.display());
                self.shared.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.shared.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Queue the full attribute set of `entity`
    pub fn record(&self, entity: &Entity) {
        let change = Pending::Write {
            entity: entity.clone(),
            at: Utc::now(),
        };
        self.shared
            .pending
            .lock()
            .insert(entity.path().to_path_buf(), change);
        self.queued();
    }

    /// Queue an access-time bump; never replaces a queued full write
    fn touch(&self, path: &Path, at: DateTime<Utc>) {
        {
            let mut pending = self.shared.pending.lock();
            match pending.get_mut(path) {
                Some(Pending::Write { at: queued, .. }) => *queued = at,
                Some(Pending::Touch(queued)) => *queued = at,
                None => {
                    pending.insert(path.to_path_buf(), Pending::Touch(at));
                }
            }
        }
        self.queued();
    }

    fn queued(&self) {
        let count = self.shared.pending_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count < self.threshold {
            return;
        }
        if let Some(tx) = self.wake.lock().as_ref() {
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => warn!("Cache flush worker is gone"),
            }
        }
    }

    /// Forget `path`, queued changes included
    pub fn remove(&self, path: &Path) -> CacheResult<()> {
        let _guard = self.shared.flush_lock.lock();
        self.shared.pending.lock().remove(path);

        let key = path_key(path);
        let write_txn = self.shared.db.begin_write()?;
        {
            let mut files = write_txn.open_table(tables::FILES)?;
            let mut attributes = write_txn.open_table(tables::ATTRIBUTES)?;
            files.remove(key.as_ref())?;
            attributes.remove(key.as_ref())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Re-key everything known about `from` to `to`
    pub fn move_path(&self, from: &Path, to: &Path) -> CacheResult<()> {
        let _guard = self.shared.flush_lock.lock();
        {
            let mut pending = self.shared.pending.lock();
            pending.remove(to);
            if let Some(mut change) = pending.remove(from) {
                if let Pending::Write { entity, .. } = &mut change {
                    entity.change_path(to);
                }
                pending.insert(to.to_path_buf(), change);
            }
        }

        let (from_key, to_key) = (path_key(from), path_key(to));
        let write_txn = self.shared.db.begin_write()?;
        {
            let mut files = write_txn.open_table(tables::FILES)?;
            let mut attributes = write_txn.open_table(tables::ATTRIBUTES)?;
            let row = files.remove(from_key.as_ref())?.map(|g| g.value().to_vec());
            let rows = attributes
                .remove(from_key.as_ref())?
                .map(|g| g.value().to_vec());
            files.remove(to_key.as_ref())?;
            attributes.remove(to_key.as_ref())?;
            if let (Some(row), Some(rows)) = (row, rows) {
                files.insert(to_key.as_ref(), row.as_slice())?;
                attributes.insert(to_key.as_ref(), rows.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Write every queued change now, on the calling thread
    pub fn flush(&self) -> CacheResult<FlushReport> {
        self.shared.flush()
    }

    /// Stop the worker and write what is left. Later calls only flush.
    pub fn shutdown(&self) -> CacheResult<FlushReport> {
        drop(self.wake.lock().take());
        if let Some(handle) = self.worker.lock().take() {
            handle
                .join()
                .map_err(|_| CacheError::Worker("flush worker panicked".into()))?;
        }
        self.shared.flush()
    }

    #[cfg(test)]
    pub(crate) fn put_row(
        &self,
        path: &Path,
        row: &FileRow,
        attributes: &AttributeRows,
    ) -> CacheResult<()> {
        self.put_raw_row(
            path,
            &bincode::serialize(row)?,
            &bincode::serialize(attributes)?,
        )
    }

    /// Store already-encoded row bytes, bypassing the pending map
    #[cfg(test)]
    pub(crate) fn put_raw_row(&self, path: &Path, row: &[u8], attributes: &[u8]) -> CacheResult<()> {
        let key = path_key(path);
        let write_txn = self.shared.db.begin_write()?;
        {
            let mut files = write_txn.open_table(tables::FILES)?;
            let mut table = write_txn.open_table(tables::ATTRIBUTES)?;
            files.insert(key.as_ref(), row)?;
            table.insert(key.as_ref(), attributes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Final cache flush failed: {}", e);
        }
    }
}
