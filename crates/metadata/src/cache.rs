//! Content-addressed cache of uploaded parts.
//!
//! The upload orchestrator asks [`ChunkCacheStore::find_valid_part_by_hash`]
//! before sending a part and calls [`ChunkCacheStore::add_or_update`] after a
//! successful upload. Parts are reusable for a bounded time (3 days by
//! default) and are purged either by [`ChunkCacheStore::remove_expired`] or,
//! when the remote media is deleted, by
//! [`ChunkCacheStore::remove_by_remote_ids`].
//!
//! `add_or_update` is a lookup followed by a write. Calls for the same
//! `(hash, size)` key are serialized by an in-process per-key lock, so one
//! process never creates two live rows for a key. Separate processes sharing
//! one database may still race and insert a duplicate; lookups then resolve
//! the tie deterministically (latest expiry, then highest id), which only
//! costs a missed dedup.

use crate::error::{MetadataError, MetadataResult};
use crate::models::UploadPartRow;
use crate::repos::{PartFilter, PartStorage};
use dashmap::DashMap;
use serde::Serialize;
use partcache_core::config::CacheConfig;
use partcache_core::{Clock, NewPart, PartCandidate, PartKey, SystemClock};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Tunables for [`ChunkCacheStore`].
#[derive(Clone)]
pub struct CacheOptions {
    /// Validity window applied on register and on reuse.
    pub ttl: Duration,
    /// Upper bound for each storage call.
    pub operation_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl CacheOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            operation_timeout: config.operation_timeout(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl", &self.ttl)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

/// A reference to the per-key mutex that prunes the map entry when dropped.
///
/// Pruning happens on every exit path, including a cancelled caller still
/// waiting for the mutex.
struct KeyLockEntry<'a> {
    locks: &'a DashMap<PartKey, Arc<Mutex<()>>>,
    key: PartKey,
    lock: Arc<Mutex<()>>,
}

impl<'a> KeyLockEntry<'a> {
    fn acquire(locks: &'a DashMap<PartKey, Arc<Mutex<()>>>, key: PartKey) -> Self {
        let lock = locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        Self { locks, key, lock }
    }

    fn mutex(&self) -> &Arc<Mutex<()>> {
        &self.lock
    }
}

impl Drop for KeyLockEntry<'_> {
    fn drop(&mut self) {
        // Only the map and this entry still reference the mutex.
        self.locks.remove_if(&self.key, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

/// Row counts at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: u64,
    pub live: u64,
    pub expired: u64,
    /// Sum of `file_size` over live rows.
    pub live_bytes: i64,
}

/// Persistent, TTL-bounded cache of uploaded parts.
pub struct ChunkCacheStore {
    storage: Arc<dyn PartStorage>,
    ttl_secs: i64,
    operation_timeout: Duration,
    clock: Arc<dyn Clock>,
    key_locks: DashMap<PartKey, Arc<Mutex<()>>>,
}

impl ChunkCacheStore {
    /// Wrap an already migrated storage handle.
    pub fn new(storage: Arc<dyn PartStorage>, options: CacheOptions) -> Self {
        Self {
            storage,
            ttl_secs: i64::try_from(options.ttl.as_secs()).unwrap_or(i64::MAX),
            operation_timeout: options.operation_timeout,
            clock: options.clock,
            key_locks: DashMap::new(),
        }
    }

    /// Current time according to the store's clock, unix seconds.
    pub fn now(&self) -> i64 {
        self.clock.now_unix()
    }

    /// Expiry assigned to a part registered or reused at `now`.
    fn expiry_from(&self, now: i64) -> i64 {
        now.saturating_add(self.ttl_secs)
    }

    /// Run one storage call under the operation timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = MetadataResult<T>>,
    ) -> MetadataResult<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation = operation,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Part cache storage operation timed out"
                );
                Err(MetadataError::StorageUnavailable(format!(
                    "{operation} timed out after {:?}",
                    self.operation_timeout
                )))
            }
        }
    }

    /// Insert a record as given. No dedup check is performed.
    pub async fn add(&self, part: NewPart) -> MetadataResult<i64> {
        let now = self.now();
        part.validate(now)?;

        let id = self
            .bounded("insert", self.storage.insert(&part, now))
            .await?;
        tracing::debug!(
            id = id,
            key = %part.key(),
            cid = part.cid,
            expire_time = part.expire_time,
            "Inserted upload part"
        );
        Ok(id)
    }

    /// Register a freshly uploaded part, or refresh the live record for its key.
    ///
    /// When a live record exists its expiry is pushed to `now + ttl` and its
    /// cid and filename are left untouched; otherwise a new record is inserted
    /// from the candidate. Returns the resulting live record.
    pub async fn add_or_update(&self, candidate: PartCandidate) -> MetadataResult<UploadPartRow> {
        candidate.validate()?;
        let key = candidate.key();

        let entry = KeyLockEntry::acquire(&self.key_locks, key.clone());
        let _guard = entry.mutex().lock().await;
        self.add_or_update_locked(&key, candidate).await
    }

    async fn add_or_update_locked(
        &self,
        key: &PartKey,
        candidate: PartCandidate,
    ) -> MetadataResult<UploadPartRow> {
        let now = self.now();
        let expire_time = self.expiry_from(now);

        if let Some(mut part) = self.find_valid_at(key, now).await? {
            let refreshed = self
                .bounded("update_by_id", self.storage.update_by_id(part.id, expire_time))
                .await?;
            if refreshed {
                tracing::debug!(
                    id = part.id,
                    key = %key,
                    cid = part.cid,
                    expire_time = expire_time,
                    "Refreshed upload part"
                );
                part.expire_time = expire_time;
                return Ok(part);
            }
            // Purged between lookup and update; register it afresh.
            tracing::debug!(id = part.id, key = %key, "Upload part vanished before refresh");
        }

        let part = candidate.with_expiry(expire_time);
        let id = self
            .bounded("insert", self.storage.insert(&part, now))
            .await?;
        tracing::debug!(
            id = id,
            key = %key,
            cid = part.cid,
            expire_time = expire_time,
            "Registered upload part"
        );

        Ok(UploadPartRow {
            id,
            created_at: now,
            file_hash: part.hash,
            file_size: part.size,
            cid: part.cid,
            filename: part.filename,
            expire_time,
        })
    }

    /// Every record for the key, expired or not. For diagnostics only.
    pub async fn find_by_hash(
        &self,
        file_hash: &str,
        file_size: i64,
    ) -> MetadataResult<Vec<UploadPartRow>> {
        let filter = PartFilter::Key(PartKey::new(file_hash, file_size));
        self.bounded("query_many", self.storage.query_many(&filter))
            .await
    }

    /// The live record for the key, if any.
    ///
    /// A record is live while `expire_time > now`. When several are live the
    /// one with the latest expiry wins, then the highest id.
    pub async fn find_valid_part_by_hash(
        &self,
        file_hash: &str,
        file_size: i64,
    ) -> MetadataResult<Option<UploadPartRow>> {
        let key = PartKey::new(file_hash, file_size);
        let part = self.find_valid_at(&key, self.now()).await?;
        match &part {
            Some(part) => {
                tracing::debug!(key = %key, id = part.id, cid = part.cid, "Upload part cache hit")
            }
            None => tracing::debug!(key = %key, "Upload part cache miss"),
        }
        Ok(part)
    }

    async fn find_valid_at(
        &self,
        key: &PartKey,
        now: i64,
    ) -> MetadataResult<Option<UploadPartRow>> {
        let filter = PartFilter::ValidKey {
            key: key.clone(),
            now,
        };
        self.bounded("query_one", self.storage.query_one(&filter))
            .await
    }

    /// Delete every record with `expire_time <= now`. Returns the number removed.
    pub async fn remove_expired(&self) -> MetadataResult<u64> {
        let now = self.now();
        let removed = self
            .bounded(
                "delete_where",
                self.storage.delete_where(&PartFilter::ExpiredAt(now)),
            )
            .await?;
        tracing::debug!(removed = removed, now = now, "Removed expired upload parts");
        Ok(removed)
    }

    /// Delete every record whose cid is in `cids`. An empty slice is a no-op.
    pub async fn remove_by_remote_ids(&self, cids: &[i64]) -> MetadataResult<u64> {
        if cids.is_empty() {
            return Ok(0);
        }
        let unique: Vec<i64> = cids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let requested = unique.len();
        let removed = self
            .bounded(
                "delete_where",
                self.storage.delete_where(&PartFilter::RemoteIds(unique)),
            )
            .await?;
        tracing::debug!(
            removed = removed,
            cids = requested,
            "Removed upload parts for deleted remote chunks"
        );
        Ok(removed)
    }

    /// Count rows by validity. Scans the table; meant for operators, not hot paths.
    pub async fn stats(&self) -> MetadataResult<CacheStats> {
        let now = self.now();
        let rows = self
            .bounded("query_many", self.storage.query_many(&PartFilter::All))
            .await?;

        let mut stats = CacheStats::default();
        for row in &rows {
            stats.total += 1;
            if row.is_valid_at(now) {
                stats.live += 1;
                stats.live_bytes = stats.live_bytes.saturating_add(row.file_size);
            } else {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }

    /// Check that the backing store is reachable.
    pub async fn health_check(&self) -> MetadataResult<()> {
        self.bounded("health_check", self.storage.health_check())
            .await
    }

    /// Release the storage handle. Later operations fail with `StorageUnavailable`.
    pub async fn close(&self) {
        self.storage.close().await;
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.key_locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use partcache_core::ManualClock;

    async fn cache_at(now: i64) -> (ChunkCacheStore, Arc<ManualClock>) {
        let storage = SqliteStore::new(":memory:", None).await.unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let options = CacheOptions::default().with_clock(clock.clone());
        (ChunkCacheStore::new(Arc::new(storage), options), clock)
    }

    #[tokio::test]
    async fn test_key_locks_are_pruned() {
        let (cache, _clock) = cache_at(1_000).await;
        cache
            .add_or_update(PartCandidate::new("abc", 100, 1, "a.mp4"))
            .await
            .unwrap();
        assert_eq!(cache.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_lock_entry() {
        let (cache, _clock) = cache_at(1_000).await;
        let cache = Arc::new(cache);

        let holder = KeyLockEntry::acquire(&cache.key_locks, PartKey::new("abc", 100));
        let guard = holder.mutex().lock().await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .add_or_update(PartCandidate::new("abc", 100, 1, "a.mp4"))
                    .await
            })
        };
        for _ in 0..100 {
            if Arc::strong_count(holder.mutex()) == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(holder.mutex()), 3, "waiter never parked");

        // Release the key, then cancel the waiter before it runs again.
        drop(guard);
        drop(holder);
        assert_eq!(cache.lock_count(), 1);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(cache.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_expiry_saturates() {
        let storage = SqliteStore::new(":memory:", None).await.unwrap();
        let options = CacheOptions {
            ttl: Duration::from_secs(u64::MAX),
            ..CacheOptions::default()
        }
        .with_clock(Arc::new(ManualClock::new(1_000)));
        let cache = ChunkCacheStore::new(Arc::new(storage), options);
        assert_eq!(cache.expiry_from(1_000), i64::MAX);
    }

    #[tokio::test]
    async fn test_stats_splits_live_and_expired() {
        let (cache, clock) = cache_at(1_000).await;
        cache
            .add(PartCandidate::new("a", 10, 1, "a.mp4").with_expiry(1_100))
            .await
            .unwrap();
        cache
            .add(PartCandidate::new("b", 20, 2, "b.mp4").with_expiry(2_000))
            .await
            .unwrap();
        clock.set(1_100);

        let stats = cache.stats().await.unwrap();
        assert_eq!(
            stats,
            CacheStats {
                total: 2,
                live: 1,
                expired: 1,
                live_bytes: 20,
            }
        );
    }

    #[test]
    fn test_options_debug_omits_clock() {
        let rendered = format!("{:?}", CacheOptions::default());
        assert!(rendered.contains("ttl"));
        assert!(!rendered.contains("clock"));
    }
}
