//! Storage doubles for failure-path tests.

use async_trait::async_trait;
use partcache_core::NewPart;
use partcache_metadata::{MetadataError, MetadataResult, PartFilter, PartStorage, UploadPartRow};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Storage whose every call stalls for `delay` before answering as empty.
#[allow(dead_code)]
pub struct StallingStorage {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

#[allow(dead_code)]
impl StallingStorage {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    async fn stall(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl PartStorage for StallingStorage {
    async fn insert(&self, _part: &NewPart, _created_at: i64) -> MetadataResult<i64> {
        self.stall().await;
        Ok(1)
    }

    async fn update_by_id(&self, _id: i64, _expire_time: i64) -> MetadataResult<bool> {
        self.stall().await;
        Ok(true)
    }

    async fn query_one(&self, _filter: &PartFilter) -> MetadataResult<Option<UploadPartRow>> {
        self.stall().await;
        Ok(None)
    }

    async fn query_many(&self, _filter: &PartFilter) -> MetadataResult<Vec<UploadPartRow>> {
        self.stall().await;
        Ok(Vec::new())
    }

    async fn delete_where(&self, _filter: &PartFilter) -> MetadataResult<u64> {
        self.stall().await;
        Ok(0)
    }

    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.stall().await;
        Ok(())
    }

    async fn close(&self) {}
}

/// Wraps a real storage and fails the first `failures` deletes as unavailable.
#[allow(dead_code)]
pub struct FlakyDeleteStorage {
    inner: Arc<dyn PartStorage>,
    remaining_failures: AtomicUsize,
    pub deletes: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyDeleteStorage {
    pub fn new(inner: Arc<dyn PartStorage>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
            deletes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PartStorage for FlakyDeleteStorage {
    async fn insert(&self, part: &NewPart, created_at: i64) -> MetadataResult<i64> {
        self.inner.insert(part, created_at).await
    }

    async fn update_by_id(&self, id: i64, expire_time: i64) -> MetadataResult<bool> {
        self.inner.update_by_id(id, expire_time).await
    }

    async fn query_one(&self, filter: &PartFilter) -> MetadataResult<Option<UploadPartRow>> {
        self.inner.query_one(filter).await
    }

    async fn query_many(&self, filter: &PartFilter) -> MetadataResult<Vec<UploadPartRow>> {
        self.inner.query_many(filter).await
    }

    async fn delete_where(&self, filter: &PartFilter) -> MetadataResult<u64> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MetadataError::StorageUnavailable(
                "injected failure".to_string(),
            ));
        }
        self.inner.delete_where(filter).await
    }

    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}
