//! Part cache test wrappers for each backend.

use super::fixtures::START;
use partcache_core::ManualClock;
use partcache_metadata::{
    CacheOptions, ChunkCacheStore, MetadataError, MetadataResult, PartStorage, PostgresStore,
    SqliteStore,
};
use std::future::Future;
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A cache over a real backend, driven by a manual clock starting at [`START`].
#[allow(dead_code)]
pub struct TestCache {
    pub cache: Arc<ChunkCacheStore>,
    pub storage: Arc<dyn PartStorage>,
    pub clock: Arc<ManualClock>,
    _temp_dir: Option<TempDir>,
}

#[allow(dead_code)]
impl TestCache {
    /// SQLite database in a temporary directory.
    pub async fn sqlite() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("parts.db"), Some(5)).await?;
        Ok(Self::wrap(Arc::new(store), Some(temp_dir)))
    }

    /// Private in-memory SQLite database (faster for tests).
    pub async fn in_memory() -> MetadataResult<Self> {
        let store = SqliteStore::new(":memory:", Some(5)).await?;
        Ok(Self::wrap(Arc::new(store), None))
    }

    pub fn wrap(storage: Arc<dyn PartStorage>, temp_dir: Option<TempDir>) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let options = CacheOptions::default().with_clock(clock.clone());
        Self {
            cache: Arc::new(ChunkCacheStore::new(storage.clone(), options)),
            storage,
            clock,
            _temp_dir: temp_dir,
        }
    }
}

/// PostgreSQL test cache that manages a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestCache {
    pub store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestCache {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
        let store = PostgresStore::from_url(&url, 5, Some(30_000)).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn test_cache(&self) -> TestCache {
        TestCache::wrap(self.store.clone(), None)
    }
}

/// Run a test against SQLite and, when Docker is available, PostgreSQL.
#[allow(dead_code)]
pub async fn run_cache_test_both<F, Fut>(test_fn: F)
where
    F: Fn(TestCache) -> Fut,
    Fut: Future<Output = ()>,
{
    let sqlite = TestCache::sqlite()
        .await
        .expect("Failed to create SQLite test cache");
    test_fn(sqlite).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestCache::new().await {
            Ok(postgres) => {
                test_fn(postgres.test_cache()).await;
            }
            Err(err) => {
                eprintln!("Skipping PostgreSQL part cache tests: {err}");
            }
        }
    }
}
