//! Persistent cache of uploaded parts for resumable uploads.
//!
//! This crate provides:
//! - The narrow storage interface over the `upload_parts` table
//! - SQLite and PostgreSQL implementations of it
//! - [`ChunkCacheStore`], the dedup/TTL logic used by upload orchestrators
//! - A periodic expiry sweep

pub mod cache;
pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;
pub mod sweep;

pub use cache::{CacheOptions, CacheStats, ChunkCacheStore};
pub use error::{MetadataError, MetadataResult};
pub use models::UploadPartRow;
pub use postgres::PostgresStore;
pub use repos::{PartFilter, PartStorage};
pub use store::SqliteStore;
pub use sweep::spawn_sweep_task;

use partcache_core::config::{AppConfig, MetadataConfig};
use std::sync::Arc;

/// Create a part storage backend from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn PartStorage>> {
    config.validate()?;
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn PartStorage>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn PartStorage>)
        }
    }
}

/// Open the configured backend and wrap it in a [`ChunkCacheStore`].
pub async fn open_cache(config: &AppConfig) -> MetadataResult<ChunkCacheStore> {
    config.validate()?;
    let storage = from_config(&config.metadata).await?;
    Ok(ChunkCacheStore::new(
        storage,
        CacheOptions::from_config(&config.cache),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("parts.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_open_cache_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_testing(temp_dir.path().join("parts.db"));

        let cache = open_cache(&config).await.unwrap();
        let row = cache
            .add_or_update(partcache_core::PartCandidate::new("abc", 100, 7, "a.mp4"))
            .await
            .unwrap();
        let found = cache.find_valid_part_by_hash("abc", 100).await.unwrap();
        assert_eq!(found, Some(row));
        cache.close().await;
    }

    #[tokio::test]
    async fn test_from_config_rejects_incomplete_postgres() {
        let config = MetadataConfig::Postgres {
            url: None,
            host: Some("localhost".to_string()),
            port: None,
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 1,
            statement_timeout_ms: None,
        };
        let err = match from_config(&config).await {
            Ok(_) => panic!("expected config error"),
            Err(e) => e,
        };
        assert!(matches!(err, MetadataError::Config(_)));
    }
}
