//! SQLite-based part storage.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{UPLOAD_PART_INDEXES, UploadPartRow};
use crate::repos::parts::{PartFilter, PartStorage, Placeholder, bind_values, preferred};
use async_trait::async_trait;
use partcache_core::NewPart;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-based part storage.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `:memory:` opens a private in-memory database that lives as long as the
    /// store. `query_timeout_secs` bounds both lock waits and pool acquisition.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let timeout = Duration::from_secs(
            query_timeout_secs.unwrap_or(partcache_core::DEFAULT_OPERATION_TIMEOUT_SECS),
        );
        let in_memory = path == Path::new(":memory:");

        let opts = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        let opts = opts
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(timeout);

        // SQLite permits one writer at a time; a single pooled connection
        // avoids "database is locked" churn between our own workers.
        let mut pool_opts = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(timeout);
        if in_memory {
            // The database disappears with its last connection.
            pool_opts = pool_opts
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "Opened SQLite part storage");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl PartStorage for SqliteStore {
    async fn insert(&self, part: &NewPart, created_at: i64) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO upload_parts (created_at, file_hash, file_size, cid, filename, expire_time)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(created_at)
        .bind(&part.hash)
        .bind(part.size)
        .bind(part.cid)
        .bind(&part.filename)
        .bind(part.expire_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_by_id(&self, id: i64, expire_time: i64) -> MetadataResult<bool> {
        let result = sqlx::query("UPDATE upload_parts SET expire_time = ? WHERE id = ?")
            .bind(expire_time)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_one(&self, filter: &PartFilter) -> MetadataResult<Option<UploadPartRow>> {
        let mut winners = Vec::new();
        for predicate in filter.render(Placeholder::Question) {
            let sql = format!(
                "SELECT * FROM upload_parts {} ORDER BY expire_time DESC, id DESC LIMIT 1",
                predicate.clause
            );
            let row = bind_values!(sqlx::query_as::<_, UploadPartRow>(&sql), &predicate.binds)
                .fetch_optional(&self.pool)
                .await?;
            winners.extend(row);
        }
        Ok(preferred(winners))
    }

    async fn query_many(&self, filter: &PartFilter) -> MetadataResult<Vec<UploadPartRow>> {
        let mut rows = Vec::new();
        for predicate in filter.render(Placeholder::Question) {
            let sql = format!(
                "SELECT * FROM upload_parts {} ORDER BY id ASC",
                predicate.clause
            );
            let batch = bind_values!(sqlx::query_as::<_, UploadPartRow>(&sql), &predicate.binds)
                .fetch_all(&self.pool)
                .await?;
            rows.extend(batch);
        }
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    async fn delete_where(&self, filter: &PartFilter) -> MetadataResult<u64> {
        if matches!(filter, PartFilter::All) {
            return Err(MetadataError::Internal(
                "refusing to delete upload parts without a filter".to_string(),
            ));
        }

        let predicates = filter.render(Placeholder::Question);
        if predicates.is_empty() {
            return Ok(0);
        }

        // All batches commit together or not at all.
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for predicate in &predicates {
            let sql = format!("DELETE FROM upload_parts {}", predicate.clause);
            let result = bind_values!(sqlx::query(&sql), &predicate.binds)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        for (name, sql) in UPLOAD_PART_INDEXES {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND tbl_name = 'upload_parts' AND name = ?)",
            )
            .bind(*name)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                sqlx::query(sql).execute(&self.pool).await?;
                tracing::info!(index = %name, "Created upload_parts index");
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS upload_parts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)),
    file_hash TEXT NOT NULL,
    file_size INTEGER NOT NULL CHECK (file_size >= 0),
    cid INTEGER NOT NULL,
    filename TEXT NOT NULL,
    expire_time INTEGER NOT NULL
) STRICT
"#;
