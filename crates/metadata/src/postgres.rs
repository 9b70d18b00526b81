//! PostgreSQL-based part storage.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{UPLOAD_PART_INDEXES, UploadPartRow};
use crate::repos::parts::{PartFilter, PartStorage, Placeholder, bind_values, preferred};
use async_trait::async_trait;
use partcache_core::NewPart;
use partcache_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// PostgreSQL-based part storage.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, e.g. the password
    /// through an environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut pool_opts = PgPoolOptions::new().max_connections(max_connections.max(1));

        // Server-side cancellation of hung statements; surfaces as StorageUnavailable.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            pool_opts = pool_opts.acquire_timeout(Duration::from_millis(timeout_ms.max(1)));
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = pool_opts.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl PartStorage for PostgresStore {
    async fn insert(&self, part: &NewPart, created_at: i64) -> MetadataResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO upload_parts (created_at, file_hash, file_size, cid, filename, expire_time)
            VALUES ($1, $2, $3, $4, $5, $6)
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
        let result = sqlx::query("UPDATE upload_parts SET expire_time = $1 WHERE id = $2")
            .bind(expire_time)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_one(&self, filter: &PartFilter) -> MetadataResult<Option<UploadPartRow>> {
        let mut winners = Vec::new();
        for predicate in filter.render(Placeholder::Numbered) {
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
        for predicate in filter.render(Placeholder::Numbered) {
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

        let predicates = filter.render(Placeholder::Numbered);
        if predicates.is_empty() {
            return Ok(0);
        }

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
        sqlx::query(POSTGRES_SCHEMA).execute(&self.pool).await?;

        for (name, sql) in UPLOAD_PART_INDEXES {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM pg_indexes WHERE tablename = 'upload_parts' AND indexname = $1)",
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
