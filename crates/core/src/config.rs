//! Configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Backing store configuration for the part cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database file (or `:memory:`).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Busy timeout in seconds while waiting on the database lock.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer PARTCACHE_METADATA__PASSWORD over storing it in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds, enforced server-side.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(crate::DEFAULT_OPERATION_TIMEOUT_SECS)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/partcache.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<()> {
        match self {
            MetadataConfig::Sqlite { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::InvalidConfig(
                        "sqlite config requires a non-empty 'path'".to_string(),
                    ));
                }
                Ok(())
            }
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(Error::InvalidConfig(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                )),
                (None, Some(_), None) => Err(Error::InvalidConfig(
                    "postgres config requires 'database' when using individual fields".to_string(),
                )),
            },
        }
    }
}

/// Part cache behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a registered or reused part stays valid, in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Upper bound for a single storage operation, in seconds.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_ttl_secs() -> u64 {
    crate::DEFAULT_PART_TTL_SECS
}

fn default_operation_timeout_secs() -> u64 {
    crate::DEFAULT_OPERATION_TIMEOUT_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "cache.ttl_secs must be greater than 0".to_string(),
            ));
        }
        // Expiry is stored as signed seconds; keep now + ttl representable.
        if i64::try_from(self.ttl_secs).is_err() {
            return Err(Error::InvalidConfig(format!(
                "cache.ttl_secs {} is out of range",
                self.ttl_secs
            )));
        }
        if self.operation_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "cache.operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Periodic expiry sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the periodic sweep runs. A one-shot sweep ignores this.
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    crate::DEFAULT_SWEEP_INTERVAL_SECS
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SweepConfig {
    /// Sweep interval, falling back to the default when configured as zero
    /// (a zero period would make `tokio::time::interval` panic).
    pub fn interval(&self) -> Duration {
        if self.interval_secs == 0 {
            Duration::from_secs(default_sweep_interval_secs())
        } else {
            Duration::from_secs(self.interval_secs)
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration backed by an SQLite file at `path`.
    ///
    /// **For testing only.**
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            metadata: MetadataConfig::Sqlite {
                path: path.into(),
                query_timeout_secs: Some(5),
            },
            cache: CacheConfig::default(),
            sweep: SweepConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.metadata.validate()?;
        self.cache.validate()
    }
}
