//! Operator CLI for the upload part cache.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use partcache_core::PartCandidate;
use partcache_core::config::AppConfig;
use partcache_metadata::{ChunkCacheStore, spawn_sweep_task};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "partcachectl")]
#[command(about = "Inspect and maintain the upload part cache")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "PARTCACHE_CONFIG",
        default_value = "config/partcache.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the live record for a part, or null
    Lookup {
        /// Content fingerprint
        hash: String,
        /// Part size in bytes
        size: i64,
    },
    /// Print every record for a part, expired ones included
    List { hash: String, size: i64 },
    /// Insert a record without dedup
    Add {
        hash: String,
        size: i64,
        /// Remote chunk id
        cid: i64,
        /// Remote filename
        filename: String,
        /// Seconds until the record expires (default: configured TTL)
        #[arg(long)]
        expires_in: Option<u64>,
    },
    /// Register an uploaded part, or refresh its live record
    Register {
        hash: String,
        size: i64,
        cid: i64,
        filename: String,
    },
    /// Remove every record that points at the given remote chunk ids
    Purge {
        #[arg(num_args = 0.., allow_negative_numbers = true)]
        cids: Vec<i64>,
    },
    /// Remove expired records
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl-C.
        /// Exits immediately when `sweep.enabled` is false.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// Record counts
    Stats,
    /// Check that the database is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.config)?;
    let cache = Arc::new(
        partcache_metadata::open_cache(&config)
            .await
            .context("failed to open part cache")?,
    );

    let result = run(cli.command, &cache, &config).await;
    cache.close().await;
    result
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if Path::new(path).exists() {
        tracing::debug!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PARTCACHE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(command: Commands, cache: &Arc<ChunkCacheStore>, config: &AppConfig) -> Result<()> {
    match command {
        Commands::Lookup { hash, size } => {
            let part = cache
                .find_valid_part_by_hash(&hash, size)
                .await
                .context("lookup failed")?;
            print_json(&part)
        }
        Commands::List { hash, size } => {
            let parts = cache
                .find_by_hash(&hash, size)
                .await
                .context("list failed")?;
            print_json(&parts)
        }
        Commands::Add {
            hash,
            size,
            cid,
            filename,
            expires_in,
        } => {
            let ttl = expires_in.unwrap_or(config.cache.ttl_secs);
            let ttl = i64::try_from(ttl).context("--expires-in is out of range")?;
            let part = PartCandidate::new(hash, size, cid, filename)
                .with_expiry(cache.now().saturating_add(ttl));
            let id = cache.add(part).await.context("add failed")?;
            print_json(&serde_json::json!({ "id": id }))
        }
        Commands::Register {
            hash,
            size,
            cid,
            filename,
        } => {
            let part = cache
                .add_or_update(PartCandidate::new(hash, size, cid, filename))
                .await
                .context("register failed")?;
            print_json(&part)
        }
        Commands::Purge { cids } => {
            let removed = cache
                .remove_by_remote_ids(&cids)
                .await
                .context("purge failed")?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::Sweep { watch: false } => {
            let removed = cache.remove_expired().await.context("sweep failed")?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::Sweep { watch: true } => {
            if !config.sweep.enabled {
                tracing::info!("Expiry sweep disabled (sweep.enabled = false)");
                return Ok(());
            }
            let interval = config.sweep.interval();
            tracing::info!(interval_secs = interval.as_secs(), "Starting expiry sweep");
            let handle = spawn_sweep_task(cache.clone(), interval);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            tracing::info!("Stopping expiry sweep");
            handle.abort();
            Ok(())
        }
        Commands::Stats => {
            let stats = cache.stats().await.context("stats failed")?;
            print_json(&stats)
        }
        Commands::Health => {
            cache.health_check().await.context("health check failed")?;
            print_json(&serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
            }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
