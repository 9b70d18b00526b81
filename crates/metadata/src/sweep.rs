//! Periodic removal of expired upload parts.

use crate::cache::ChunkCacheStore;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a background task that calls [`ChunkCacheStore::remove_expired`] on a
/// fixed interval. The first sweep runs immediately.
///
/// Failures are logged and the task keeps running; abort the returned handle
/// to stop it. A zero interval falls back to the default sweep interval.
pub fn spawn_sweep_task(
    cache: Arc<ChunkCacheStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = if interval.is_zero() {
        Duration::from_secs(partcache_core::DEFAULT_SWEEP_INTERVAL_SECS)
    } else {
        interval
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match cache.remove_expired().await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed = removed, "Expiry sweep removed upload parts");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Expiry sweep failed");
                }
            }
        }
    })
}
