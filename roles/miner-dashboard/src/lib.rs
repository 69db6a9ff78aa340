//! HTTP service behind the miner dashboard.
//!
//! Serves the dashboard's static assets, proxies miner status pages through
//! a short-lived cache, relays pool statistics, and records readings for the
//! history charts.

pub mod api;
pub mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miner_stats::{
    storage, unix_timestamp, FreshnessCache, HistoryAggregator, HttpFetcher, ReadingStore,
    SqliteStorage,
};

use crate::config::Config;

/// Everything a request handler needs, constructed once at startup.
pub struct DashboardState {
    pub cache: FreshnessCache,
    pub fetcher: HttpFetcher,
    pub store: Arc<dyn ReadingStore>,
    pub history: HistoryAggregator,
    pub default_pool: String,
    pub static_dir: PathBuf,
}

impl DashboardState {
    pub fn new(
        store: Arc<dyn ReadingStore>,
        fetcher: HttpFetcher,
        cache_ttl: Duration,
        default_pool: String,
        static_dir: PathBuf,
    ) -> Self {
        Self {
            cache: FreshnessCache::new(cache_ttl),
            fetcher,
            history: HistoryAggregator::new(store.clone()),
            store,
            default_pool,
            static_dir,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Arc::new(SqliteStorage::new(&config.db_path).await?);
        let fetcher = HttpFetcher::new(config.request_timeout(), config.pool_idle_timeout())?;

        Ok(Self::new(
            store,
            fetcher,
            config.cache_ttl(),
            config.default_pool.clone(),
            config.static_dir.clone(),
        ))
    }

    /// Delete history older than `retention_days`. Returns the number of
    /// readings removed.
    pub async fn sweep_expired(&self, retention_days: u64) -> storage::Result<u64> {
        let cutoff = unix_timestamp().saturating_sub(retention_days.saturating_mul(24 * 3600));
        self.store.delete_readings_older_than(cutoff).await
    }
}
