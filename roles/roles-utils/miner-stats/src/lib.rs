//! Status scraping, caching and history for small solo-mining devices.
//!
//! This crate holds everything behind the miner dashboard except the HTTP
//! surface: extracting readings from a miner's status page, caching them
//! against dashboard polling, resolving pool API endpoints, and persisting
//! readings to SQLite for history queries.

pub mod cache;
pub mod extractor;
pub mod fetch;
pub mod history;
pub mod pool;
pub mod storage;
pub mod types;
pub mod units;

pub use cache::{CachedReading, FreshnessCache};
pub use extractor::extract_status;
pub use fetch::{FetchError, HttpFetcher};
pub use history::HistoryAggregator;
pub use pool::resolve_pool_url;
pub use storage::{ReadingStore, SqliteStorage, StorageError};
pub use types::{
    unix_timestamp, Clock, FleetPoint, HistoryPoint, MinerHistory, MinerReading, MinerStatus,
    StatusReading, StoreStatistics, SystemClock,
};
