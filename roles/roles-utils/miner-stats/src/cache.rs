//! Time-boxed cache between dashboard polling and miner status pages.
//!
//! Embedded miners cannot keep up with every dashboard tab polling them every
//! few seconds, so readings are kept per fetch target for a short TTL. When a
//! refresh fails, the last good reading is served instead of the error for as
//! long as one exists.
//!
//! Each target has its own async lock that is held across the upstream fetch.
//! Concurrent requests for the same slow device wait for the in-flight fetch
//! and then get its result from the cache, while other targets proceed
//! independently.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{debug, warn};

use crate::fetch::FetchError;
use crate::types::{Clock, StatusReading, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry {
    reading: StatusReading,
    fetched_at: Duration,
}

type Slot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

/// Result of a cached fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedReading {
    pub reading: StatusReading,
    /// True when the reading did not come from a fetch made for this call,
    /// either because it was still fresh or because the fetch failed.
    pub from_cache: bool,
}

pub struct FreshnessCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Slot>>,
}

impl FreshnessCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of targets that have been requested at least once.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, target: &str) -> Slot {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.entry(target.to_string()).or_default().clone()
    }

    /// Return the reading for `target`, fetching it only when the cached one
    /// is older than the TTL.
    ///
    /// A failed fetch falls back to the cached reading regardless of its age.
    /// The error is only returned when the target has never been fetched
    /// successfully.
    pub async fn fetch_with_cache<F, Fut>(
        &self,
        target: &str,
        fetcher: F,
    ) -> Result<CachedReading, FetchError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<StatusReading, FetchError>>,
    {
        let slot = self.slot(target);
        let mut entry = slot.lock().await;
        let now = self.clock.now();

        if let Some(cached) = entry.as_ref() {
            if now.saturating_sub(cached.fetched_at) < self.ttl {
                debug!("Cache hit for {}", target);
                return Ok(CachedReading {
                    reading: cached.reading.clone(),
                    from_cache: true,
                });
            }
        }

        match fetcher(target.to_string()).await {
            Ok(reading) => {
                // Never move an entry's timestamp backwards
                let fetched_at = entry
                    .as_ref()
                    .map_or(now, |previous| previous.fetched_at.max(now));
                *entry = Some(CacheEntry {
                    reading: reading.clone(),
                    fetched_at,
                });
                Ok(CachedReading {
                    reading,
                    from_cache: false,
                })
            }
            Err(e) => {
                let error: String = e.to_string().chars().take(80).collect();
                match entry.as_ref() {
                    Some(cached) => {
                        let age = now.saturating_sub(cached.fetched_at).as_secs();
                        warn!(
                            "Using stale cache ({}s old) for {} - Error: {}",
                            age, target, error
                        );
                        Ok(CachedReading {
                            reading: cached.reading.clone(),
                            from_cache: true,
                        })
                    }
                    None => {
                        warn!("No cache available for {} - Error: {}", target, error);
                        Err(e)
                    }
                }
            }
        }
    }
}
