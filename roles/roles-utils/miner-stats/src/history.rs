//! Reconstruction of per-miner and fleet-wide history over a trailing window.
//!
//! History is returned exactly as stored. Intervals without readings produce
//! no points; nothing is interpolated or zero-filled.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::storage::{ReadingStore, Result};
use crate::types::{
    Clock, FleetPoint, HistoryPoint, MinerHistory, MinerStatus, StoredReading, SystemClock,
};

pub const DEFAULT_WINDOW_HOURS: u64 = 24;

pub struct HistoryAggregator {
    store: Arc<dyn ReadingStore>,
    clock: Arc<dyn Clock>,
}

impl HistoryAggregator {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn ReadingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Oldest timestamp included in a window of `window_hours`.
    fn window_start(&self, window_hours: u64) -> u64 {
        self.clock
            .now()
            .as_secs()
            .saturating_sub(window_hours.saturating_mul(3600))
    }

    /// Every reading of one miner inside the window, oldest first.
    pub async fn miner_history(
        &self,
        device_id: &str,
        window_hours: u64,
    ) -> Result<Vec<HistoryPoint>> {
        let since = self.window_start(window_hours);
        let rows = self.store.query_readings(device_id, since).await?;
        Ok(series(rows))
    }

    /// History of every miner that reported inside the window, keyed by
    /// device id.
    pub async fn all_miners_history(
        &self,
        window_hours: u64,
    ) -> Result<BTreeMap<String, MinerHistory>> {
        let since = self.window_start(window_hours);
        let mut miners = BTreeMap::new();

        for device_id in self.store.query_device_ids(since).await? {
            let rows = self.store.query_readings(&device_id, since).await?;
            let name = latest_name(&rows);
            miners.insert(
                device_id,
                MinerHistory {
                    name,
                    history: series(rows),
                },
            );
        }

        Ok(miners)
    }

    /// Fleet totals per exact timestamp, counting online readings only.
    pub async fn total_stats_history(&self, window_hours: u64) -> Result<Vec<FleetPoint>> {
        let since = self.window_start(window_hours);
        let rows = self.store.query_all_readings(since).await?;
        Ok(fleet_totals(&rows))
    }
}

/// Strip device metadata and order by timestamp. The sort is stable, so
/// readings sharing a timestamp keep their storage order.
pub fn series(rows: Vec<StoredReading>) -> Vec<HistoryPoint> {
    let mut points: Vec<HistoryPoint> = rows.into_iter().map(|row| row.point).collect();
    points.sort_by_key(|point| point.timestamp);
    points
}

/// Most recent non-empty display name among `rows`.
pub fn latest_name(rows: &[StoredReading]) -> Option<String> {
    rows.iter()
        .filter(|row| row.device_name.is_some())
        .max_by_key(|row| row.point.timestamp)
        .and_then(|row| row.device_name.clone())
}

/// Sum online readings that share an exact timestamp.
///
/// Missing hashrate or share values count as zero in the sums. A device is
/// counted once per timestamp even if it has several readings there.
pub fn fleet_totals(rows: &[StoredReading]) -> Vec<FleetPoint> {
    #[derive(Default)]
    struct Totals<'a> {
        hashrate: f64,
        shares: u64,
        devices: BTreeSet<&'a str>,
    }

    let mut buckets: BTreeMap<u64, Totals> = BTreeMap::new();

    for row in rows.iter().filter(|row| row.point.status == MinerStatus::Online) {
        let totals = buckets.entry(row.point.timestamp).or_default();
        totals.hashrate += row.point.hashrate.unwrap_or(0.0);
        totals.shares += row.point.accepted_shares.unwrap_or(0);
        totals.devices.insert(row.device_id.as_str());
    }

    buckets
        .into_iter()
        .map(|(timestamp, totals)| FleetPoint {
            timestamp,
            total_hashrate: totals.hashrate,
            total_shares: totals.shares,
            active_miners: totals.devices.len() as u64,
        })
        .collect()
}
