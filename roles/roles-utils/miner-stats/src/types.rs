//! Reading and history types shared by the scraper, the cache and the store.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Operational status of a miner as reported by the dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MinerStatus {
    Online,
    #[default]
    Offline,
    #[serde(other)]
    Unknown,
}

impl MinerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MinerStatus::Online => "online",
            MinerStatus::Offline => "offline",
            MinerStatus::Unknown => "unknown",
        }
    }

    /// Lenient conversion used when reading rows back from the store.
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("online") => MinerStatus::Online,
            Some("offline") => MinerStatus::Offline,
            _ => MinerStatus::Unknown,
        }
    }
}

impl fmt::Display for MinerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields scraped from a miner's status page.
///
/// Every field is optional: a page that could not be understood yields an
/// empty reading rather than zeros.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReading {
    /// Hashrate in hashes per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashrate: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_shares: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_diff: Option<f64>,

    /// Temperature in Celsius, one decimal place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
}

impl StatusReading {
    pub fn is_empty(&self) -> bool {
        *self == StatusReading::default()
    }
}

/// A reading as posted by the dashboard for persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MinerReading {
    #[serde(default, deserialize_with = "status_or_default")]
    pub status: MinerStatus,

    #[serde(flatten)]
    pub stats: StatusReading,

    /// Uptime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
}

/// An explicit `null` status is treated like a missing one.
fn status_or_default<'de, D>(deserializer: D) -> Result<MinerStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<MinerStatus>::deserialize(deserializer)?.unwrap_or_default())
}

/// One persisted reading, as returned by history queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPoint {
    /// Unix timestamp in seconds
    pub timestamp: u64,
    pub status: MinerStatus,
    pub hashrate: Option<f64>,
    pub shares: Option<u64>,
    pub accepted_shares: Option<u64>,
    pub best_difficulty: Option<f64>,
    pub temperature: Option<f64>,
    pub uptime: Option<u64>,
}

/// A history point together with the device it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub device_id: String,
    pub device_name: Option<String>,
    pub point: HistoryPoint,
}

/// Per-device history returned by the all-miners query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MinerHistory {
    pub name: Option<String>,
    pub history: Vec<HistoryPoint>,
}

/// Fleet-wide totals for one exact timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetPoint {
    pub timestamp: u64,
    pub total_hashrate: f64,
    pub total_shares: u64,
    pub active_miners: u64,
}

/// Summary of what the store currently holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreStatistics {
    pub total_records: u64,
    pub total_miners: u64,
    pub oldest_record: Option<u64>,
    pub newest_record: Option<u64>,
    pub file_size_mb: f64,
}

/// Get current Unix timestamp in seconds.
pub fn unix_timestamp() -> u64 {
    SystemClock.now().as_secs()
}

/// Source of the current time, so expiry and windows can be tested without
/// sleeping.
pub trait Clock: Send + Sync {
    /// Time elapsed since the Unix epoch.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reading_skips_missing_fields() {
        let reading = StatusReading {
            hashrate: Some(52_300.0),
            ..Default::default()
        };

        let json = serde_json::to_string(&reading).unwrap();
        assert_eq!(json, r#"{"hashrate":52300.0}"#);
    }

    #[test]
    fn test_miner_reading_from_dashboard_payload() {
        let payload = r#"{
            "status": "online",
            "hashrate": 48000.5,
            "shares": 12,
            "acceptedShares": 12,
            "bestDiff": 1.5,
            "temp": 41.2,
            "uptime": 3600
        }"#;

        let reading: MinerReading = serde_json::from_str(payload).unwrap();
        assert_eq!(reading.status, MinerStatus::Online);
        assert_eq!(reading.stats.accepted_shares, Some(12));
        assert_eq!(reading.stats.best_diff, Some(1.5));
        assert_eq!(reading.uptime, Some(3600));
    }

    #[test]
    fn test_missing_status_defaults_to_offline() {
        let reading: MinerReading = serde_json::from_str("{}").unwrap();
        assert_eq!(reading.status, MinerStatus::Offline);
        assert!(reading.stats.is_empty());
    }

    #[test]
    fn test_null_status_defaults_to_offline() {
        let reading: MinerReading =
            serde_json::from_str(r#"{"status":null,"hashrate":1.0}"#).unwrap();
        assert_eq!(reading.status, MinerStatus::Offline);
        assert_eq!(reading.stats.hashrate, Some(1.0));
    }

    #[test]
    fn test_unrecognized_status_is_unknown() {
        let reading: MinerReading = serde_json::from_str(r#"{"status":"rebooting"}"#).unwrap();
        assert_eq!(reading.status, MinerStatus::Unknown);
        assert_eq!(MinerStatus::from_db(Some("rebooting")), MinerStatus::Unknown);
        assert_eq!(MinerStatus::from_db(None), MinerStatus::Unknown);
    }
}
