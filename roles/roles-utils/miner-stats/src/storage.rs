//! SQLite storage backend for miner reading history.

use crate::types::{HistoryPoint, MinerReading, MinerStatus, StoreStatistics, StoredReading};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage abstraction for miner readings.
///
/// Timestamps are Unix seconds. Readings saved within the same second share a
/// timestamp.
#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    /// Upsert the miner's metadata and append one reading, atomically.
    async fn append_reading(
        &self,
        device_id: &str,
        device_name: Option<&str>,
        reading: &MinerReading,
        timestamp: u64,
    ) -> Result<()>;

    /// Readings for one miner at or after `since`, oldest first.
    async fn query_readings(&self, device_id: &str, since: u64) -> Result<Vec<StoredReading>>;

    /// Readings for every miner at or after `since`, oldest first.
    async fn query_all_readings(&self, since: u64) -> Result<Vec<StoredReading>>;

    /// Miners with at least one reading at or after `since`.
    async fn query_device_ids(&self, since: u64) -> Result<BTreeSet<String>>;

    /// Delete readings strictly older than `cutoff`. Returns the number removed.
    async fn delete_readings_older_than(&self, cutoff: u64) -> Result<u64>;

    async fn statistics(&self) -> Result<StoreStatistics>;
}

/// SQLite-backed storage implementation.
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
    path: PathBuf,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directories if they don't exist
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connection_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connection_options)
            .await?;

        let storage = Self {
            pool,
            path: db_path.to_path_buf(),
        };
        storage.init_schema().await?;

        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS miners (
                device_id TEXT PRIMARY KEY,
                name TEXT,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS miner_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                device_name TEXT,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL,
                hashrate REAL,
                shares INTEGER,
                accepted_shares INTEGER,
                best_difficulty REAL,
                temperature REAL,
                uptime INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_device_timestamp
            ON miner_readings(device_id, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_timestamp
            ON miner_readings(timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_reading(row: &SqliteRow) -> Result<StoredReading> {
        let status: Option<String> = row.try_get("status")?;

        Ok(StoredReading {
            device_id: row.try_get("device_id")?,
            device_name: row.try_get("device_name")?,
            point: HistoryPoint {
                timestamp: row.try_get::<i64, _>("timestamp")? as u64,
                status: MinerStatus::from_db(status.as_deref()),
                hashrate: row.try_get("hashrate")?,
                shares: row.try_get::<Option<i64>, _>("shares")?.map(|v| v as u64),
                accepted_shares: row
                    .try_get::<Option<i64>, _>("accepted_shares")?
                    .map(|v| v as u64),
                best_difficulty: row.try_get("best_difficulty")?,
                temperature: row.try_get("temperature")?,
                uptime: row.try_get::<Option<i64>, _>("uptime")?.map(|v| v as u64),
            },
        })
    }
}

#[async_trait::async_trait]
impl ReadingStore for SqliteStorage {
    async fn append_reading(
        &self,
        device_id: &str,
        device_name: Option<&str>,
        reading: &MinerReading,
        timestamp: u64,
    ) -> Result<()> {
        if device_id.is_empty() {
            return Err(StorageError::InvalidArgument(
                "device id must not be empty".to_string(),
            ));
        }

        tracing::debug!(
            "Storing reading: device_id={}, timestamp={}, status={}, hashrate={:?}",
            device_id,
            timestamp,
            reading.status,
            reading.stats.hashrate
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO miners (device_id, name, first_seen, last_seen)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(device_id) DO UPDATE SET
                name = COALESCE(excluded.name, miners.name),
                last_seen = excluded.last_seen
            "#,
        )
        .bind(device_id)
        .bind(device_name)
        .bind(timestamp as i64)
        .bind(timestamp as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO miner_readings
            (device_id, device_name, timestamp, status, hashrate, shares,
             accepted_shares, best_difficulty, temperature, uptime)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(device_name)
        .bind(timestamp as i64)
        .bind(reading.status.as_str())
        .bind(reading.stats.hashrate)
        .bind(reading.stats.shares.map(|v| v as i64))
        .bind(reading.stats.accepted_shares.map(|v| v as i64))
        .bind(reading.stats.best_diff)
        .bind(reading.stats.temp)
        .bind(reading.uptime.map(|v| v as i64))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query_readings(&self, device_id: &str, since: u64) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query(
            r#"
            SELECT device_id, device_name, timestamp, status, hashrate, shares,
                   accepted_shares, best_difficulty, temperature, uptime
            FROM miner_readings
            WHERE device_id = ? AND timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(device_id)
        .bind(since as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_reading).collect()
    }

    async fn query_all_readings(&self, since: u64) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query(
            r#"
            SELECT device_id, device_name, timestamp, status, hashrate, shares,
                   accepted_shares, best_difficulty, temperature, uptime
            FROM miner_readings
            WHERE timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(since as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_reading).collect()
    }

    async fn query_device_ids(&self, since: u64) -> Result<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT device_id
            FROM miner_readings
            WHERE timestamp >= ?
            "#,
        )
        .bind(since as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(device_id,)| device_id).collect())
    }

    async fn delete_readings_older_than(&self, cutoff: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM miner_readings WHERE timestamp < ?")
            .bind(cutoff as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn statistics(&self) -> Result<StoreStatistics> {
        let (total_records, oldest, newest): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM miner_readings",
        )
        .fetch_one(&self.pool)
        .await?;

        let (total_miners,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM miners")
            .fetch_one(&self.pool)
            .await?;

        let file_size = tokio::fs::metadata(&self.path)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        let file_size_mb = (file_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;

        Ok(StoreStatistics {
            total_records: total_records as u64,
            total_miners: total_miners as u64,
            oldest_record: oldest.map(|ts| ts as u64),
            newest_record: newest.map(|ts| ts as u64),
            file_size_mb,
        })
    }
}
