use crate::errors::{Error, Result};
use crate::metrics::APPEND_LATENCY_SECONDS;
use crate::model::{Reading, StoreStats, StoredReading};
use crate::sink::ReadingSink;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const MAX_APPEND_ATTEMPTS: u32 = 3;

/// Append-only time series of sensor readings.
///
/// Every operation is a single statement on a pooled connection, so
/// concurrent pollers never hold overlapping transactions and readers see a
/// consistent snapshot while appends continue.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct ReadingRow {
    id: i64,
    timestamp: String,
    sensor_id: i64,
    temperature: f64,
    humidity: f64,
    status: i64,
}

impl TryFrom<ReadingRow> for StoredReading {
    type Error = Error;

    fn try_from(row: ReadingRow) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptRow { id: row.id, reason };

        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| corrupt(format!("timestamp {:?}: {}", row.timestamp, e)))?
            .with_timezone(&Utc);
        let sensor_id = u32::try_from(row.sensor_id)
            .map_err(|_| corrupt(format!("sensor_id {}", row.sensor_id)))?;
        let status = u16::try_from(row.status).map_err(|_| corrupt(format!("status {}", row.status)))?;

        Ok(StoredReading {
            id: row.id,
            reading: Reading {
                timestamp,
                sensor_id,
                temperature: row.temperature,
                humidity: row.humidity,
                status,
            },
        })
    }
}

/// Fixed-width UTC text, so lexical order in SQLite is chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ReadingStore {
    /// Opens (creating if needed) the SQLite database at `path` and applies
    /// migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Migrations completed");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts one reading and returns its row id. Duplicate
    /// `(sensor_id, timestamp)` pairs are stored as distinct rows.
    pub async fn append(&self, reading: &Reading) -> Result<i64> {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.append_inner(reading).await {
                Ok(id) => {
                    APPEND_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                    return Ok(id);
                }
                Err(Error::Database(db_err))
                    if attempts < MAX_APPEND_ATTEMPTS && is_transient_error(&db_err) =>
                {
                    let wait_ms = 50 * 2_u64.pow(attempts - 1);
                    warn!(
                        "Database insert failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, MAX_APPEND_ATTEMPTS, wait_ms, db_err
                    );
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => {
                    error!("Database insert failed after {} attempts: {}", attempts, e);
                    return Err(e);
                }
            }
        }
    }

    async fn append_inner(&self, reading: &Reading) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO readings (timestamp, sensor_id, temperature, humidity, status)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(format_timestamp(&reading.timestamp))
        .bind(i64::from(reading.sensor_id))
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(i64::from(reading.status))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// The newest reading of every sensor, ordered by sensor id. Ties on
    /// timestamp go to the highest row id.
    pub async fn latest_per_sensor(&self) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            "SELECT r.id, r.timestamp, r.sensor_id, r.temperature, r.humidity, r.status
             FROM readings r
             WHERE r.id = (
                 SELECT r2.id FROM readings r2
                 WHERE r2.sensor_id = r.sensor_id
                 ORDER BY r2.timestamp DESC, r2.id DESC
                 LIMIT 1
             )
             ORDER BY r.sensor_id",
        )
        .fetch_all(&self.pool)
        .await?;

        into_readings(rows)
    }

    /// Readings of `sensor_id` strictly after `since`, oldest first.
    pub async fn history(&self, sensor_id: u32, since: DateTime<Utc>) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            "SELECT id, timestamp, sensor_id, temperature, humidity, status
             FROM readings
             WHERE sensor_id = ? AND timestamp > ?
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(i64::from(sensor_id))
        .bind(format_timestamp(&since))
        .fetch_all(&self.pool)
        .await?;

        debug!("History for sensor {}: {} readings", sensor_id, rows.len());
        into_readings(rows)
    }

    /// The last `limit` readings of `sensor_id`, oldest first.
    pub async fn recent(&self, sensor_id: u32, limit: u32) -> Result<Vec<StoredReading>> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            "SELECT id, timestamp, sensor_id, temperature, humidity, status
             FROM readings
             WHERE sensor_id = ?
             ORDER BY timestamp DESC, id DESC
             LIMIT ?",
        )
        .bind(i64::from(sensor_id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut readings = into_readings(rows)?;
        readings.reverse();
        Ok(readings)
    }

    pub async fn sensor_ids(&self) -> Result<Vec<u32>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT sensor_id FROM readings ORDER BY sensor_id")
            .fetch_all(&self.pool)
            .await?;

        ids.into_iter()
            .map(|id| {
                u32::try_from(id).map_err(|_| Error::CorruptRow {
                    id,
                    reason: "sensor_id out of range".to_string(),
                })
            })
            .collect()
    }

    pub async fn count_all(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_alarms(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM readings WHERE status != 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let (sensor_count, total_readings, alarms_count): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(DISTINCT sensor_id),
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status != 0 THEN 1 ELSE 0 END), 0)
             FROM readings",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            sensor_count,
            total_readings,
            alarms_count,
        })
    }
}

#[async_trait]
impl ReadingSink for ReadingStore {
    async fn record(&self, reading: &Reading) -> Result<()> {
        self.append(reading).await.map(|_| ())
    }
}

fn into_readings(rows: Vec<ReadingRow>) -> Result<Vec<StoredReading>> {
    rows.into_iter().map(StoredReading::try_from).collect()
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            // Check if the database was busy or locked
            db_err.code().is_some_and(|code| {
                code == "5" || // SQLITE_BUSY
                code == "6" || // SQLITE_LOCKED
                code == "261" || // SQLITE_BUSY_RECOVERY
                code == "517" // SQLITE_BUSY_SNAPSHOT
            })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn store() -> (ReadingStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ReadingStore::open(dir.path().join("readings.db")).await.unwrap();
        (store, dir)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn reading(sensor_id: u32, secs: i64, status: u16) -> Reading {
        Reading {
            timestamp: at(secs),
            sensor_id,
            temperature: 21.5,
            humidity: 48.0,
            status,
        }
    }

    #[tokio::test]
    async fn test_latest_per_sensor() {
        let (store, _dir) = store().await;
        store.append(&reading(1, 100, 0)).await.unwrap();
        store.append(&reading(2, 150, 0)).await.unwrap();
        store.append(&reading(1, 200, 0)).await.unwrap();

        let latest = store.latest_per_sensor().await.unwrap();

        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].reading.sensor_id, 1);
        assert_eq!(latest[0].reading.timestamp, at(200));
        assert_eq!(latest[1].reading.sensor_id, 2);
        assert_eq!(latest[1].reading.timestamp, at(150));
    }

    #[tokio::test]
    async fn test_latest_ignores_insertion_order() {
        let (store, _dir) = store().await;
        store.append(&reading(1, 200, 0)).await.unwrap();
        store.append(&reading(1, 100, 0)).await.unwrap();

        let latest = store.latest_per_sensor().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].reading.timestamp, at(200));
    }

    #[tokio::test]
    async fn test_latest_tie_break_highest_id() {
        let (store, _dir) = store().await;
        store.append(&reading(1, 100, 0)).await.unwrap();
        let second = store.append(&reading(1, 100, 4)).await.unwrap();

        let latest = store.latest_per_sensor().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, second);
        assert_eq!(latest[0].reading.status, 4);
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_are_kept() {
        let (store, _dir) = store().await;
        let first = store.append(&reading(3, 100, 0)).await.unwrap();
        let second = store.append(&reading(3, 100, 0)).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.count_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_history_window() {
        let (store, _dir) = store().await;
        for secs in [4, 1, 5, 3, 2] {
            store.append(&reading(1, secs, 0)).await.unwrap();
        }
        store.append(&reading(2, 4, 0)).await.unwrap();

        let history = store.history(1, at(2)).await.unwrap();

        let timestamps: Vec<_> = history.iter().map(|r| r.reading.timestamp).collect();
        assert_eq!(timestamps, vec![at(3), at(4), at(5)]);
        assert!(history.iter().all(|r| r.reading.sensor_id == 1));
    }

    #[tokio::test]
    async fn test_history_subsecond_ordering() {
        let (store, _dir) = store().await;
        let base = at(1_700_000_000);
        let later = base + chrono::Duration::milliseconds(250);
        let latest = base + chrono::Duration::seconds(1);
        for ts in [latest, base, later] {
            store
                .append(&Reading {
                    timestamp: ts,
                    ..reading(1, 0, 0)
                })
                .await
                .unwrap();
        }

        let history = store.history(1, base).await.unwrap();
        let timestamps: Vec<_> = history.iter().map(|r| r.reading.timestamp).collect();
        assert_eq!(timestamps, vec![later, latest]);
    }

    #[tokio::test]
    async fn test_recent_returns_tail_in_order() {
        let (store, _dir) = store().await;
        for secs in 1..=10 {
            store.append(&reading(1, secs, 0)).await.unwrap();
        }

        let recent = store.recent(1, 3).await.unwrap();
        let timestamps: Vec<_> = recent.iter().map(|r| r.reading.timestamp).collect();
        assert_eq!(timestamps, vec![at(8), at(9), at(10)]);
    }

    #[tokio::test]
    async fn test_counts_and_stats() {
        let (store, _dir) = store().await;
        assert_eq!(
            store.stats().await.unwrap(),
            StoreStats {
                sensor_count: 0,
                total_readings: 0,
                alarms_count: 0
            }
        );

        store.append(&reading(1, 1, 0)).await.unwrap();
        store.append(&reading(1, 2, 1)).await.unwrap();
        store.append(&reading(7, 3, 16)).await.unwrap();

        assert_eq!(store.count_all().await.unwrap(), 3);
        assert_eq!(store.count_alarms().await.unwrap(), 2);
        assert_eq!(store.sensor_ids().await.unwrap(), vec![1, 7]);
        assert_eq!(
            store.stats().await.unwrap(),
            StoreStats {
                sensor_count: 2,
                total_readings: 3,
                alarms_count: 2
            }
        );
    }

    #[tokio::test]
    async fn test_round_trip_fields() {
        let (store, _dir) = store().await;
        let written = Reading {
            timestamp: at(1_700_000_000) + chrono::Duration::microseconds(123_456),
            sensor_id: 42,
            temperature: -7.3,
            humidity: 91.2,
            status: 0b1_0010,
        };
        let id = store.append(&written).await.unwrap();

        let latest = store.latest_per_sensor().await.unwrap();
        assert_eq!(latest, vec![StoredReading { id, reading: written }]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        {
            let store = ReadingStore::open(&path).await.unwrap();
            store.append(&reading(1, 1, 0)).await.unwrap();
            store.pool().close().await;
        }
        let store = ReadingStore::open(&path).await.unwrap();
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        assert_eq!(format_timestamp(&at(0)), "1970-01-01T00:00:00.000000Z");
        assert_eq!(
            format_timestamp(&(at(0) + chrono::Duration::milliseconds(5))),
            "1970-01-01T00:00:00.005000Z"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient_error(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient_error(&sqlx::Error::RowNotFound));
    }
}
