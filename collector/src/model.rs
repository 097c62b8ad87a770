use chrono::{DateTime, Utc};
use registers::status;
use serde::{Deserialize, Serialize};

/// One observation from a sensor, measured or synthesized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: u32,
    pub temperature: f64,
    pub humidity: f64,
    pub status: u16,
}

impl Reading {
    pub fn is_alarm(&self) -> bool {
        self.status != 0
    }

    pub fn alarms(&self) -> Vec<&'static str> {
        status::alarm_names(self.status)
    }
}

/// A persisted reading with its row id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub id: i64,
    #[serde(flatten)]
    pub reading: Reading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Measured,
    Synthetic,
}

/// Raised for every emitted reading with a non-zero status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmEvent {
    pub sensor_id: u32,
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub conditions: Vec<&'static str>,
    pub synthetic: bool,
}

impl AlarmEvent {
    pub fn from_reading(reading: &Reading, origin: Origin) -> Option<Self> {
        reading.is_alarm().then(|| AlarmEvent {
            sensor_id: reading.sensor_id,
            timestamp: reading.timestamp,
            status: reading.status,
            conditions: reading.alarms(),
            synthetic: origin == Origin::Synthetic,
        })
    }
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub sensor_count: i64,
    pub total_readings: i64,
    pub alarms_count: i64,
}

/// Reading as served by the REST API, with decoded alarm names.
#[derive(Debug, Serialize)]
pub struct ReadingView {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub sensor_id: u32,
    pub temperature: f64,
    pub humidity: f64,
    pub status: u16,
    pub alarms: Vec<&'static str>,
}

impl From<StoredReading> for ReadingView {
    fn from(stored: StoredReading) -> Self {
        let alarms = stored.reading.alarms();
        let Reading {
            timestamp,
            sensor_id,
            temperature,
            humidity,
            status,
        } = stored.reading;
        Self {
            id: stored.id,
            timestamp,
            sensor_id,
            temperature,
            humidity,
            status,
            alarms,
        }
    }
}

/// REST API response wrappers
#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub readings: Vec<ReadingView>,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub sensor_id: u32,
    pub readings: Vec<ReadingView>,
    pub total_readings: i64,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: StoreStats,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct SensorsResponse {
    pub sensors: Vec<u32>,
}

/// Store contents at a glance: row count and each sensor's newest rows.
#[derive(Debug, Serialize)]
pub struct DebugResponse {
    pub total_rows: i64,
    pub sensors: Vec<SensorTail>,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct SensorTail {
    pub sensor_id: u32,
    pub latest_readings: Vec<ReadingView>,
}
