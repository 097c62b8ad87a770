//! Synthetic readings for degraded sensors and for backfilling history.

use crate::config::SensorConfig;
use crate::errors::Result;
use crate::model::Reading;
use crate::sink::ReadingSink;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use registers::status;
use tracing::info;

/// Chance per reading of a forced alarm.
pub const ALARM_PROBABILITY: f64 = 0.15;

const LIVE_JITTER: Jitter = Jitter {
    temperature: 0.5,
    humidity: 1.0,
};

const BACKFILL_JITTER: Jitter = Jitter {
    temperature: 2.0,
    humidity: 5.0,
};

/// Spacing between backfilled readings.
pub const BACKFILL_INTERVAL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy)]
struct Jitter {
    temperature: f64,
    humidity: f64,
}

/// Per-sensor constants used to fabricate plausible readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticProfile {
    pub baseline_temperature: f64,
    pub baseline_humidity: f64,
    /// Forced alarms on this sensor are always low temperature.
    pub runs_cold: bool,
    pub high_temperature: f64,
    pub low_humidity: f64,
    pub high_humidity: f64,
}

impl SyntheticProfile {
    pub fn for_sensor(sensor_id: u32) -> Self {
        let (baseline_temperature, baseline_humidity) = match sensor_id {
            1 => (22.5, 45.0),
            _ => (18.3, 50.2),
        };
        Self {
            baseline_temperature,
            baseline_humidity,
            runs_cold: sensor_id == 2,
            high_temperature: 25.0,
            low_humidity: 35.0,
            high_humidity: 60.0,
        }
    }

    /// The single status bit a forced alarm raises, by first match.
    pub fn alarm_status(&self, temperature: f64, humidity: f64) -> u16 {
        if self.runs_cold {
            status::LOW_TEMPERATURE
        } else if temperature > self.high_temperature {
            status::HIGH_TEMPERATURE
        } else if humidity < self.low_humidity {
            status::LOW_HUMIDITY
        } else if humidity > self.high_humidity {
            status::HIGH_HUMIDITY
        } else {
            status::SENSOR_FAULT
        }
    }
}

/// Generates readings around a sensor's baseline.
#[derive(Debug)]
pub struct SyntheticSource {
    sensor_id: u32,
    profile: SyntheticProfile,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new(sensor_id: u32, profile: SyntheticProfile) -> Self {
        Self::with_rng(sensor_id, profile, StdRng::from_entropy())
    }

    pub fn with_seed(sensor_id: u32, profile: SyntheticProfile, seed: u64) -> Self {
        Self::with_rng(sensor_id, profile, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sensor_id: u32, profile: SyntheticProfile, rng: StdRng) -> Self {
        Self {
            sensor_id,
            profile,
            rng,
        }
    }

    /// A degraded-mode reading: baseline ±0.5 °C, ±1.0 %RH.
    pub fn next_reading(&mut self, timestamp: DateTime<Utc>) -> Reading {
        self.generate(timestamp, LIVE_JITTER)
    }

    fn generate(&mut self, timestamp: DateTime<Utc>, jitter: Jitter) -> Reading {
        let temperature = self.profile.baseline_temperature
            + self.rng.gen_range(-jitter.temperature..=jitter.temperature);
        let humidity = self.profile.baseline_humidity
            + self.rng.gen_range(-jitter.humidity..=jitter.humidity);

        let status = if self.rng.gen_bool(ALARM_PROBABILITY) {
            self.profile.alarm_status(temperature, humidity)
        } else {
            0
        };

        Reading {
            timestamp,
            sensor_id: self.sensor_id,
            temperature,
            humidity,
            status,
        }
    }
}

/// Writes `samples` synthetic readings per sensor, spaced
/// [`BACKFILL_INTERVAL_MINUTES`] apart and ending at `now`.
pub async fn backfill<S: ReadingSink + ?Sized>(
    sink: &S,
    sensors: &[SensorConfig],
    samples: usize,
    now: DateTime<Utc>,
) -> Result<usize> {
    info!("Generating {} synthetic readings per sensor...", samples);

    let mut written = 0;
    for sensor in sensors {
        let mut source = SyntheticSource::new(sensor.id, sensor.synthetic_profile());
        for i in 0..samples {
            let timestamp = now - Duration::minutes(BACKFILL_INTERVAL_MINUTES * i as i64);
            let reading = source.generate(timestamp, BACKFILL_JITTER);
            sink.record(&reading).await?;
            written += 1;
        }
    }

    info!("Generated {} synthetic readings", written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_default_profiles() {
        let one = SyntheticProfile::for_sensor(1);
        assert_eq!((one.baseline_temperature, one.baseline_humidity), (22.5, 45.0));
        assert!(!one.runs_cold);

        let two = SyntheticProfile::for_sensor(2);
        assert_eq!((two.baseline_temperature, two.baseline_humidity), (18.3, 50.2));
        assert!(two.runs_cold);

        assert!(!SyntheticProfile::for_sensor(9).runs_cold);
    }

    #[test]
    fn test_alarm_priority() {
        let mut profile = SyntheticProfile::for_sensor(1);
        assert_eq!(profile.alarm_status(26.0, 30.0), status::HIGH_TEMPERATURE);
        assert_eq!(profile.alarm_status(22.0, 30.0), status::LOW_HUMIDITY);
        assert_eq!(profile.alarm_status(22.0, 65.0), status::HIGH_HUMIDITY);
        assert_eq!(profile.alarm_status(22.0, 45.0), status::SENSOR_FAULT);

        profile.runs_cold = true;
        assert_eq!(profile.alarm_status(26.0, 30.0), status::LOW_TEMPERATURE);
    }

    #[test]
    fn test_readings_stay_near_baseline() {
        let profile = SyntheticProfile::for_sensor(1);
        let mut source = SyntheticSource::with_seed(1, profile, 5);
        let mut alarms = 0;
        for i in 0..2000 {
            let reading = source.next_reading(at(i));
            assert_eq!(reading.sensor_id, 1);
            assert!((reading.temperature - 22.5).abs() <= 0.5);
            assert!((reading.humidity - 45.0).abs() <= 1.0);
            assert!(reading.status.count_ones() <= 1);
            if reading.status != 0 {
                // Near 22.5 °C / 45 %RH no threshold rule matches.
                assert_eq!(reading.status, status::SENSOR_FAULT);
                alarms += 1;
            }
        }
        assert!((200..=400).contains(&alarms), "alarms={alarms}");
    }

    #[test]
    fn test_cold_sensor_alarms_are_low_temperature() {
        let mut source = SyntheticSource::with_seed(2, SyntheticProfile::for_sensor(2), 11);
        for i in 0..500 {
            let reading = source.next_reading(at(i));
            assert!(reading.status == 0 || reading.status == status::LOW_TEMPERATURE);
        }
    }

    #[test]
    fn test_seeded_sources_agree() {
        let profile = SyntheticProfile::for_sensor(3);
        let mut a = SyntheticSource::with_seed(3, profile, 99);
        let mut b = SyntheticSource::with_seed(3, profile, 99);
        for i in 0..50 {
            assert_eq!(a.next_reading(at(i)), b.next_reading(at(i)));
        }
    }

    #[tokio::test]
    async fn test_backfill_spacing() {
        let (tx, mut rx) = mpsc::channel(64);
        let sensors = vec![
            SensorConfig::new(1, "localhost", 5020),
            SensorConfig::new(2, "localhost", 5021),
        ];
        let now = at(1_700_000_000);

        let written = backfill(&tx, &sensors, 4, now).await.unwrap();
        drop(tx);
        assert_eq!(written, 8);

        let mut readings = Vec::new();
        while let Some(reading) = rx.recv().await {
            readings.push(reading);
        }
        assert_eq!(readings.len(), 8);
        assert_eq!(readings[0].timestamp, now);
        assert_eq!(readings[3].timestamp, now - Duration::minutes(45));
        assert_eq!(readings[4].sensor_id, 2);
        for reading in &readings[..4] {
            assert!((reading.temperature - 22.5).abs() <= 2.0);
            assert!((reading.humidity - 45.0).abs() <= 5.0);
        }
    }
}
