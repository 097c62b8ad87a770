use crate::errors::{Error, Result};
use crate::synthetic::SyntheticProfile;
use crate::validate::validate_config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

/// Collector configuration, loaded from YAML.
///
/// ```yaml
/// db_path: readings.db
/// http_addr: 0.0.0.0:8080
/// sensors:
///   - id: 1
///     host: localhost
///     port: 5020
///     poll_rate: 5.0
///   - id: 2
///     host: 10.0.0.12
///     port: 502
///     unit_id: 7
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Static per-device settings. Owned by that device's poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: u32,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Modbus unit identifier; the sensor id when absent.
    #[serde(default)]
    pub unit_id: Option<u8>,
    /// Seconds between polls.
    #[serde(default = "default_poll_rate")]
    pub poll_rate: f64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Seconds allowed for a connect or a read before it counts as failed.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Overrides for degraded-mode generation.
    #[serde(default)]
    pub baseline_temperature: Option<f64>,
    #[serde(default)]
    pub baseline_humidity: Option<f64>,
    #[serde(default)]
    pub runs_cold: Option<bool>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("readings.db")
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".into()
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    5020
}

fn default_poll_rate() -> f64 {
    5.0
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_timeout() -> f64 {
    3.0
}

impl SensorConfig {
    pub fn new(id: u32, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            unit_id: None,
            poll_rate: default_poll_rate(),
            max_consecutive_errors: default_max_consecutive_errors(),
            timeout: default_timeout(),
            baseline_temperature: None,
            baseline_humidity: None,
            runs_cold: None,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn unit_id(&self) -> Result<u8> {
        match self.unit_id {
            Some(unit) => Ok(unit),
            None => u8::try_from(self.id).map_err(|_| {
                Error::Config(format!(
                    "sensor {} needs an explicit unit_id (sensor ids above 255 do not fit a unit identifier)",
                    self.id
                ))
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_rate)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn synthetic_profile(&self) -> SyntheticProfile {
        let mut profile = SyntheticProfile::for_sensor(self.id);
        if let Some(t) = self.baseline_temperature {
            profile.baseline_temperature = t;
        }
        if let Some(h) = self.baseline_humidity {
            profile.baseline_humidity = h;
        }
        if let Some(cold) = self.runs_cold {
            profile.runs_cold = cold;
        }
        profile
    }
}

impl Config {
    /// Reads and validates a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_yaml(&raw)?;

        // Allow the environment to relocate the database without editing YAML
        if let Ok(db_path) = env::var("COLLECTOR_DB_PATH") {
            config.db_path = PathBuf::from(db_path);
        }

        validate_config(&config)?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Applies command-line overrides and validates the result again.
    pub fn with_overrides(mut self, db_path: Option<PathBuf>, http_addr: Option<String>) -> Result<Self> {
        if let Some(db_path) = db_path {
            self.db_path = db_path;
        }
        if let Some(http_addr) = http_addr {
            self.http_addr = http_addr;
        }
        validate_config(&self)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml("sensors:\n  - id: 1\n").unwrap();
        assert_eq!(config.db_path, PathBuf::from("readings.db"));
        assert_eq!(config.http_addr, "0.0.0.0:8080");

        let sensor = &config.sensors[0];
        assert_eq!(sensor, &SensorConfig::new(1, "localhost", 5020));
        assert_eq!(sensor.unit_id().unwrap(), 1);
        assert_eq!(sensor.poll_interval(), Duration::from_secs(5));
        assert_eq!(sensor.endpoint(), "localhost:5020");
    }

    #[test]
    fn test_full_sensor_entry() {
        let yaml = r#"
db_path: /var/lib/collector/readings.db
sensors:
  - id: 300
    host: 10.0.0.12
    port: 502
    unit_id: 7
    poll_rate: 0.5
    max_consecutive_errors: 5
    runs_cold: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let sensor = &config.sensors[0];
        assert_eq!(sensor.unit_id().unwrap(), 7);
        assert_eq!(sensor.max_consecutive_errors, 5);
        assert_eq!(sensor.poll_interval(), Duration::from_millis(500));
        assert!(sensor.synthetic_profile().runs_cold);
    }

    #[test]
    fn test_large_id_without_unit_id() {
        let sensor = SensorConfig::new(300, "localhost", 5020);
        assert!(matches!(sensor.unit_id(), Err(Error::Config(_))));
    }

    #[test]
    fn test_baseline_override() {
        let mut sensor = SensorConfig::new(1, "localhost", 5020);
        sensor.baseline_temperature = Some(30.0);
        let profile = sensor.synthetic_profile();
        assert_eq!(profile.baseline_temperature, 30.0);
        assert_eq!(profile.baseline_humidity, 45.0);
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(Config::from_yaml("sensors: [id: }"), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_overrides_are_validated() {
        let config = Config::from_yaml("sensors:\n  - id: 1\n").unwrap();

        let overridden = config
            .clone()
            .with_overrides(Some(PathBuf::from("/tmp/other.db")), Some("127.0.0.1:9000".to_string()))
            .unwrap();
        assert_eq!(overridden.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(overridden.http_addr, "127.0.0.1:9000");

        assert!(matches!(
            config.with_overrides(None, Some(String::new())),
            Err(Error::Config(_))
        ));
    }
}
