use crate::config::{Config, SensorConfig};
use crate::errors::{Error, Result};
use registers::{status, BLOCK_LEN};
use std::collections::HashSet;

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;

/// Validates static configuration before any poller starts.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for sensor in &config.sensors {
        validate_sensor(sensor)?;
        if !seen.insert(sensor.id) {
            return Err(Error::Config(format!("duplicate sensor id {}", sensor.id)));
        }
    }

    if config.http_addr.trim().is_empty() {
        return Err(Error::Config("http_addr cannot be empty".to_string()));
    }

    Ok(())
}

pub fn validate_sensor(sensor: &SensorConfig) -> Result<()> {
    if sensor.id == 0 {
        return Err(Error::Config("sensor id must be positive".to_string()));
    }

    if sensor.host.trim().is_empty() {
        return Err(Error::Config(format!("sensor {}: host cannot be empty", sensor.id)));
    }

    if sensor.port == 0 {
        return Err(Error::Config(format!("sensor {}: port cannot be 0", sensor.id)));
    }

    if !sensor.poll_rate.is_finite() || sensor.poll_rate <= 0.0 {
        return Err(Error::Config(format!(
            "sensor {}: poll_rate must be positive, got {}",
            sensor.id, sensor.poll_rate
        )));
    }

    if !sensor.timeout.is_finite() || sensor.timeout <= 0.0 {
        return Err(Error::Config(format!(
            "sensor {}: timeout must be positive, got {}",
            sensor.id, sensor.timeout
        )));
    }

    if sensor.max_consecutive_errors == 0 {
        return Err(Error::Config(format!(
            "sensor {}: max_consecutive_errors must be at least 1",
            sensor.id
        )));
    }

    sensor.unit_id()?;

    // Validate synthetic baseline
    let profile = sensor.synthetic_profile();
    if !(TEMP_MIN..=TEMP_MAX).contains(&profile.baseline_temperature) {
        return Err(Error::Config(format!(
            "sensor {}: baseline temperature {} out of range [{}, {}]",
            sensor.id, profile.baseline_temperature, TEMP_MIN, TEMP_MAX
        )));
    }
    if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&profile.baseline_humidity) {
        return Err(Error::Config(format!(
            "sensor {}: baseline humidity {} out of range [{}, {}]",
            sensor.id, profile.baseline_humidity, HUMIDITY_MIN, HUMIDITY_MAX
        )));
    }

    Ok(())
}

/// Validates a holding-register response before decoding.
pub fn validate_block(registers: &[u16]) -> Result<[u16; 3]> {
    let block: [u16; 3] = registers.try_into().map_err(|_| {
        Error::Protocol(format!(
            "expected {} registers, got {}",
            BLOCK_LEN,
            registers.len()
        ))
    })?;

    if status::has_reserved_bits(block[2]) {
        return Err(Error::Protocol(format!(
            "status {:#06x} has reserved bits set",
            block[2]
        )));
    }

    Ok(block)
}
