use crate::errors::{Error, Result};
use crate::generator::Mode;
use clap::Parser;
use registers::codec::{humidity_in_range, temperature_in_range};
use registers::Thresholds;
use std::net::SocketAddr;
use std::time::Duration;

/// Modbus TCP server simulating a temperature/humidity sensor
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Address to bind the Modbus TCP server to
    #[arg(long, env = "SIM_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// TCP port
    #[arg(long, env = "SIM_PORT", default_value_t = 5020)]
    pub port: u16,

    /// Modbus unit (slave) identifier, used in logs
    #[arg(long = "unit-id", env = "SIM_UNIT_ID", default_value_t = 1)]
    pub unit_id: u8,

    /// Seconds between register updates
    #[arg(long, env = "SIM_UPDATE_RATE", default_value_t = 1.0)]
    pub update_rate: f64,

    #[arg(long, env = "SIM_TEMP_MIN", default_value_t = 15.0, allow_negative_numbers = true)]
    pub temp_min: f64,

    #[arg(long, env = "SIM_TEMP_MAX", default_value_t = 30.0, allow_negative_numbers = true)]
    pub temp_max: f64,

    #[arg(long, env = "SIM_HUMIDITY_MIN", default_value_t = 30.0, allow_negative_numbers = true)]
    pub humidity_min: f64,

    #[arg(long, env = "SIM_HUMIDITY_MAX", default_value_t = 80.0, allow_negative_numbers = true)]
    pub humidity_max: f64,

    /// Follow a sine-wave pattern instead of random values
    #[arg(long, env = "SIM_DETERMINISTIC")]
    pub deterministic: bool,

    /// Seed for the sample generator
    #[arg(long, env = "SIM_SEED", default_value_t = 42)]
    pub seed: u64,
}

/// Validated simulator settings.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub listen: SocketAddr,
    pub unit_id: u8,
    pub update_rate: Duration,
    pub mode: Mode,
    pub temperature: (f64, f64),
    pub humidity: (f64, f64),
    pub thresholds: Thresholds,
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let listen: SocketAddr = format!("{}:{}", args.bind, args.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {}: {}", args.bind, e)))?;

        if !args.update_rate.is_finite() || args.update_rate <= 0.0 {
            return Err(Error::Config(format!(
                "update rate must be positive, got {}",
                args.update_rate
            )));
        }

        let temperature = checked_range("temperature", args.temp_min, args.temp_max, temperature_in_range)?;
        let humidity = checked_range("humidity", args.humidity_min, args.humidity_max, humidity_in_range)?;

        let mode = if args.deterministic {
            Mode::Deterministic
        } else {
            Mode::Random
        };

        Ok(Self {
            listen,
            unit_id: args.unit_id,
            update_rate: Duration::from_secs_f64(args.update_rate),
            mode,
            temperature,
            humidity,
            thresholds: Thresholds::from_ranges(temperature, humidity),
            // Only the deterministic mode is seeded.
            seed: (mode == Mode::Deterministic).then_some(args.seed),
        })
    }
}

fn checked_range(
    field: &str,
    min: f64,
    max: f64,
    encodable: fn(f64) -> bool,
) -> Result<(f64, f64)> {
    if min.is_nan() || max.is_nan() || min > max {
        return Err(Error::Config(format!(
            "{field} range is empty: min {min} > max {max}"
        )));
    }
    if !encodable(min) || !encodable(max) {
        return Err(Error::Config(format!(
            "{field} range [{min}, {max}] does not fit the register encoding"
        )));
    }
    Ok((min, max))
}
