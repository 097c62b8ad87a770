use crate::status;
use rand::Rng;
use thiserror::Error;

/// Fixed-point scale: one decimal digit of precision.
const SCALE: f64 = 10.0;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("{field} {value} cannot be encoded in a 16-bit register")]
    OutOfRange { field: &'static str, value: f64 },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Alarm thresholds. Comparisons are strict, and each field is independent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high_temperature: f64,
    pub low_temperature: f64,
    pub high_humidity: f64,
    pub low_humidity: f64,
}

impl Thresholds {
    /// Thresholds a device derives from its operating ranges: 2 °C inside the
    /// temperature range and 5 %RH inside the humidity range.
    pub fn from_ranges(temperature: (f64, f64), humidity: (f64, f64)) -> Self {
        Self {
            high_temperature: temperature.1 - 2.0,
            low_temperature: temperature.0 + 2.0,
            high_humidity: humidity.1 - 5.0,
            low_humidity: humidity.0 + 5.0,
        }
    }

    /// Status bits 0..3 for a sample.
    pub fn status(&self, temperature: f64, humidity: f64) -> u16 {
        let mut status = 0;
        if temperature > self.high_temperature {
            status |= status::HIGH_TEMPERATURE;
        }
        if temperature < self.low_temperature {
            status |= status::LOW_TEMPERATURE;
        }
        if humidity > self.high_humidity {
            status |= status::HIGH_HUMIDITY;
        }
        if humidity < self.low_humidity {
            status |= status::LOW_HUMIDITY;
        }
        status
    }
}

/// Decoded register block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    pub temperature: f64,
    pub humidity: f64,
    pub status: u16,
}

/// Encodes a sample into `[temperature, humidity, status]` registers.
///
/// Values are scaled by 10 and rounded half away from zero. Temperature is
/// carried as a two's complement `i16`, humidity as a `u16`. Anything that does
/// not fit fails instead of wrapping.
pub fn encode(temperature: f64, humidity: f64, thresholds: &Thresholds) -> Result<[u16; 3]> {
    let temperature_reg = scale_signed("temperature", temperature)?;
    let humidity_reg = scale_unsigned("humidity", humidity)?;
    Ok([
        temperature_reg,
        humidity_reg,
        thresholds.status(temperature, humidity),
    ])
}

/// Like [`encode`], additionally raising the sensor fault bit with
/// `fault_probability`, drawn independently of the threshold bits.
pub fn encode_with_fault<R: Rng + ?Sized>(
    temperature: f64,
    humidity: f64,
    thresholds: &Thresholds,
    fault_probability: f64,
    rng: &mut R,
) -> Result<[u16; 3]> {
    let mut registers = encode(temperature, humidity, thresholds)?;
    if fault_probability > 0.0 && rng.gen_bool(fault_probability.min(1.0)) {
        registers[2] |= status::SENSOR_FAULT;
    }
    Ok(registers)
}

pub fn decode(temperature: u16, humidity: u16, status: u16) -> Decoded {
    Decoded {
        temperature: f64::from(temperature as i16) / SCALE,
        humidity: f64::from(humidity) / SCALE,
        status,
    }
}

/// True if `value` survives [`encode`] as a temperature.
pub fn temperature_in_range(value: f64) -> bool {
    scale_signed("temperature", value).is_ok()
}

/// True if `value` survives [`encode`] as a humidity.
pub fn humidity_in_range(value: f64) -> bool {
    scale_unsigned("humidity", value).is_ok()
}

fn scale_signed(field: &'static str, value: f64) -> Result<u16> {
    let scaled = (value * SCALE).round();
    if !scaled.is_finite() || scaled < f64::from(i16::MIN) || scaled > f64::from(i16::MAX) {
        return Err(CodecError::OutOfRange { field, value });
    }
    Ok(scaled as i16 as u16)
}

fn scale_unsigned(field: &'static str, value: f64) -> Result<u16> {
    let scaled = (value * SCALE).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled > f64::from(u16::MAX) {
        return Err(CodecError::OutOfRange { field, value });
    }
    Ok(scaled as u16)
}
