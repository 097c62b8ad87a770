use crate::telemetry::Sample;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use registers::Thresholds;
use std::f64::consts::PI;

/// Ticks per full waveform cycle in deterministic mode.
pub const WAVE_PERIOD: u64 = 60;
/// Humidity lags temperature by half a cycle.
pub const HUMIDITY_PHASE: u64 = 30;
/// Chance per tick of a sensor fault in random mode.
pub const FAULT_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Random,
    Deterministic,
}

/// Produces samples for one simulated device.
#[derive(Debug)]
pub struct SampleGenerator {
    mode: Mode,
    temperature: (f64, f64),
    humidity: (f64, f64),
    counter: u64,
    rng: StdRng,
}

impl SampleGenerator {
    /// `seed` makes the generator reproducible; without one, random mode draws
    /// from OS entropy.
    pub fn new(mode: Mode, temperature: (f64, f64), humidity: (f64, f64), seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            mode,
            temperature,
            humidity,
            counter: 0,
            rng,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.counter
    }

    pub fn next_sample(&mut self) -> Sample {
        self.counter += 1;
        let (temperature, humidity) = match self.mode {
            Mode::Deterministic => (
                wave(self.temperature, self.counter),
                wave(self.humidity, self.counter + HUMIDITY_PHASE),
            ),
            Mode::Random => (
                self.rng.gen_range(self.temperature.0..=self.temperature.1),
                self.rng.gen_range(self.humidity.0..=self.humidity.1),
            ),
        };

        Sample {
            timestamp: Utc::now(),
            temperature,
            humidity,
        }
    }

    /// Encodes `sample` into the register block, injecting faults in random
    /// mode only.
    pub fn encode(&mut self, sample: &Sample, thresholds: &Thresholds) -> registers::codec::Result<[u16; 3]> {
        let fault_probability = match self.mode {
            Mode::Random => FAULT_PROBABILITY,
            Mode::Deterministic => 0.0,
        };
        registers::encode_with_fault(
            sample.temperature,
            sample.humidity,
            thresholds,
            fault_probability,
            &mut self.rng,
        )
    }
}

/// Sine wave between `min` and `max` with a period of [`WAVE_PERIOD`] ticks.
fn wave((min, max): (f64, f64), tick: u64) -> f64 {
    let phase = (tick % WAVE_PERIOD) as f64 / WAVE_PERIOD as f64;
    min + (max - min) * (0.5 + 0.5 * (phase * 2.0 * PI).sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMP: (f64, f64) = (15.0, 30.0);
    const HUMIDITY: (f64, f64) = (30.0, 80.0);

    fn values(generator: &mut SampleGenerator, n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|_| {
                let s = generator.next_sample();
                (s.temperature, s.humidity)
            })
            .collect()
    }

    #[test]
    fn test_deterministic_replays_identically() {
        let mut a = SampleGenerator::new(Mode::Deterministic, TEMP, HUMIDITY, Some(42));
        let mut b = SampleGenerator::new(Mode::Deterministic, TEMP, HUMIDITY, Some(42));
        assert_eq!(values(&mut a, 150), values(&mut b, 150));
        assert_eq!(a.ticks(), 150);
    }

    #[test]
    fn test_deterministic_waveform_period_and_bounds() {
        let mut generator = SampleGenerator::new(Mode::Deterministic, TEMP, HUMIDITY, Some(1));
        let first = values(&mut generator, 60);
        let second = values(&mut generator, 60);
        assert_eq!(first, second);
        for (t, h) in &first {
            assert!((TEMP.0..=TEMP.1).contains(t));
            assert!((HUMIDITY.0..=HUMIDITY.1).contains(h));
        }
    }

    #[test]
    fn test_humidity_is_phase_shifted() {
        let mut generator = SampleGenerator::new(Mode::Deterministic, TEMP, HUMIDITY, Some(1));
        for (t, h) in values(&mut generator, 120) {
            // With a half-cycle shift the normalised channels mirror each other.
            let t_norm = (t - TEMP.0) / (TEMP.1 - TEMP.0);
            let h_norm = (h - HUMIDITY.0) / (HUMIDITY.1 - HUMIDITY.0);
            assert!((t_norm + h_norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_random_mode_stays_in_range() {
        let mut generator = SampleGenerator::new(Mode::Random, TEMP, HUMIDITY, Some(3));
        for (t, h) in values(&mut generator, 1000) {
            assert!((TEMP.0..=TEMP.1).contains(&t));
            assert!((HUMIDITY.0..=HUMIDITY.1).contains(&h));
        }
    }

    #[test]
    fn test_random_mode_injects_occasional_faults() {
        let thresholds = Thresholds::from_ranges(TEMP, HUMIDITY);
        let mut generator = SampleGenerator::new(Mode::Random, TEMP, HUMIDITY, Some(9));
        let faults = (0..20_000)
            .filter(|_| {
                let sample = generator.next_sample();
                let regs = generator.encode(&sample, &thresholds).unwrap();
                regs[2] & registers::status::SENSOR_FAULT != 0
            })
            .count();
        assert!((100..=320).contains(&faults), "faults={faults}");
    }

    #[test]
    fn test_deterministic_mode_never_faults() {
        let thresholds = Thresholds::from_ranges(TEMP, HUMIDITY);
        let mut generator = SampleGenerator::new(Mode::Deterministic, TEMP, HUMIDITY, Some(9));
        for _ in 0..500 {
            let sample = generator.next_sample();
            let regs = generator.encode(&sample, &thresholds).unwrap();
            assert_eq!(regs[2] & registers::status::SENSOR_FAULT, 0);
        }
    }

    #[test]
    fn test_degenerate_range() {
        let mut generator = SampleGenerator::new(Mode::Random, (20.0, 20.0), (50.0, 50.0), None);
        assert_eq!(values(&mut generator, 3), vec![(20.0, 50.0); 3]);
    }
}
