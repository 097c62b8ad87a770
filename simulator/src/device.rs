use crate::config::SimulatorConfig;
use crate::errors::Result;
use crate::generator::SampleGenerator;
use registers::{RegisterBank, Thresholds, BLOCK_ADDRESS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Stands in for a physical sensor by refreshing its register block on a
/// fixed period.
#[derive(Debug)]
pub struct DeviceSimulator {
    unit_id: u8,
    generator: SampleGenerator,
    thresholds: Thresholds,
    bank: RegisterBank,
    update_rate: Duration,
}

impl DeviceSimulator {
    pub fn new(config: &SimulatorConfig, bank: RegisterBank) -> Self {
        Self {
            unit_id: config.unit_id,
            generator: SampleGenerator::new(config.mode, config.temperature, config.humidity, config.seed),
            thresholds: config.thresholds,
            bank,
            update_rate: config.update_rate,
        }
    }

    /// Draws one sample and writes the whole register block in one update.
    pub fn tick(&mut self) -> Result<[u16; 3]> {
        let sample = self.generator.next_sample();
        let block = self.generator.encode(&sample, &self.thresholds)?;
        self.bank.set_registers(BLOCK_ADDRESS, &block)?;

        info!(
            "Unit {} tick {} at {}: Temp={:.1}°C, Humidity={:.1}%, Status={}",
            self.unit_id,
            self.generator.ticks(),
            sample.timestamp.to_rfc3339(),
            sample.temperature,
            sample.humidity,
            block[2]
        );
        Ok(block)
    }

    pub fn start(mut self) -> SimulatorHandle {
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let unit_id = self.unit_id;

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.update_rate);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        if let Err(e) = self.tick() {
                            error!("Unit {}: failed to update registers: {}", self.unit_id, e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        info!("Sensor simulator started for unit {}", unit_id);
        SimulatorHandle {
            unit_id,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Controls a running [`DeviceSimulator`].
#[derive(Debug)]
pub struct SimulatorHandle {
    unit_id: u8,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SimulatorHandle {
    /// Signals the update loop and waits up to `timeout` for it to exit. The
    /// task is aborted if it does not stop in time; either way no register
    /// update happens after this returns.
    pub async fn stop(mut self, timeout: Duration) {
        let _ = self.shutdown.send(true);

        if tokio::time::timeout(timeout, &mut self.task).await.is_err() {
            warn!(
                "Sensor simulator for unit {} did not stop within {:?}, aborting",
                self.unit_id, timeout
            );
            self.task.abort();
            let _ = self.task.await;
        }
        info!("Sensor simulator stopped for unit {}", self.unit_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Mode;

    fn config(mode: Mode) -> SimulatorConfig {
        SimulatorConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            unit_id: 1,
            update_rate: Duration::from_millis(10),
            mode,
            temperature: (15.0, 30.0),
            humidity: (30.0, 80.0),
            thresholds: Thresholds::from_ranges((15.0, 30.0), (30.0, 80.0)),
            seed: Some(42),
        }
    }

    #[test]
    fn test_tick_writes_block() {
        let bank = RegisterBank::new(3);
        let mut device = DeviceSimulator::new(&config(Mode::Deterministic), bank.clone());

        let block = device.tick().unwrap();

        assert_eq!(bank.read_registers(0, 3).unwrap(), block.to_vec());
        // First deterministic tick sits just above the midpoint of 15..30.
        let decoded = registers::decode(block[0], block[1], block[2]);
        assert!((decoded.temperature - 23.3).abs() <= 0.05);
    }

    #[test]
    fn test_identical_seeds_write_identical_blocks() {
        let mut a = DeviceSimulator::new(&config(Mode::Deterministic), RegisterBank::new(3));
        let mut b = DeviceSimulator::new(&config(Mode::Deterministic), RegisterBank::new(3));
        for _ in 0..90 {
            assert_eq!(a.tick().unwrap(), b.tick().unwrap());
        }
    }

    #[tokio::test]
    async fn test_no_updates_after_stop() {
        let bank = RegisterBank::new(3);
        let handle = DeviceSimulator::new(&config(Mode::Random), bank.clone()).start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop(Duration::from_secs(1)).await;

        let frozen = bank.read_registers(0, 3).unwrap();
        assert_ne!(frozen[1], 0, "simulator never wrote humidity");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bank.read_registers(0, 3).unwrap(), frozen);
    }
}
