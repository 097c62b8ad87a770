//! Per-sensor acquisition loop.
//!
//! A poller starts `Disconnected`, moves to `Connected` once the device
//! answers, and falls back to `Connected`/`Disconnected` as the link comes and
//! goes. After `max_consecutive_errors` failures in a row it enters
//! `Degraded`, where it stops touching the network and synthesizes readings
//! for the rest of its life.

use crate::config::SensorConfig;
use crate::errors::{Error, Result};
use crate::metrics::{
    ALARMS_TOTAL, DEGRADED_SENSORS, POLL_ERRORS_TOTAL, READINGS_TOTAL, STORAGE_FAILURES_TOTAL,
    SYNTHETIC_READINGS_TOTAL,
};
use crate::model::{AlarmEvent, Origin, Reading};
use crate::sink::ReadingSink;
use crate::synthetic::SyntheticSource;
use crate::transport::{Connector, RegisterReader};
use crate::validate::{validate_block, validate_sensor};
use chrono::{DateTime, Utc};
use prometheus::Gauge;
use registers::{BLOCK_ADDRESS, BLOCK_LEN};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Connected,
    Disconnected,
    Degraded,
}

pub struct Poller<C: Connector, S: ReadingSink> {
    sensor: SensorConfig,
    unit_id: u8,
    connector: C,
    sink: S,
    connection: Option<C::Connection>,
    consecutive_errors: u32,
    mode: Mode,
    synthetic: SyntheticSource,
    last_timestamp: Option<DateTime<Utc>>,
    alarms: Option<broadcast::Sender<AlarmEvent>>,
    degraded_gauge: DegradedGauge,
}

/// This poller's share of the degraded-sensors gauge, released on drop so an
/// aborted or never-spawned poller does not leave it raised.
#[derive(Debug)]
struct DegradedGauge {
    gauge: Gauge,
    raised: bool,
}

impl DegradedGauge {
    fn new(gauge: Gauge) -> Self {
        Self { gauge, raised: false }
    }

    fn raise(&mut self) {
        if !self.raised {
            self.raised = true;
            self.gauge.inc();
        }
    }
}

impl Drop for DegradedGauge {
    fn drop(&mut self) {
        if self.raised {
            self.gauge.dec();
        }
    }
}

impl<C, S> Poller<C, S>
where
    C: Connector + 'static,
    S: ReadingSink + 'static,
{
    pub fn new(sensor: SensorConfig, connector: C, sink: S) -> Result<Self> {
        validate_sensor(&sensor)?;
        let unit_id = sensor.unit_id()?;
        let synthetic = SyntheticSource::new(sensor.id, sensor.synthetic_profile());

        Ok(Self {
            sensor,
            unit_id,
            connector,
            sink,
            connection: None,
            consecutive_errors: 0,
            mode: Mode::Disconnected,
            synthetic,
            last_timestamp: None,
            alarms: None,
            degraded_gauge: DegradedGauge::new(DEGRADED_SENSORS.clone()),
        })
    }

    /// Publishes an [`AlarmEvent`] on `alarms` for every reading with a
    /// non-zero status.
    pub fn with_alarms(mut self, alarms: broadcast::Sender<AlarmEvent>) -> Self {
        self.alarms = Some(alarms);
        self
    }

    pub fn with_synthetic_source(mut self, synthetic: SyntheticSource) -> Self {
        self.synthetic = synthetic;
        self
    }

    /// Starts the poller in degraded mode; it never connects.
    pub fn degraded(mut self) -> Self {
        self.mode = Mode::Degraded;
        self.degraded_gauge.raise();
        self
    }

    pub fn sensor_id(&self) -> u32 {
        self.sensor.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Runs one acquisition step and returns the reading it emitted, if any.
    pub async fn tick(&mut self) -> Option<Reading> {
        if self.mode == Mode::Degraded {
            let timestamp = self.next_timestamp();
            let reading = self.synthetic.next_reading(timestamp);
            self.emit(&reading, Origin::Synthetic).await;
            return Some(reading);
        }

        if self.connection.is_none() {
            match self.connector.connect(&self.sensor).await {
                Ok(connection) => {
                    info!("Sensor {}: connected to {}", self.sensor.id, self.sensor.endpoint());
                    self.connection = Some(connection);
                    self.mode = Mode::Connected;
                    self.consecutive_errors = 0;
                }
                Err(e) => {
                    self.mode = Mode::Disconnected;
                    self.fail(e).await;
                    return None;
                }
            }
        }

        let unit_id = self.unit_id;
        let response = match self.connection.as_mut() {
            Some(connection) => {
                connection
                    .read_holding_registers(BLOCK_ADDRESS, BLOCK_LEN, unit_id)
                    .await
            }
            None => return None,
        };

        match response.and_then(|values| validate_block(&values)) {
            Ok(block) => {
                let decoded = registers::decode(block[0], block[1], block[2]);
                self.consecutive_errors = 0;

                let reading = Reading {
                    timestamp: self.next_timestamp(),
                    sensor_id: self.sensor.id,
                    temperature: decoded.temperature,
                    humidity: decoded.humidity,
                    status: decoded.status,
                };
                self.emit(&reading, Origin::Measured).await;
                Some(reading)
            }
            Err(e) => {
                if e.requires_reconnect() {
                    self.disconnect().await;
                    self.mode = Mode::Disconnected;
                }
                self.fail(e).await;
                None
            }
        }
    }

    /// Ticks every `poll_rate` seconds until `shutdown` flips to true or its
    /// sender is dropped, then closes the connection.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.sensor.poll_interval();
        info!(
            "Starting poller for sensor {} at {} every {:?}",
            self.sensor.id,
            self.sensor.endpoint(),
            interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.disconnect().await;
        info!("Poller for sensor {} stopped", self.sensor.id);
    }

    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let sensor_id = self.sensor.id;
        let task = tokio::spawn(self.run(shutdown));

        PollerHandle {
            sensor_id,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn fail(&mut self, e: Error) {
        self.consecutive_errors += 1;
        POLL_ERRORS_TOTAL.inc();
        warn!(
            "Sensor {}: {} ({}/{})",
            self.sensor.id, e, self.consecutive_errors, self.sensor.max_consecutive_errors
        );

        if self.consecutive_errors >= self.sensor.max_consecutive_errors {
            self.disconnect().await;
            self.mode = Mode::Degraded;
            self.degraded_gauge.raise();
            error!(
                "Sensor {}: {} consecutive errors, switching to generated data",
                self.sensor.id, self.consecutive_errors
            );
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            info!("Sensor {}: disconnected", self.sensor.id);
        }
    }

    async fn emit(&mut self, reading: &Reading, origin: Origin) {
        let tag = match origin {
            Origin::Measured => "",
            Origin::Synthetic => "[GENERATED] ",
        };
        info!(
            "{}Sensor {}: Temp={:.1}°C, Humidity={:.1}%, Status={}",
            tag, reading.sensor_id, reading.temperature, reading.humidity, reading.status
        );

        READINGS_TOTAL.inc();
        if origin == Origin::Synthetic {
            SYNTHETIC_READINGS_TOTAL.inc();
        }

        if let Some(event) = AlarmEvent::from_reading(reading, origin) {
            ALARMS_TOTAL.inc();
            warn!(
                "{}ALARM Sensor {}: {}",
                tag,
                event.sensor_id,
                event.conditions.join(", ")
            );
            if let Some(alarms) = &self.alarms {
                // No subscribers is fine
                let _ = alarms.send(event);
            }
        }

        if let Err(e) = self.sink.record(reading).await {
            STORAGE_FAILURES_TOTAL.inc();
            if e.is_storage() {
                error!("Sensor {}: store rejected reading, dropping it: {}", reading.sensor_id, e);
            } else {
                error!("Sensor {}: cannot forward reading, dropping it: {}", reading.sensor_id, e);
            }
        }
    }

    /// Wall clock, never earlier than the previous reading of this poller.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}

/// Controls a spawned [`Poller`].
#[derive(Debug)]
pub struct PollerHandle {
    sensor_id: u32,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn sensor_id(&self) -> u32 {
        self.sensor_id
    }

    /// Signals the poller and waits up to `timeout` for it to exit, aborting
    /// the task if it does not.
    pub async fn stop(mut self, timeout: Duration) {
        let _ = self.shutdown.send(true);

        if tokio::time::timeout(timeout, &mut self.task).await.is_err() {
            warn!(
                "Poller for sensor {} did not stop within {:?}, aborting",
                self.sensor_id, timeout
            );
            self.task.abort();
            let _ = self.task.await;
        }
    }
}
