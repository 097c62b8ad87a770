//! Acquisition side of the sensor pipeline: one [`poller::Poller`] per Modbus
//! device feeding a SQLite [`db::ReadingStore`], plus the dashboard API over
//! the store.

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod rest;
pub mod sink;
pub mod synthetic;
pub mod transport;
pub mod validate;

pub use config::{Config, SensorConfig};
pub use db::ReadingStore;
pub use errors::{Error, Result};
pub use model::{AlarmEvent, Reading};
pub use poller::{Mode, Poller, PollerHandle};
pub use transport::ModbusConnector;
