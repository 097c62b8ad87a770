//! Register transport: how a poller reaches its device.

use crate::config::SensorConfig;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::debug;

/// Opens connections to a device.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: RegisterReader + 'static;

    async fn connect(&self, sensor: &SensorConfig) -> Result<Self::Connection>;
}

/// A live connection to a device, owned by exactly one poller.
#[async_trait]
pub trait RegisterReader: Send {
    /// Reads `count` holding registers at `address` from unit `unit_id`.
    ///
    /// Returns [`Error::Protocol`] when the device answered but the answer is
    /// unusable, and [`Error::Transport`] when the link itself failed.
    async fn read_holding_registers(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>>;

    async fn close(&mut self);
}

/// Modbus TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusConnector;

pub struct ModbusConnection {
    ctx: Context,
    peer: SocketAddr,
    timeout: Duration,
}

#[async_trait]
impl Connector for ModbusConnector {
    type Connection = ModbusConnection;

    async fn connect(&self, sensor: &SensorConfig) -> Result<ModbusConnection> {
        let endpoint = sensor.endpoint();
        let io_timeout = sensor.io_timeout();
        let unit_id = sensor.unit_id()?;

        let peer = timeout(io_timeout, lookup_host(endpoint.as_str()))
            .await
            .map_err(|_| Error::Connection(format!("timed out resolving {}", endpoint)))?
            .map_err(|e| Error::Connection(format!("cannot resolve {}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| Error::Connection(format!("no address found for {}", endpoint)))?;

        let ctx = timeout(io_timeout, tcp::connect_slave(peer, Slave(unit_id)))
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {}", peer)))?
            .map_err(|e| Error::Connection(format!("cannot connect to {}: {}", peer, e)))?;

        debug!("Opened Modbus TCP connection to {}", peer);
        Ok(ModbusConnection {
            ctx,
            peer,
            timeout: io_timeout,
        })
    }
}

#[async_trait]
impl RegisterReader for ModbusConnection {
    async fn read_holding_registers(&mut self, address: u16, count: u16, unit_id: u8) -> Result<Vec<u16>> {
        self.ctx.set_slave(Slave(unit_id));

        match timeout(self.timeout, self.ctx.read_holding_registers(address, count)).await {
            Err(_) => Err(Error::Transport(format!(
                "read from {} timed out after {:?}",
                self.peer, self.timeout
            ))),
            Ok(Err(tokio_modbus::Error::Transport(e))) => {
                Err(Error::Transport(format!("read from {} failed: {}", self.peer, e)))
            }
            Ok(Err(tokio_modbus::Error::Protocol(e))) => {
                Err(Error::Protocol(format!("malformed response from {}: {}", self.peer, e)))
            }
            Ok(Ok(Err(exception))) => Err(Error::Protocol(format!(
                "exception response from {}: {}",
                self.peer, exception
            ))),
            Ok(Ok(Ok(registers))) => Ok(registers),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            debug!("Error while closing connection to {}: {:?}", self.peer, e);
        }
    }
}
