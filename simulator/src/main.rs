mod config;
mod device;
mod errors;
mod generator;
mod telemetry;

use clap::Parser;
use config::{Args, SimulatorConfig};
use device::DeviceSimulator;
use registers::{RegisterBank, BLOCK_LEN};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match SimulatorConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    info!("Starting Modbus sensor simulator");
    info!(
        "Unit: {}, Mode: {:?}, Update rate: {:?}, Temp: {:?}, Humidity: {:?}",
        config.unit_id, config.mode, config.update_rate, config.temperature, config.humidity
    );

    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.listen, e);
            std::process::exit(1);
        }
    };

    // Register 0: temperature, 1: humidity, 2: status
    let bank = RegisterBank::new(BLOCK_LEN);
    let simulator = DeviceSimulator::new(&config, bank.clone()).start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = tokio::spawn(registers::service::serve(listener, bank, shutdown_rx));

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Modbus server exited"),
                Ok(Err(e)) => error!("Modbus server error: {}", e),
                Err(e) => error!("Modbus server task failed: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    }

    simulator.stop(STOP_TIMEOUT).await;
    info!("Shutting down");
}
