use axum::{http::StatusCode, routing::get, Router};
use chrono::Utc;
use clap::Parser;
use collector::{metrics, rest, synthetic, Config, ModbusConnector, Poller, ReadingStore};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "collector", about = "Polls Modbus sensors and stores their readings")]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "COLLECTOR_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// SQLite database file, overriding the config
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// HTTP listen address, overriding the config
    #[arg(long, env = "COLLECTOR_HTTP_ADDR")]
    http_addr: Option<String>,

    /// Insert N synthetic readings per sensor, 15 minutes apart, then exit
    #[arg(long, value_name = "N")]
    backfill: Option<usize>,

    /// Start every poller in degraded mode without touching the network
    #[arg(long)]
    synthetic_only: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load(&args.config)
        .and_then(|config| config.with_overrides(args.db_path, args.http_addr))
    {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration in {}: {}", args.config.display(), e);
            std::process::exit(2);
        }
    };

    info!("Starting sensor collector");
    info!("Sensors: {}", config.sensors.len());
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.db_path.display());
    if config.sensors.is_empty() {
        warn!("No sensors configured");
    }

    // Initialize metrics
    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let store = match ReadingStore::open(&config.db_path).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(samples) = args.backfill {
        match synthetic::backfill(&store, &config.sensors, samples, Utc::now()).await {
            Ok(written) => info!("Backfill complete: {} readings", written),
            Err(e) => {
                error!("Backfill failed: {}", e);
                std::process::exit(1);
            }
        }
        store.pool().close().await;
        return;
    }

    let (alarm_tx, mut alarm_rx) = broadcast::channel(256);
    tokio::spawn(async move {
        loop {
            match alarm_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!("Alarm event: {}", json),
                    Err(e) => warn!("Cannot serialize alarm event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Alarm subscriber lagged, {} events missed", missed)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Build every poller before starting any of them
    let mut pollers = Vec::with_capacity(config.sensors.len());
    for sensor in config.sensors.iter().cloned() {
        match Poller::new(sensor, ModbusConnector, store.clone()) {
            Ok(poller) => {
                let poller = poller.with_alarms(alarm_tx.clone());
                pollers.push(if args.synthetic_only { poller.degraded() } else { poller });
            }
            Err(e) => {
                error!("Invalid sensor configuration: {}", e);
                std::process::exit(2);
            }
        }
    }
    drop(alarm_tx);

    if args.synthetic_only {
        info!("Synthetic-only mode: generating readings without polling devices");
    }
    let handles: Vec<_> = pollers.into_iter().map(Poller::spawn).collect();

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(store.clone()));

    let listener = match tokio::net::TcpListener::bind(&config.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        }
    };

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    for handle in handles {
        debug!("Stopping poller for sensor {}", handle.sensor_id());
        handle.stop(STOP_TIMEOUT).await;
    }
    store.pool().close().await;

    info!("Shutting down");
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
