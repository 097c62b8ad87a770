use crate::errors::{Error, Result};
use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "collector_readings_total",
        "Total readings emitted by pollers, measured and synthetic"
    ))
    .expect("metric can be created");
    pub static ref SYNTHETIC_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "collector_synthetic_readings_total",
        "Total readings synthesized by degraded pollers"
    ))
    .expect("metric can be created");
    pub static ref POLL_ERRORS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "collector_poll_errors_total",
        "Total connect and read failures"
    ))
    .expect("metric can be created");
    pub static ref STORAGE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "collector_storage_failures_total",
        "Total readings dropped because they could not be stored"
    ))
    .expect("metric can be created");
    pub static ref ALARMS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "collector_alarms_total",
        "Total readings with a non-zero status"
    ))
    .expect("metric can be created");
    pub static ref DEGRADED_SENSORS: Gauge = Gauge::with_opts(Opts::new(
        "collector_degraded_sensors",
        "Number of sensors currently in degraded mode"
    ))
    .expect("metric can be created");
    pub static ref APPEND_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "collector_append_latency_seconds",
            "Time taken to append one reading to the store"
        )
        .buckets(vec![
            0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0
        ])
    )
    .expect("metric can be created");
}

pub fn init_metrics() -> Result<()> {
    REGISTRY.register(Box::new(READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNTHETIC_READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POLL_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALARMS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEGRADED_SENSORS.clone()))?;
    REGISTRY.register(Box::new(APPEND_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Config(format!("metrics are not UTF-8: {}", e)))
}
