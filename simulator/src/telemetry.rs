use chrono::{DateTime, Utc};

/// One simulated measurement, before it is encoded into registers.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
}
