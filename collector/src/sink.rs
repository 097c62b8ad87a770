use crate::errors::{Error, Result};
use crate::model::Reading;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Destination for emitted readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn record(&self, reading: &Reading) -> Result<()>;
}

#[async_trait]
impl ReadingSink for mpsc::Sender<Reading> {
    async fn record(&self, reading: &Reading) -> Result<()> {
        self.send(reading.clone()).await.map_err(|_| Error::ChannelSend)
    }
}
