use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    /// Exception or malformed response; the connection stays usable.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The link itself failed mid-request; the connection must be dropped.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors after which the connection handle must be closed and
    /// re-established.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Transport(_) | Error::Io(_))
    }

    /// Errors from the persistence layer.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Migration(_) | Error::CorruptRow { .. }
        )
    }
}
