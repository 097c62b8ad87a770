use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Register encoding error: {0}")]
    Codec(#[from] registers::CodecError),

    #[error("Register address error: {0} registers at {1}")]
    Address(u16, u16),
}

impl From<registers::bank::IllegalAddress> for Error {
    fn from(err: registers::bank::IllegalAddress) -> Self {
        Error::Address(err.count, err.address)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
