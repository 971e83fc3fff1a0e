use stargazer_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Mapper has already been started; each Mapper runs once")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Scan(#[from] ScanError),
}

pub type Result<T> = std::result::Result<T, MapError>;
