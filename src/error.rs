use crate::blockchain::client::ClientError;
use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Height {height} could not be fetched: {source}")]
    Fetch { height: u64, source: ClientError },

    #[error("End height {end} is above the finalized head {finalized}")]
    BeyondFinalized { end: u64, finalized: u64 },

    #[error("Scan window {start}..={end} is empty, too large, or above the storable height")]
    InvalidWindow { start: u64, end: u64 },

    #[error("Height {height} is outside the scan window {start}..={end}")]
    OutOfWindow { height: u64, start: u64, end: u64 },

    #[error("Scan worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chain client error: {0}")]
    Client(#[from] ClientError),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Process exit code: 2 for configuration faults, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_)
            | AppError::Scan(ScanError::BeyondFinalized { .. })
            | AppError::Scan(ScanError::InvalidWindow { .. }) => 2,
            AppError::Client(ClientError::InvalidEndpoint(_)) => 2,
            _ => 1,
        }
    }
}
