pub mod blockchain;
pub mod config;
pub mod correlator;
pub mod db;
pub mod error;
pub mod models;
pub mod state;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience
pub use blockchain::{BlockScanner, ChainAdapter, HttpChainClient, RetryPolicy, ScanConfig};
pub use config::{Config, ConfigError};
pub use correlator::Correlator;
pub use error::{AppError, ScanError};
pub use models::{ConfirmationMode, Direction, MatchedTransfer};
