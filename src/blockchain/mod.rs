pub mod client;
#[cfg(test)]
pub mod mock_client;
pub mod models;
pub mod processor;
pub mod progress;
pub mod retry;
pub mod worker_pool;

// Re-exports for convenience
pub use client::{ChainAdapter, ClientError, HttpChainClient};
pub use retry::RetryPolicy;
pub use worker_pool::{BlockScanner, ScanConfig, ScanSummary};
