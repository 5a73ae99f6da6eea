use crate::blockchain::client::ClientError;
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with a capped delay, applied per height. Each call to
/// [`RetryPolicy::run`] starts again from `base`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// `None` retries transient faults forever.
    pub max_retries: Option<usize>,
}

impl RetryPolicy {
    pub fn unbounded(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            max_retries: None,
        }
    }

    pub fn limited(base: Duration, cap: Duration, max_retries: usize) -> Self {
        Self {
            base,
            cap,
            max_retries: Some(max_retries),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_max_delay(self.cap)
            .with_factor(2.0)
            .with_max_times(self.max_retries.unwrap_or(usize::MAX))
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of retries.
    pub async fn run<T, F, Fut>(&self, height: u64, op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        op.retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(|e: &ClientError| e.is_transient())
            .notify(|e: &ClientError, delay: Duration| {
                warn!("Height {} failed: {}. Retrying in {:?}", height, e, delay);
            })
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(500), Duration::from_secs(30))
    }
}
