use crate::blockchain::client::ChainAdapter;
use crate::blockchain::processor::{self, BlockStats};
use crate::blockchain::progress::ProgressTracker;
use crate::blockchain::retry::RetryPolicy;
use crate::db::progress;
use crate::error::ScanError;
use crate::models::ChainId;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub chain: ChainId,
    pub start: u64,
    pub end: u64,
    pub worker_count: usize,
    pub use_segments: bool,
    pub allow_unfinalized: bool,
    pub retry: RetryPolicy,
}

/// Outcome of one scan invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// First height this run scanned (after resuming), `None` if nothing was left.
    pub resumed_from: Option<u64>,
    pub heights_processed: u64,
    pub stats: BlockStats,
    /// Last height of the persisted run when the scan returned.
    pub committed: Option<u64>,
}

/// Highest height the store can represent.
pub const MAX_HEIGHT: u64 = i64::MAX as u64;

/// Most heights one scan may cover; the cursor keeps a flag per height.
pub const MAX_SCAN_WINDOW: u64 = 50_000_000;

pub fn window_fits(start: u64, end: u64) -> bool {
    start <= end && end <= MAX_HEIGHT && end - start < MAX_SCAN_WINDOW
}

/// Heights assigned to `worker`: `start + worker`, then every `worker_count`
/// heights up to and including `end`.
pub fn worker_heights(
    start: u64,
    end: u64,
    worker_count: usize,
    worker: usize,
) -> impl Iterator<Item = u64> {
    let first = start.saturating_add(worker as u64);
    (first..=end).step_by(worker_count.max(1))
}

/// Scans a closed height range of one chain with a fixed pool of workers.
pub struct BlockScanner {
    client: Arc<dyn ChainAdapter>,
    pool: SqlitePool,
    config: ScanConfig,
}

impl BlockScanner {
    pub fn new(client: Arc<dyn ChainAdapter>, pool: SqlitePool, config: ScanConfig) -> Self {
        Self {
            client,
            pool,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<ScanSummary, ScanError> {
        let config = &self.config;
        if !window_fits(config.start, config.end) {
            return Err(ScanError::InvalidWindow {
                start: config.start,
                end: config.end,
            });
        }

        let stored = progress::get_progress(&self.pool, &config.chain).await?;
        let from = match &stored {
            Some(run) => run.resume_point(config.start),
            None => config.start,
        };

        if from > config.end {
            info!(
                "Chain {} already scanned through {}, nothing to do for {}..={}",
                config.chain,
                from - 1,
                config.start,
                config.end
            );
            return Ok(ScanSummary {
                committed: stored.map(|run| run.last_height),
                ..ScanSummary::default()
            });
        }
        if let Some(run) = &stored {
            if from == config.start {
                info!(
                    "Chain {} has {}..={} stored, which does not cover {}; scanning from {}",
                    config.chain, run.first_height, run.last_height, config.start, from
                );
            }
        }

        if !config.allow_unfinalized {
            self.check_finalized().await?;
        }

        let worker_count = config
            .worker_count
            .max(1)
            .min((config.end - from + 1) as usize);
        info!(
            "Scanning chain {} heights {}..={} with {} workers",
            config.chain, from, config.end, worker_count
        );

        let tracker = Arc::new(ProgressTracker::new(
            self.pool.clone(),
            config.chain.clone(),
            from,
            config.end,
        ));

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            let worker = Worker {
                id,
                client: self.client.clone(),
                pool: self.pool.clone(),
                tracker: tracker.clone(),
                config: config.clone(),
                shutdown: shutdown.clone(),
            };
            workers.spawn(async move { worker.run(from, worker_count).await });
        }

        let mut summary = ScanSummary {
            resumed_from: Some(from),
            ..ScanSummary::default()
        };
        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(ScanError::Worker(e.to_string())),
            };
            match outcome {
                Ok(report) => {
                    summary.heights_processed += report.heights;
                    summary.stats += report.stats;
                }
                Err(e) => {
                    error!("Scan of chain {} failed: {}", config.chain, e);
                    workers.abort_all();
                    return Err(e);
                }
            }
        }

        summary.committed = progress::get_progress(&self.pool, &config.chain)
            .await?
            .map(|run| run.last_height);
        info!(
            "Chain {} scan finished: {} heights, {} inits, {} successes, {} acks, {} failures, committed through {:?}",
            config.chain,
            summary.heights_processed,
            summary.stats.inits,
            summary.stats.successes,
            summary.stats.acks,
            summary.stats.failures,
            summary.committed
        );
        Ok(summary)
    }

    async fn check_finalized(&self) -> Result<(), ScanError> {
        let finalized = self
            .config
            .retry
            .run(self.config.end, || self.client.finalized_height())
            .await
            .map_err(|source| ScanError::Fetch {
                height: self.config.end,
                source,
            })?;

        match finalized {
            Some(head) if head < self.config.end => Err(ScanError::BeyondFinalized {
                end: self.config.end,
                finalized: head,
            }),
            _ => Ok(()),
        }
    }
}

struct Worker {
    id: usize,
    client: Arc<dyn ChainAdapter>,
    pool: SqlitePool,
    tracker: Arc<ProgressTracker>,
    config: ScanConfig,
    shutdown: CancellationToken,
}

struct WorkerReport {
    heights: u64,
    stats: BlockStats,
}

impl Worker {
    async fn run(self, from: u64, worker_count: usize) -> Result<WorkerReport, ScanError> {
        debug!("Worker {} started for chain {}", self.id, self.config.chain);
        let mut report = WorkerReport {
            heights: 0,
            stats: BlockStats::default(),
        };

        for height in worker_heights(from, self.config.end, worker_count, self.id) {
            let stats = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Worker {} stopping before height {}", self.id, height);
                    break;
                }
                processed = self.process_height(height) => processed?,
            };
            report.heights += 1;
            report.stats += stats;
            self.tracker.mark_done(height).await?;
        }

        debug!("Worker {} finished {} heights", self.id, report.heights);
        Ok(report)
    }

    async fn process_height(&self, height: u64) -> Result<BlockStats, ScanError> {
        let client = self.client.as_ref();
        let use_segments = self.config.use_segments;

        let (block, events) = self
            .config
            .retry
            .run(height, || processor::fetch_block(client, height, use_segments))
            .await
            .map_err(|source| ScanError::Fetch { height, source })?;

        let extracted = processor::extract_block(&self.config.chain, &block, &events);
        let stats = processor::store_extracted(&self.pool, &self.config.chain, &block, &extracted).await?;
        Ok(stats)
    }
}
