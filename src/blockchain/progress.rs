use crate::db::progress;
use crate::error::ScanError;
use crate::models::ChainId;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::debug;

/// Commit cursor over a height window `[start, end]`.
///
/// Workers finish heights in any order; the cursor only moves across an
/// unbroken prefix of finished heights and each move is persisted before the
/// lock is released, so the stored progress is always a safe resume point.
pub struct ProgressTracker {
    pool: SqlitePool,
    chain: ChainId,
    start: u64,
    end: u64,
    state: Mutex<CursorState>,
}

struct CursorState {
    /// Indexed by `height - start`.
    done: Vec<bool>,
    /// Offset of the first height not yet finished.
    next: usize,
}

impl ProgressTracker {
    /// `start..=end` must satisfy [`window_fits`](crate::blockchain::worker_pool::window_fits).
    pub fn new(pool: SqlitePool, chain: ChainId, start: u64, end: u64) -> Self {
        let len = (end - start + 1) as usize;
        Self {
            pool,
            chain,
            start,
            end,
            state: Mutex::new(CursorState {
                done: vec![false; len],
                next: 0,
            }),
        }
    }

    /// Record `height` as processed. Returns the new committed height when the
    /// cursor moved.
    pub async fn mark_done(&self, height: u64) -> Result<Option<u64>, ScanError> {
        if height < self.start || height > self.end {
            return Err(ScanError::OutOfWindow {
                height,
                start: self.start,
                end: self.end,
            });
        }

        let mut state = self.state.lock().await;
        let offset = (height - self.start) as usize;
        state.done[offset] = true;

        let before = state.next;
        while state.next < state.done.len() && state.done[state.next] {
            state.next += 1;
        }
        if state.next == before {
            return Ok(None);
        }

        let committed = self.start + state.next as u64 - 1;
        progress::advance_progress(&self.pool, &self.chain, self.start, committed).await?;
        debug!("Chain {} committed through height {}", self.chain, committed);
        Ok(Some(committed))
    }
}
