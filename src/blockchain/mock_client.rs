//! In-memory chain used by tests.

use crate::blockchain::client::{ChainAdapter, ClientError};
use crate::blockchain::models::{flatten_segments, Block, EventRecord, Extrinsic};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockChainClient {
    blocks: Arc<Mutex<HashMap<u64, Block>>>,
    // Events per block hash, stored as segments so overlap can be exercised.
    events: Arc<Mutex<HashMap<String, Vec<Vec<EventRecord>>>>>,
    // Remaining transient failures to return per height.
    failures: Arc<Mutex<HashMap<u64, usize>>>,
    block_requests: Arc<Mutex<Vec<u64>>>,
    finalized: Arc<Mutex<Option<u64>>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block at `height` whose extrinsics have the given signers.
    pub fn add_block(&self, height: u64, signers: &[Option<&str>], events: Vec<EventRecord>) {
        self.add_segmented_block(height, signers, vec![events]);
    }

    pub fn add_segmented_block(
        &self,
        height: u64,
        signers: &[Option<&str>],
        segments: Vec<Vec<EventRecord>>,
    ) {
        let hash = Self::hash_for(height);
        let extrinsics = signers
            .iter()
            .enumerate()
            .map(|(index, signer)| Extrinsic {
                index: index as u32,
                signer: signer.map(str::to_string),
            })
            .collect();
        self.blocks.lock().unwrap().insert(
            height,
            Block {
                height,
                hash: hash.clone(),
                extrinsics,
            },
        );
        self.events.lock().unwrap().insert(hash, segments);
    }

    /// Add empty blocks for every height in the range that has none yet.
    pub fn fill_empty(&self, start: u64, end: u64) {
        for height in start..=end {
            let missing = !self.blocks.lock().unwrap().contains_key(&height);
            if missing {
                self.add_block(height, &[], vec![]);
            }
        }
    }

    /// Fail the next `times` requests for `height` with a transient error.
    pub fn fail_height(&self, height: u64, times: usize) {
        self.failures.lock().unwrap().insert(height, times);
    }

    pub fn set_finalized(&self, height: u64) {
        *self.finalized.lock().unwrap() = Some(height);
    }

    pub fn block_requests(&self) -> Vec<u64> {
        self.block_requests.lock().unwrap().clone()
    }

    pub fn hash_for(height: u64) -> String {
        format!("0x{:064x}", height)
    }
}

#[async_trait]
impl ChainAdapter for MockChainClient {
    async fn block_at(&self, height: u64) -> Result<Block, ClientError> {
        self.block_requests.lock().unwrap().push(height);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ClientError::Unavailable(format!("mock outage at {}", height)));
                }
            }
        }

        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("block {}", height)))
    }

    async fn events_at(
        &self,
        block_hash: &str,
        use_segments: bool,
    ) -> Result<Vec<EventRecord>, ClientError> {
        let segments = self
            .events
            .lock()
            .unwrap()
            .get(block_hash)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("events for {}", block_hash)))?;

        if use_segments {
            Ok(flatten_segments(segments))
        } else {
            Ok(segments.into_iter().flatten().collect())
        }
    }

    async fn finalized_height(&self) -> Result<Option<u64>, ClientError> {
        Ok(*self.finalized.lock().unwrap())
    }
}
