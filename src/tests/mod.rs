//! Store, scanner, correlator and HTTP client tests against an in-memory event store.

mod http_client_tests;

use crate::blockchain::models::{ChainEvent, EventRecord, Phase};
use crate::blockchain::{RetryPolicy, ScanConfig};
use crate::db::connection;
use crate::models::{AckResult, ChainId};
use sqlx::SqlitePool;
use std::time::Duration;

pub(crate) async fn test_pool() -> SqlitePool {
    connection::establish_in_memory()
        .await
        .expect("Failed to open in-memory store")
}

pub(crate) fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy::limited(Duration::from_millis(1), Duration::from_millis(5), max_retries)
}

pub(crate) fn scan_config(chain: &str, start: u64, end: u64, workers: usize) -> ScanConfig {
    ScanConfig {
        chain: ChainId::new(chain),
        start,
        end,
        worker_count: workers,
        use_segments: false,
        allow_unfinalized: true,
        retry: fast_retry(20),
    }
}

pub(crate) fn outgoing(index: u32, extrinsic: u32, to: &str, channel_id: u64, nonce: u64, amount: &str) -> EventRecord {
    EventRecord {
        index: Some(index),
        phase: Phase::ApplyExtrinsic(extrinsic),
        event: ChainEvent::OutgoingTransferInitiated {
            destination_chain_id: ChainId::new(to),
            channel_id,
            nonce: nonce.to_string(),
            amount: amount.to_string(),
        },
    }
}

pub(crate) fn incoming(index: u32, from: &str, channel_id: u64, nonce: u64, amount: &str) -> EventRecord {
    EventRecord {
        index: Some(index),
        phase: Phase::ApplyExtrinsic(0),
        event: ChainEvent::IncomingTransferSuccessful {
            source_chain_id: ChainId::new(from),
            channel_id,
            nonce: nonce.to_string(),
            amount: amount.to_string(),
        },
    }
}

pub(crate) fn outbox_result(index: u32, to: &str, channel_id: u64, nonce: u64, result: AckResult) -> EventRecord {
    EventRecord {
        index: Some(index),
        phase: Phase::Finalization,
        event: ChainEvent::OutboxMessageResult {
            destination_chain_id: ChainId::new(to),
            channel_id,
            nonce: nonce.to_string(),
            result,
        },
    }
}

/// Every row of the three event tables as text, in key order.
pub(crate) async fn snapshot(pool: &SqlitePool) -> Vec<String> {
    let queries = [
        "SELECT 'init|' || source_chain || '|' || destination_chain_id || '|' || channel_id || '|' || nonce
                || '|' || from_address || '|' || amount || '|' || source_block_height || '|' || source_block_hash
                || '|' || source_extrinsic_index
         FROM source_inits ORDER BY source_chain, channel_id, nonce",
        "SELECT 'dest|' || destination_chain || '|' || source_chain_id || '|' || channel_id || '|' || nonce
                || '|' || amount || '|' || destination_block_height || '|' || destination_block_hash
         FROM destination_successes ORDER BY destination_chain, channel_id, nonce",
        "SELECT 'ack|' || source_chain || '|' || destination_chain_id || '|' || channel_id || '|' || nonce
                || '|' || result || '|' || source_block_height || '|' || source_block_hash
         FROM source_acks ORDER BY source_chain, channel_id, nonce",
    ];

    let mut rows = Vec::new();
    for query in queries {
        let mut table: Vec<String> = sqlx::query_scalar(query).fetch_all(pool).await.unwrap();
        rows.append(&mut table);
    }
    rows
}
