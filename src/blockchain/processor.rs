use crate::blockchain::client::{ChainAdapter, ClientError};
use crate::blockchain::models::{
    Block, ChainEvent, EventRecord, Phase, OUTGOING_TRANSFER_INITIATED,
};
use crate::db::{destination_success, failure, source_ack, source_init};
use crate::models::{
    ChainId, DestinationSuccess, EventFailure, SourceAck, SourceInit, UpsertOutcome,
};
use sqlx::SqlitePool;
use std::ops::AddAssign;
use tracing::{debug, warn};

/// Rows extracted from one block, before they are written.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub inits: Vec<SourceInit>,
    pub successes: Vec<DestinationSuccess>,
    pub acks: Vec<SourceAck>,
    pub failures: Vec<EventFailure>,
}

/// Counters for what a block (or a whole scan) wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    pub inits: usize,
    pub successes: usize,
    pub acks: usize,
    pub failures: usize,
    pub replaced: usize,
}

impl AddAssign for BlockStats {
    fn add_assign(&mut self, other: Self) {
        self.inits += other.inits;
        self.successes += other.successes;
        self.acks += other.acks;
        self.failures += other.failures;
        self.replaced += other.replaced;
    }
}

/// Fetch a block and its full event list.
pub async fn fetch_block(
    client: &dyn ChainAdapter,
    height: u64,
    use_segments: bool,
) -> Result<(Block, Vec<EventRecord>), ClientError> {
    let block = client.block_at(height).await?;
    let events = client.events_at(&block.hash, use_segments).await?;
    Ok((block, events))
}

/// Turn a block's events into store rows. A bad event only produces a failure
/// record; the rest of the block is still extracted.
pub fn extract_block(chain: &ChainId, block: &Block, events: &[EventRecord]) -> Extracted {
    let mut extracted = Extracted::default();

    for record in events {
        let extrinsic_index = match record.phase {
            Phase::ApplyExtrinsic(index) => Some(index),
            _ => None,
        };
        let fail = |kind: &str, reason: String| EventFailure {
            chain: chain.clone(),
            block_height: block.height,
            block_hash: block.hash.clone(),
            extrinsic_index,
            event_kind: kind.to_string(),
            reason,
        };

        match &record.event {
            ChainEvent::OutgoingTransferInitiated {
                destination_chain_id,
                channel_id,
                nonce,
                amount,
            } => match resolve_signer(block, extrinsic_index) {
                Ok((index, from_address)) => extracted.inits.push(SourceInit {
                    source_chain: chain.clone(),
                    destination_chain_id: destination_chain_id.clone(),
                    channel_id: *channel_id,
                    nonce: nonce.clone(),
                    from_address,
                    amount: amount.clone(),
                    source_block_height: block.height,
                    source_block_hash: block.hash.clone(),
                    source_extrinsic_index: index,
                }),
                Err(reason) => extracted.failures.push(fail(
                    OUTGOING_TRANSFER_INITIATED,
                    format!("channel {} nonce {}: {}", channel_id, nonce, reason),
                )),
            },
            ChainEvent::IncomingTransferSuccessful {
                source_chain_id,
                channel_id,
                nonce,
                amount,
            } => extracted.successes.push(DestinationSuccess {
                destination_chain: chain.clone(),
                source_chain_id: source_chain_id.clone(),
                channel_id: *channel_id,
                nonce: nonce.clone(),
                amount: amount.clone(),
                destination_block_height: block.height,
                destination_block_hash: block.hash.clone(),
            }),
            ChainEvent::OutboxMessageResult {
                destination_chain_id,
                channel_id,
                nonce,
                result,
            } => extracted.acks.push(SourceAck {
                source_chain: chain.clone(),
                destination_chain_id: destination_chain_id.clone(),
                channel_id: *channel_id,
                nonce: nonce.clone(),
                result: *result,
                source_block_height: block.height,
                source_block_hash: block.hash.clone(),
            }),
            ChainEvent::Undecodable { name, reason } => {
                let position = match record.index {
                    Some(index) => format!("event {}", index),
                    None => "unindexed event".to_string(),
                };
                extracted
                    .failures
                    .push(fail(name.as_str(), format!("{}: {}", position, reason)));
            }
            ChainEvent::Other => {}
        }
    }

    extracted
}

/// The origin of a transfer must be a signed extrinsic that exists in the
/// block; anything else is unattributable.
fn resolve_signer(block: &Block, extrinsic_index: Option<u32>) -> Result<(u32, String), String> {
    let index = extrinsic_index.ok_or("event not emitted by an extrinsic")?;
    let extrinsic = block.extrinsics.get(index as usize).ok_or_else(|| {
        format!(
            "extrinsic index {} out of range ({} extrinsics)",
            index,
            block.extrinsics.len()
        )
    })?;
    match extrinsic.signer.as_deref() {
        Some(signer) if !signer.trim().is_empty() => Ok((index, signer.to_string())),
        Some(_) => Err(format!("extrinsic {} has an unresolvable signer", index)),
        None => Err(format!("extrinsic {} is unsigned", index)),
    }
}

/// Write extracted rows. Any store error aborts: a silently lost write would
/// break resume safety.
pub async fn store_extracted(
    pool: &SqlitePool,
    chain: &ChainId,
    block: &Block,
    extracted: &Extracted,
) -> Result<BlockStats, sqlx::Error> {
    let mut stats = BlockStats::default();
    let mut overwrites = Vec::new();

    for init in &extracted.inits {
        let outcome = source_init::upsert_source_init(pool, init).await?;
        note_overwrite(&mut overwrites, "source_init", init.channel_id, &init.nonce, outcome);
        stats.inits += 1;
    }
    for success in &extracted.successes {
        let outcome = destination_success::upsert_destination_success(pool, success).await?;
        note_overwrite(&mut overwrites, "destination_success", success.channel_id, &success.nonce, outcome);
        stats.successes += 1;
    }
    for ack in &extracted.acks {
        let outcome = source_ack::upsert_source_ack(pool, ack).await?;
        note_overwrite(&mut overwrites, "source_ack", ack.channel_id, &ack.nonce, outcome);
        stats.acks += 1;
    }

    for failed in &extracted.failures {
        warn!(
            "Chain {} block {}: dropped {} event: {}",
            chain, block.height, failed.event_kind, failed.reason
        );
        failure::record_failure(pool, failed).await?;
        stats.failures += 1;
    }

    for (table, reason) in overwrites {
        warn!("Chain {} block {}: {}", chain, block.height, reason);
        failure::record_failure(
            pool,
            &EventFailure {
                chain: chain.clone(),
                block_height: block.height,
                block_hash: block.hash.clone(),
                extrinsic_index: None,
                event_kind: format!("overwrite:{}", table),
                reason,
            },
        )
        .await?;
        stats.replaced += 1;
    }

    debug!(
        "Chain {} block {}: {} inits, {} successes, {} acks, {} failures",
        chain, block.height, stats.inits, stats.successes, stats.acks, stats.failures
    );
    Ok(stats)
}

fn note_overwrite(
    overwrites: &mut Vec<(&'static str, String)>,
    table: &'static str,
    channel_id: u64,
    nonce: &str,
    outcome: UpsertOutcome,
) {
    if let UpsertOutcome::Replaced { previous } = outcome {
        overwrites.push((
            table,
            format!(
                "{} channel {} nonce {} replaced; previous {}",
                table, channel_id, nonce, previous
            ),
        ));
    }
}
