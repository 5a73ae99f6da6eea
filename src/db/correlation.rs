use crate::db::source_ack::parse_ack_result;
use crate::db::source_init::source_init_from_row;
use crate::db::{from_db_int, to_db_int};
use crate::models::{AckResult, Direction, SourceInit};
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Deposit side of a joined transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationMatch {
    pub amount: String,
    pub block_height: u64,
    pub block_hash: String,
}

/// A SourceInit with whatever companion rows exist for its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedTransfer {
    pub init: SourceInit,
    pub destination: Option<DestinationMatch>,
    pub ack: Option<AckResult>,
}

// Every table is keyed by (chain, channel_id, nonce), so each LEFT JOIN matches
// at most one row and the result has exactly one row per SourceInit.
const JOIN_SQL: &str = r#"
    SELECT i.source_chain, i.destination_chain_id, i.channel_id, i.nonce, i.from_address,
           i.amount, i.source_block_height, i.source_block_hash, i.source_extrinsic_index,
           d.amount AS dest_amount,
           d.destination_block_height,
           d.destination_block_hash,
           a.result AS ack_result
    FROM source_inits i
    LEFT JOIN destination_successes d
        ON d.destination_chain = ?2
       AND d.source_chain_id = i.source_chain
       AND d.channel_id = i.channel_id
       AND d.nonce = i.nonce
    LEFT JOIN source_acks a
        ON a.source_chain = i.source_chain
       AND a.destination_chain_id = ?2
       AND a.channel_id = i.channel_id
       AND a.nonce = i.nonce
    WHERE i.source_chain = ?1
      AND i.destination_chain_id = ?2
      AND i.source_block_height >= ?3
      AND i.source_block_height <= ?4
    ORDER BY i.source_block_height, i.source_extrinsic_index, i.channel_id,
             length(i.nonce), i.nonce
"#;

/// Stream every SourceInit of `direction` joined with its deposit and ack,
/// optionally restricted to a source height window.
pub fn stream_joined_transfers<'a>(
    pool: &'a SqlitePool,
    direction: &'a Direction,
    source_heights: Option<(u64, u64)>,
) -> BoxStream<'a, Result<JoinedTransfer, sqlx::Error>> {
    let (low, high) = source_heights.unwrap_or((0, i64::MAX as u64));

    sqlx::query(JOIN_SQL)
        .bind(direction.source.as_str())
        .bind(direction.destination.as_str())
        .bind(to_db_int(low))
        .bind(to_db_int(high))
        .fetch(pool)
        .map(|row| row.and_then(|row| joined_from_row(&row)))
        .boxed()
}

fn joined_from_row(row: &SqliteRow) -> Result<JoinedTransfer, sqlx::Error> {
    let init = source_init_from_row(row)?;

    let dest_amount: Option<String> = row.try_get("dest_amount")?;
    let dest_height: Option<i64> = row.try_get("destination_block_height")?;
    let dest_hash: Option<String> = row.try_get("destination_block_hash")?;
    let destination = match (dest_amount, dest_height, dest_hash) {
        (Some(amount), Some(height), Some(hash)) => Some(DestinationMatch {
            amount,
            block_height: from_db_int(height),
            block_hash: hash,
        }),
        _ => None,
    };

    let ack = row
        .try_get::<Option<String>, _>("ack_result")?
        .map(|label| parse_ack_result(&label))
        .transpose()?;

    Ok(JoinedTransfer {
        init,
        destination,
        ack,
    })
}
