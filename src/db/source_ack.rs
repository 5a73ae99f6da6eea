use crate::db::{from_db_int, to_db_int};
use crate::models::{AckResult, ChainId, SourceAck, UpsertOutcome};
use sqlx::{Executor, Row, Sqlite, SqlitePool};

/// Insert or overwrite the acknowledgment row for `(source_chain, channel_id, nonce)`.
pub async fn upsert_source_ack(
    pool: &SqlitePool,
    ack: &SourceAck,
) -> Result<UpsertOutcome, sqlx::Error> {
    // Read and write share one write-locked transaction so the reported
    // previous row is the one this write replaced.
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
    let previous = get_source_ack(&mut *tx, &ack.source_chain, ack.channel_id, &ack.nonce).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO source_acks
        (source_chain, destination_chain_id, channel_id, nonce, result,
         source_block_height, source_block_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_chain, channel_id, nonce) DO UPDATE SET
            destination_chain_id = excluded.destination_chain_id,
            result = excluded.result,
            source_block_height = excluded.source_block_height,
            source_block_hash = excluded.source_block_hash
        WHERE source_acks.destination_chain_id IS NOT excluded.destination_chain_id
           OR source_acks.result IS NOT excluded.result
           OR source_acks.source_block_height IS NOT excluded.source_block_height
           OR source_acks.source_block_hash IS NOT excluded.source_block_hash
        "#,
    )
    .bind(ack.source_chain.as_str())
    .bind(ack.destination_chain_id.as_str())
    .bind(to_db_int(ack.channel_id))
    .bind(&ack.nonce)
    .bind(ack.result.as_str())
    .bind(to_db_int(ack.source_block_height))
    .bind(&ack.source_block_hash)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(match (result.rows_affected(), previous) {
        (0, _) => UpsertOutcome::Unchanged,
        (_, None) => UpsertOutcome::Inserted,
        (_, Some(old)) => UpsertOutcome::Replaced {
            previous: format!(
                "result={} block={}/{}",
                old.result.as_str(),
                old.source_block_height,
                old.source_block_hash
            ),
        },
    })
}

pub async fn get_source_ack<'e, E>(
    executor: E,
    source_chain: &ChainId,
    channel_id: u64,
    nonce: &str,
) -> Result<Option<SourceAck>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"SELECT source_chain, destination_chain_id, channel_id, nonce, result,
                  source_block_height, source_block_hash
           FROM source_acks
           WHERE source_chain = ? AND channel_id = ? AND nonce = ?"#,
    )
    .bind(source_chain.as_str())
    .bind(to_db_int(channel_id))
    .bind(nonce)
    .fetch_optional(executor)
    .await?;

    row.map(|row| -> Result<SourceAck, sqlx::Error> {
        let result: String = row.try_get("result")?;
        Ok(SourceAck {
            source_chain: ChainId::new(row.try_get::<String, _>("source_chain")?),
            destination_chain_id: ChainId::new(row.try_get::<String, _>("destination_chain_id")?),
            channel_id: from_db_int(row.try_get("channel_id")?),
            nonce: row.try_get("nonce")?,
            result: parse_ack_result(&result)?,
            source_block_height: from_db_int(row.try_get("source_block_height")?),
            source_block_hash: row.try_get("source_block_hash")?,
        })
    })
    .transpose()
}

pub(crate) fn parse_ack_result(label: &str) -> Result<AckResult, sqlx::Error> {
    AckResult::from_label(label)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown ack result {:?}", label).into()))
}
