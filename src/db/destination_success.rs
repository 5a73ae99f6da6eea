use crate::db::{from_db_int, to_db_int};
use crate::models::{ChainId, DestinationSuccess, UpsertOutcome};
use sqlx::{Executor, Row, Sqlite, SqlitePool};

/// Insert or overwrite the deposit row for `(destination_chain, channel_id, nonce)`.
pub async fn upsert_destination_success(
    pool: &SqlitePool,
    success: &DestinationSuccess,
) -> Result<UpsertOutcome, sqlx::Error> {
    // Read and write share one write-locked transaction so the reported
    // previous row is the one this write replaced.
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
    let previous = get_destination_success(
        &mut *tx,
        &success.destination_chain,
        success.channel_id,
        &success.nonce,
    )
    .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO destination_successes
        (destination_chain, source_chain_id, channel_id, nonce, amount,
         destination_block_height, destination_block_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(destination_chain, channel_id, nonce) DO UPDATE SET
            source_chain_id = excluded.source_chain_id,
            amount = excluded.amount,
            destination_block_height = excluded.destination_block_height,
            destination_block_hash = excluded.destination_block_hash
        WHERE destination_successes.source_chain_id IS NOT excluded.source_chain_id
           OR destination_successes.amount IS NOT excluded.amount
           OR destination_successes.destination_block_height IS NOT excluded.destination_block_height
           OR destination_successes.destination_block_hash IS NOT excluded.destination_block_hash
        "#,
    )
    .bind(success.destination_chain.as_str())
    .bind(success.source_chain_id.as_str())
    .bind(to_db_int(success.channel_id))
    .bind(&success.nonce)
    .bind(&success.amount)
    .bind(to_db_int(success.destination_block_height))
    .bind(&success.destination_block_hash)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(match (result.rows_affected(), previous) {
        (0, _) => UpsertOutcome::Unchanged,
        (_, None) => UpsertOutcome::Inserted,
        (_, Some(old)) => UpsertOutcome::Replaced {
            previous: format!(
                "source={} amount={} block={}/{}",
                old.source_chain_id,
                old.amount,
                old.destination_block_height,
                old.destination_block_hash
            ),
        },
    })
}

pub async fn get_destination_success<'e, E>(
    executor: E,
    destination_chain: &ChainId,
    channel_id: u64,
    nonce: &str,
) -> Result<Option<DestinationSuccess>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"SELECT destination_chain, source_chain_id, channel_id, nonce, amount,
                  destination_block_height, destination_block_hash
           FROM destination_successes
           WHERE destination_chain = ? AND channel_id = ? AND nonce = ?"#,
    )
    .bind(destination_chain.as_str())
    .bind(to_db_int(channel_id))
    .bind(nonce)
    .fetch_optional(executor)
    .await?;

    row.map(|row| -> Result<DestinationSuccess, sqlx::Error> {
        Ok(DestinationSuccess {
            destination_chain: ChainId::new(row.try_get::<String, _>("destination_chain")?),
            source_chain_id: ChainId::new(row.try_get::<String, _>("source_chain_id")?),
            channel_id: from_db_int(row.try_get("channel_id")?),
            nonce: row.try_get("nonce")?,
            amount: row.try_get("amount")?,
            destination_block_height: from_db_int(row.try_get("destination_block_height")?),
            destination_block_hash: row.try_get("destination_block_hash")?,
        })
    })
    .transpose()
}
