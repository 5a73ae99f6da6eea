use crate::db::{from_db_int, to_db_int};
use crate::models::{ChainId, SourceInit, UpsertOutcome};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};

/// Insert or overwrite the initiation row for `(source_chain, channel_id, nonce)`.
/// Identical data leaves the row untouched.
pub async fn upsert_source_init(
    pool: &SqlitePool,
    init: &SourceInit,
) -> Result<UpsertOutcome, sqlx::Error> {
    // Read and write share one write-locked transaction so the reported
    // previous row is the one this write replaced.
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
    let previous = get_source_init(&mut *tx, &init.source_chain, init.channel_id, &init.nonce).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO source_inits
        (source_chain, destination_chain_id, channel_id, nonce, from_address, amount,
         source_block_height, source_block_hash, source_extrinsic_index)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_chain, channel_id, nonce) DO UPDATE SET
            destination_chain_id = excluded.destination_chain_id,
            from_address = excluded.from_address,
            amount = excluded.amount,
            source_block_height = excluded.source_block_height,
            source_block_hash = excluded.source_block_hash,
            source_extrinsic_index = excluded.source_extrinsic_index
        WHERE source_inits.destination_chain_id IS NOT excluded.destination_chain_id
           OR source_inits.from_address IS NOT excluded.from_address
           OR source_inits.amount IS NOT excluded.amount
           OR source_inits.source_block_height IS NOT excluded.source_block_height
           OR source_inits.source_block_hash IS NOT excluded.source_block_hash
           OR source_inits.source_extrinsic_index IS NOT excluded.source_extrinsic_index
        "#,
    )
    .bind(init.source_chain.as_str())
    .bind(init.destination_chain_id.as_str())
    .bind(to_db_int(init.channel_id))
    .bind(&init.nonce)
    .bind(&init.from_address)
    .bind(&init.amount)
    .bind(to_db_int(init.source_block_height))
    .bind(&init.source_block_hash)
    .bind(init.source_extrinsic_index)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(match (result.rows_affected(), previous) {
        (0, _) => UpsertOutcome::Unchanged,
        (_, None) => UpsertOutcome::Inserted,
        (_, Some(old)) => UpsertOutcome::Replaced {
            previous: format!(
                "from={} amount={} block={}/{} extrinsic={}",
                old.from_address,
                old.amount,
                old.source_block_height,
                old.source_block_hash,
                old.source_extrinsic_index
            ),
        },
    })
}

pub async fn get_source_init<'e, E>(
    executor: E,
    source_chain: &ChainId,
    channel_id: u64,
    nonce: &str,
) -> Result<Option<SourceInit>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"SELECT source_chain, destination_chain_id, channel_id, nonce, from_address, amount,
                  source_block_height, source_block_hash, source_extrinsic_index
           FROM source_inits
           WHERE source_chain = ? AND channel_id = ? AND nonce = ?"#,
    )
    .bind(source_chain.as_str())
    .bind(to_db_int(channel_id))
    .bind(nonce)
    .fetch_optional(executor)
    .await?;

    row.map(|row| source_init_from_row(&row)).transpose()
}

pub async fn count_source_inits(pool: &SqlitePool, source_chain: &ChainId) -> Result<i64, sqlx::Error> {
    let count = sqlx::query("SELECT COUNT(*) FROM source_inits WHERE source_chain = ?")
        .bind(source_chain.as_str())
        .fetch_one(pool)
        .await?
        .get::<i64, _>(0);

    Ok(count)
}

pub(crate) fn source_init_from_row(row: &SqliteRow) -> Result<SourceInit, sqlx::Error> {
    Ok(SourceInit {
        source_chain: ChainId::new(row.try_get::<String, _>("source_chain")?),
        destination_chain_id: ChainId::new(row.try_get::<String, _>("destination_chain_id")?),
        channel_id: from_db_int(row.try_get("channel_id")?),
        nonce: row.try_get("nonce")?,
        from_address: row.try_get("from_address")?,
        amount: row.try_get("amount")?,
        source_block_height: from_db_int(row.try_get("source_block_height")?),
        source_block_hash: row.try_get("source_block_hash")?,
        source_extrinsic_index: row.try_get("source_extrinsic_index")?,
    })
}
