use crate::db::{from_db_int, to_db_int};
use crate::models::{ChainId, EventFailure, RecordedFailure};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Append a diagnostic row. Failures are never updated or deleted, and an
/// identical failure for the same block is recorded once. Returns whether a
/// row was added.
pub async fn record_failure(pool: &SqlitePool, failure: &EventFailure) -> Result<bool, sqlx::Error> {
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO event_failures
        (chain, block_height, block_hash, extrinsic_index, event_kind, reason, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(failure.chain.as_str())
    .bind(to_db_int(failure.block_height))
    .bind(&failure.block_hash)
    .bind(failure.extrinsic_index)
    .bind(&failure.event_kind)
    .bind(&failure.reason)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_failures(
    pool: &SqlitePool,
    chain: &ChainId,
) -> Result<Vec<RecordedFailure>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, chain, block_height, block_hash, extrinsic_index, event_kind, reason, recorded_at
           FROM event_failures
           WHERE chain = ?
           ORDER BY block_height ASC, id ASC"#,
    )
    .bind(chain.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<RecordedFailure, sqlx::Error> {
            let recorded_at: i64 = row.try_get("recorded_at")?;
            Ok(RecordedFailure {
                id: row.try_get("id")?,
                failure: EventFailure {
                    chain: ChainId::new(row.try_get::<String, _>("chain")?),
                    block_height: from_db_int(row.try_get("block_height")?),
                    block_hash: row.try_get("block_hash")?,
                    extrinsic_index: row.try_get("extrinsic_index")?,
                    event_kind: row.try_get("event_kind")?,
                    reason: row.try_get("reason")?,
                },
                recorded_at: DateTime::<Utc>::from_timestamp(recorded_at, 0).unwrap_or_default(),
            })
        })
        .collect()
}

pub async fn count_failures(pool: &SqlitePool, chain: &ChainId) -> Result<i64, sqlx::Error> {
    let count = sqlx::query("SELECT COUNT(*) FROM event_failures WHERE chain = ?")
        .bind(chain.as_str())
        .fetch_one(pool)
        .await?
        .get::<i64, _>(0);

    Ok(count)
}
