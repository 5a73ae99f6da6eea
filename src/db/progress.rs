use crate::db::{from_db_int, to_db_int};
use crate::models::{ChainId, ScanProgress};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Contiguous processed run for `chain`, if any.
pub async fn get_progress(
    pool: &SqlitePool,
    chain: &ChainId,
) -> Result<Option<ScanProgress>, sqlx::Error> {
    let row = sqlx::query("SELECT chain, first_height, last_height FROM scan_progress WHERE chain = ?")
        .bind(chain.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(|row| progress_from_row(&row)).transpose()
}

/// Record that `run_start..=height` has been processed for `chain`.
///
/// A run that overlaps or touches the stored one is merged into it. A run
/// entirely above it replaces it. A run entirely below it is not recorded
/// until it reaches the stored run. `last_height` never decreases. Returns
/// whether the stored row changed.
pub async fn advance_progress(
    pool: &SqlitePool,
    chain: &ChainId,
    run_start: u64,
    height: u64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO scan_progress (chain, first_height, last_height, updated_at)
        VALUES (?1, ?2, ?3, strftime('%s', 'now'))
        ON CONFLICT(chain) DO UPDATE SET
            first_height = CASE
                WHEN excluded.first_height <= scan_progress.last_height + 1
                    THEN MIN(scan_progress.first_height, excluded.first_height)
                ELSE excluded.first_height
            END,
            last_height = MAX(scan_progress.last_height, excluded.last_height),
            updated_at = excluded.updated_at
        WHERE excluded.last_height > scan_progress.last_height
           OR (excluded.first_height < scan_progress.first_height
               AND excluded.last_height + 1 >= scan_progress.first_height)
        "#,
    )
    .bind(chain.as_str())
    .bind(to_db_int(run_start))
    .bind(to_db_int(height))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_progress(pool: &SqlitePool) -> Result<Vec<ScanProgress>, sqlx::Error> {
    let rows = sqlx::query("SELECT chain, first_height, last_height FROM scan_progress ORDER BY chain")
        .fetch_all(pool)
        .await?;

    rows.iter().map(progress_from_row).collect()
}

fn progress_from_row(row: &SqliteRow) -> Result<ScanProgress, sqlx::Error> {
    Ok(ScanProgress {
        chain: ChainId::new(row.try_get::<String, _>("chain")?),
        first_height: from_db_int(row.try_get("first_height")?),
        last_height: from_db_int(row.try_get("last_height")?),
    })
}
