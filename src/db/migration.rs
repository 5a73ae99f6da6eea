use sqlx::SqlitePool;
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS source_inits (
        source_chain TEXT NOT NULL,
        destination_chain_id TEXT NOT NULL,
        channel_id INTEGER NOT NULL,
        nonce TEXT NOT NULL,
        from_address TEXT NOT NULL,
        amount TEXT NOT NULL,
        source_block_height INTEGER NOT NULL,
        source_block_hash TEXT NOT NULL,
        source_extrinsic_index INTEGER NOT NULL,
        PRIMARY KEY (source_chain, channel_id, nonce)
    )",
    "CREATE TABLE IF NOT EXISTS destination_successes (
        destination_chain TEXT NOT NULL,
        source_chain_id TEXT NOT NULL,
        channel_id INTEGER NOT NULL,
        nonce TEXT NOT NULL,
        amount TEXT NOT NULL,
        destination_block_height INTEGER NOT NULL,
        destination_block_hash TEXT NOT NULL,
        PRIMARY KEY (destination_chain, channel_id, nonce)
    )",
    "CREATE TABLE IF NOT EXISTS source_acks (
        source_chain TEXT NOT NULL,
        destination_chain_id TEXT NOT NULL,
        channel_id INTEGER NOT NULL,
        nonce TEXT NOT NULL,
        result TEXT NOT NULL CHECK (result IN ('Ok', 'Err')),
        source_block_height INTEGER NOT NULL,
        source_block_hash TEXT NOT NULL,
        PRIMARY KEY (source_chain, channel_id, nonce)
    )",
    "CREATE TABLE IF NOT EXISTS scan_progress (
        chain TEXT PRIMARY KEY,
        first_height INTEGER NOT NULL,
        last_height INTEGER NOT NULL CHECK (last_height >= first_height),
        updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    )",
    "CREATE TABLE IF NOT EXISTS event_failures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chain TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        extrinsic_index INTEGER,
        event_kind TEXT NOT NULL,
        reason TEXT NOT NULL,
        recorded_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_source_inits_direction
     ON source_inits(source_chain, destination_chain_id, source_block_height)",
    "CREATE INDEX IF NOT EXISTS idx_event_failures_chain
     ON event_failures(chain, block_height)",
    // Reprocessing a block must not duplicate its diagnostics.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_event_failures_unique
     ON event_failures(chain, block_height, block_hash, COALESCE(extrinsic_index, -1), event_kind, reason)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Database migrations completed successfully");
    Ok(())
}
