pub mod connection;
pub mod correlation;
pub mod destination_success;
pub mod failure;
pub mod migration;
pub mod progress;
pub mod source_ack;
pub mod source_init;

/// SQLite stores integers as i64; heights and channel ids are u64 on chain.
///
/// Values above `i64::MAX` keep their bit pattern and read back unchanged,
/// but compare wrongly in SQL. Heights never get there: scan windows end at
/// or below [`MAX_HEIGHT`](crate::blockchain::worker_pool::MAX_HEIGHT).
pub(crate) fn to_db_int(value: u64) -> i64 {
    value as i64
}

pub(crate) fn from_db_int(value: i64) -> u64 {
    value as u64
}
