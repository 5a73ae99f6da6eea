//! Offline join of initiations against deposits and acknowledgments.
//!
//! The correlator keeps no state between runs: every invocation recomputes
//! the confirmed set from whatever the store holds.

use crate::db::correlation::{stream_joined_transfers, JoinedTransfer};
use crate::error::AppError;
use crate::models::{AckResult, ConfirmationMode, ConfirmedBy, Direction, MatchedTransfer};
use futures::TryStreamExt;
use sqlx::SqlitePool;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

/// Which companion events confirm a transfer under `mode`, or `None` if the
/// transfer is unconfirmed.
pub fn confirmation(mode: ConfirmationMode, has_deposit: bool, ack_ok: bool) -> Option<ConfirmedBy> {
    match mode {
        ConfirmationMode::DestOnly => has_deposit.then_some(ConfirmedBy::Dest),
        ConfirmationMode::AckOnly => ack_ok.then_some(ConfirmedBy::Ack),
        ConfirmationMode::Both => match (has_deposit, ack_ok) {
            (true, true) => Some(ConfirmedBy::Both),
            (true, false) => Some(ConfirmedBy::Dest),
            (false, true) => Some(ConfirmedBy::Ack),
            (false, false) => None,
        },
    }
}

/// Build the output record for a joined row, if `mode` confirms it. The
/// deposit amount wins over the initiated amount since it reflects what
/// actually arrived.
pub fn match_transfer(
    direction: &Direction,
    mode: ConfirmationMode,
    joined: JoinedTransfer,
) -> Option<MatchedTransfer> {
    let ack_ok = joined.ack == Some(AckResult::Ok);
    let confirmed_by = confirmation(mode, joined.destination.is_some(), ack_ok)?;
    let init = joined.init;

    let (amount, destination_block_height, destination_block_hash) = match joined.destination {
        Some(dest) => (dest.amount, Some(dest.block_height), Some(dest.block_hash)),
        None => (init.amount, None, None),
    };

    Some(MatchedTransfer {
        direction: direction.clone(),
        from: init.from_address,
        channel_id: init.channel_id,
        nonce: init.nonce,
        amount,
        source_block_height: init.source_block_height,
        source_block_hash: init.source_block_hash,
        source_extrinsic_index: init.source_extrinsic_index,
        destination_block_height,
        destination_block_hash,
        confirmed_by,
    })
}

pub struct Correlator {
    pool: SqlitePool,
}

impl Correlator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All confirmed transfers of `direction`, in source block order.
    pub async fn matched(
        &self,
        direction: &Direction,
        mode: ConfirmationMode,
        source_heights: Option<(u64, u64)>,
    ) -> Result<Vec<MatchedTransfer>, sqlx::Error> {
        stream_joined_transfers(&self.pool, direction, source_heights)
            .try_filter_map(|joined| async move { Ok(match_transfer(direction, mode, joined)) })
            .try_collect()
            .await
    }

    /// Write confirmed transfers as JSON lines, one record per line. Returns
    /// the number of records written.
    pub async fn write_json_lines<W>(
        &self,
        direction: &Direction,
        mode: ConfirmationMode,
        source_heights: Option<(u64, u64)>,
        out: &mut W,
    ) -> Result<usize, AppError>
    where
        W: AsyncWrite + Unpin,
    {
        info!("Correlating {} with mode {:?}", direction, mode);
        let mut rows = stream_joined_transfers(&self.pool, direction, source_heights);
        let mut scanned = 0usize;
        let mut written = 0usize;

        while let Some(joined) = rows.try_next().await? {
            scanned += 1;
            if let Some(matched) = match_transfer(direction, mode, joined) {
                let mut line = serde_json::to_vec(&matched)?;
                line.push(b'\n');
                out.write_all(&line).await?;
                written += 1;
            }
        }
        out.flush().await?;

        info!(
            "{}: {} of {} initiated transfers confirmed",
            direction, written, scanned
        );
        Ok(written)
    }
}
