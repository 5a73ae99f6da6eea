// Store rows for the three bridge event kinds, scan diagnostics and the
// correlator's output record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a chain as other chains refer to it in bridge events,
/// e.g. `consensus` or `domain:0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ChainId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInit {
    pub source_chain: ChainId,
    pub destination_chain_id: ChainId,
    pub channel_id: u64,
    pub nonce: String,
    pub from_address: String,
    pub amount: String,
    pub source_block_height: u64,
    pub source_block_hash: String,
    pub source_extrinsic_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSuccess {
    pub destination_chain: ChainId,
    pub source_chain_id: ChainId,
    pub channel_id: u64,
    pub nonce: String,
    pub amount: String,
    pub destination_block_height: u64,
    pub destination_block_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckResult {
    Ok,
    Err,
}

impl AckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckResult::Ok => "Ok",
            AckResult::Err => "Err",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Ok" => Some(AckResult::Ok),
            "Err" => Some(AckResult::Err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAck {
    pub source_chain: ChainId,
    pub destination_chain_id: ChainId,
    pub channel_id: u64,
    pub nonce: String,
    pub result: AckResult,
    pub source_block_height: u64,
    pub source_block_hash: String,
}

/// Persisted scan cursor: every height in `first_height..=last_height` has
/// been processed for `chain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub chain: ChainId,
    pub first_height: u64,
    pub last_height: u64,
}

impl ScanProgress {
    /// Where a scan of `start..` picks up: right after the covered run when
    /// `start` falls inside it or just past it, otherwise `start` itself.
    pub fn resume_point(&self, start: u64) -> u64 {
        if self.first_height <= start && start <= self.last_height.saturating_add(1) {
            self.last_height.saturating_add(1)
        } else {
            start
        }
    }
}

/// Diagnostic row for an event that could not be safely attributed, or for
/// an upsert that replaced previously stored values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFailure {
    pub chain: ChainId,
    pub block_height: u64,
    pub block_hash: String,
    pub extrinsic_index: Option<u32>,
    pub event_kind: String,
    pub reason: String,
}

/// Stored failure as read back, with its insertion id and timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedFailure {
    pub id: i64,
    #[serde(flatten)]
    pub failure: EventFailure,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// What an upsert did to the row stored under its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
    /// Stored values differed; `previous` summarises what was overwritten.
    Replaced { previous: String },
}

/// Ordered chain pair: transfers initiated on `source`, deposited on
/// `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Direction {
    pub source: ChainId,
    pub destination: ChainId,
}

impl Direction {
    pub fn new(source: impl Into<ChainId>, destination: impl Into<ChainId>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.destination)
    }
}

impl Serialize for Direction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("->") {
            Some((src, dst)) if !src.trim().is_empty() && !dst.trim().is_empty() => {
                Ok(Direction::new(src.trim(), dst.trim()))
            }
            _ => Err(format!("direction must look like SOURCE->DESTINATION, got {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfirmationMode {
    DestOnly,
    AckOnly,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmedBy {
    Dest,
    Ack,
    Both,
}

/// One confirmed transfer, emitted by the correlator as a JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedTransfer {
    pub direction: Direction,
    pub from: String,
    pub channel_id: u64,
    pub nonce: String,
    pub amount: String,
    pub source_block_height: u64,
    pub source_block_hash: String,
    pub source_extrinsic_index: u32,
    pub destination_block_height: Option<u64>,
    pub destination_block_hash: Option<String>,
    pub confirmed_by: ConfirmedBy,
}
