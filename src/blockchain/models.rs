use crate::models::{AckResult, ChainId};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// A block as seen by the scanner: its hash and the signer of every extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub extrinsics: Vec<Extrinsic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extrinsic {
    pub index: u32,
    /// `None` for unsigned extrinsics (inherents, unsigned transactions).
    pub signer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ApplyExtrinsic(u32),
    Initialization,
    Finalization,
    /// Any phase this decoder does not know (e.g. `onIdle`).
    Other,
}

/// One decoded entry of a block's event list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Position in the block's full event list; stable across segments.
    /// `None` when the service sent no usable index.
    pub index: Option<u32>,
    pub phase: Phase,
    pub event: ChainEvent,
}

/// Bridge events the scanner cares about. Anything else decodes to `Other`;
/// a relevant event whose payload does not decode becomes `Undecodable` so the
/// failure stays attached to that single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    OutgoingTransferInitiated {
        destination_chain_id: ChainId,
        channel_id: u64,
        nonce: String,
        amount: String,
    },
    IncomingTransferSuccessful {
        source_chain_id: ChainId,
        channel_id: u64,
        nonce: String,
        amount: String,
    },
    OutboxMessageResult {
        destination_chain_id: ChainId,
        channel_id: u64,
        nonce: String,
        result: AckResult,
    },
    Undecodable {
        name: String,
        reason: String,
    },
    Other,
}

pub const OUTGOING_TRANSFER_INITIATED: &str = "OutgoingTransferInitiated";
pub const INCOMING_TRANSFER_SUCCESSFUL: &str = "IncomingTransferSuccessful";
pub const OUTBOX_MESSAGE_RESULT: &str = "OutboxMessageResult";

// Wire format of the block/events service.

#[derive(Debug, Deserialize)]
pub struct WireBlock {
    #[serde(deserialize_with = "de_u64")]
    pub number: u64,
    pub hash: String,
    #[serde(default)]
    pub extrinsics: Vec<WireExtrinsic>,
}

#[derive(Debug, Deserialize)]
pub struct WireExtrinsic {
    #[serde(default)]
    pub signature: Option<WireSignature>,
}

#[derive(Debug, Deserialize)]
pub struct WireSignature {
    pub signer: WireSigner,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireSigner {
    Id { id: Option<String> },
    Plain(String),
}

#[derive(Debug)]
pub struct WireMethod {
    pub pallet: String,
    pub method: String,
}

/// Events stay raw JSON here; each entry is decoded on its own by
/// [`decode_event_record`] so one odd event cannot fail the page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEventPage {
    pub events: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct WireHead {
    #[serde(deserialize_with = "de_u64")]
    pub number: u64,
}

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    decode_uint(&value)
        .and_then(|v| u64::try_from(v).map_err(|_| format!("{} does not fit in u64", v)))
        .map_err(serde::de::Error::custom)
}

impl From<WireBlock> for Block {
    fn from(wire: WireBlock) -> Self {
        let extrinsics = wire
            .extrinsics
            .into_iter()
            .enumerate()
            .map(|(index, ext)| Extrinsic {
                index: index as u32,
                signer: ext.signature.and_then(|sig| match sig.signer {
                    WireSigner::Id { id } => id,
                    WireSigner::Plain(id) => Some(id),
                }),
            })
            .collect();

        Block {
            height: wire.number,
            hash: wire.hash,
            extrinsics,
        }
    }
}

/// Decode one raw entry of an event page. Never fails: an entry whose
/// method cannot be read becomes `Undecodable`, an unknown phase becomes
/// `Phase::Other`.
pub fn decode_event_record(raw: &Value) -> EventRecord {
    let index = raw
        .get("index")
        .and_then(|v| decode_uint(v).ok())
        .and_then(|v| u32::try_from(v).ok());
    let phase = raw.get("phase").map(decode_phase).unwrap_or(Phase::Other);

    let event = match raw.get("method").and_then(decode_method) {
        Some(method) => decode_event(&method, raw.get("data").unwrap_or(&Value::Null)),
        None => ChainEvent::Undecodable {
            name: "unknown".to_string(),
            reason: "event has no readable pallet/method".to_string(),
        },
    };

    EventRecord { index, phase, event }
}

fn decode_method(value: &Value) -> Option<WireMethod> {
    Some(WireMethod {
        pallet: value.get("pallet")?.as_str()?.to_string(),
        method: value.get("method")?.as_str()?.to_string(),
    })
}

/// `"initialization"`, `"finalization"` or `{"applyExtrinsic": n}`.
pub fn decode_phase(value: &Value) -> Phase {
    match value {
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "initialization" => Phase::Initialization,
            "finalization" => Phase::Finalization,
            _ => Phase::Other,
        },
        Value::Object(map) if map.len() == 1 => match map.iter().next() {
            Some((tag, inner)) if tag.eq_ignore_ascii_case("applyExtrinsic") => decode_uint(inner)
                .ok()
                .and_then(|i| u32::try_from(i).ok())
                .map(Phase::ApplyExtrinsic)
                .unwrap_or(Phase::Other),
            _ => Phase::Other,
        },
        _ => Phase::Other,
    }
}

/// Decode a raw event into the bridge event model.
pub fn decode_event(method: &WireMethod, data: &Value) -> ChainEvent {
    let decoded = match (method.pallet.to_ascii_lowercase().as_str(), method.method.as_str()) {
        ("transporter", OUTGOING_TRANSFER_INITIATED) => decode_transfer(data).map(
            |(chain_id, channel_id, nonce, amount)| ChainEvent::OutgoingTransferInitiated {
                destination_chain_id: chain_id,
                channel_id,
                nonce,
                amount,
            },
        ),
        ("transporter", INCOMING_TRANSFER_SUCCESSFUL) => decode_transfer(data).map(
            |(chain_id, channel_id, nonce, amount)| ChainEvent::IncomingTransferSuccessful {
                source_chain_id: chain_id,
                channel_id,
                nonce,
                amount,
            },
        ),
        ("messenger", OUTBOX_MESSAGE_RESULT) => decode_outbox_result(data),
        _ => return ChainEvent::Other,
    };

    decoded.unwrap_or_else(|reason| ChainEvent::Undecodable {
        name: method.method.clone(),
        reason,
    })
}

// Event fields arrive either positionally or by name.
fn field<'a>(data: &'a Value, position: usize, name: &str) -> Result<&'a Value, String> {
    let found = match data {
        Value::Array(items) => items.get(position),
        Value::Object(map) => map.get(name),
        _ => None,
    };
    found.ok_or_else(|| format!("missing field {}", name))
}

fn decode_transfer(data: &Value) -> Result<(ChainId, u64, String, String), String> {
    let chain_id = decode_chain_id(field(data, 0, "chain_id")?)?;
    let (channel_id, nonce) = decode_message_id(field(data, 1, "message_id")?)?;
    let amount = decode_uint(field(data, 2, "amount")?)?.to_string();
    Ok((chain_id, channel_id, nonce, amount))
}

fn decode_outbox_result(data: &Value) -> Result<ChainEvent, String> {
    let destination_chain_id = decode_chain_id(field(data, 0, "chain_id")?)?;
    let channel_id = decode_channel_id(field(data, 1, "channel_id")?)?;
    let nonce = decode_uint(field(data, 2, "nonce")?)?.to_string();
    let result = decode_ack_result(field(data, 3, "result")?)?;
    Ok(ChainEvent::OutboxMessageResult {
        destination_chain_id,
        channel_id,
        nonce,
        result,
    })
}

/// `Consensus` / `{"consensus": null}` -> `consensus`,
/// `{"domain": 0}` -> `domain:0`.
pub fn decode_chain_id(value: &Value) -> Result<ChainId, String> {
    match value {
        Value::String(s) if s.eq_ignore_ascii_case("consensus") => Ok(ChainId::new("consensus")),
        Value::Object(map) if map.len() == 1 => {
            let (tag, inner) = map.iter().next().ok_or("empty chain id")?;
            match tag.to_ascii_lowercase().as_str() {
                "consensus" => Ok(ChainId::new("consensus")),
                "domain" => Ok(ChainId::new(format!("domain:{}", decode_uint(inner)?))),
                other => Err(format!("unknown chain id variant {}", other)),
            }
        }
        other => Err(format!("unrecognised chain id {}", other)),
    }
}

fn decode_message_id(value: &Value) -> Result<(u64, String), String> {
    match value {
        Value::Array(parts) if parts.len() == 2 => Ok((
            decode_channel_id(&parts[0])?,
            decode_uint(&parts[1])?.to_string(),
        )),
        other => Err(format!("message id must be [channel_id, nonce], got {}", other)),
    }
}

fn decode_channel_id(value: &Value) -> Result<u64, String> {
    let raw = decode_uint(value)?;
    u64::try_from(raw).map_err(|_| format!("channel id {} out of range", raw))
}

/// Unsigned integers arrive as JSON numbers, decimal strings or `0x` hex.
pub fn decode_uint(value: &Value) -> Result<u128, String> {
    match value {
        Value::Number(n) => n
            .as_u128()
            .ok_or_else(|| format!("not an unsigned integer: {}", n)),
        Value::String(s) => {
            let s = s.trim().replace(',', "");
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u128::from_str_radix(hex, 16),
                None => s.parse::<u128>(),
            };
            parsed.map_err(|e| format!("invalid integer {:?}: {}", s, e))
        }
        other => Err(format!("not an unsigned integer: {}", other)),
    }
}

fn decode_ack_result(value: &Value) -> Result<AckResult, String> {
    let tag = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) if map.len() == 1 => map.keys().next().map(String::as_str).unwrap_or(""),
        other => return Err(format!("unrecognised outbox result {}", other)),
    };
    match tag.to_ascii_lowercase().as_str() {
        "ok" => Ok(AckResult::Ok),
        "err" => Ok(AckResult::Err),
        other => Err(format!("unknown outbox result variant {}", other)),
    }
}

/// Merge segmented event pages into one ordered list. Segments may overlap;
/// the first copy of each event index wins. Entries without an index cannot
/// be matched across segments and are kept, after the indexed ones.
pub fn flatten_segments(segments: Vec<Vec<EventRecord>>) -> Vec<EventRecord> {
    let mut by_index = BTreeMap::new();
    let mut unindexed = Vec::new();
    for record in segments.into_iter().flatten() {
        match record.index {
            Some(index) => {
                by_index.entry(index).or_insert(record);
            }
            None => unindexed.push(record),
        }
    }
    by_index.into_values().chain(unindexed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn method(pallet: &str, name: &str) -> WireMethod {
        WireMethod {
            pallet: pallet.to_string(),
            method: name.to_string(),
        }
    }

    #[test]
    fn decodes_positional_outgoing_transfer() {
        let data = json!([{"domain": 0}, [1, "0x05"], "100"]);
        let event = decode_event(&method("transporter", OUTGOING_TRANSFER_INITIATED), &data);
        assert_eq!(
            event,
            ChainEvent::OutgoingTransferInitiated {
                destination_chain_id: ChainId::new("domain:0"),
                channel_id: 1,
                nonce: "5".to_string(),
                amount: "100".to_string(),
            }
        );
    }

    #[test]
    fn decodes_named_outbox_result() {
        let data = json!({
            "chain_id": "Consensus",
            "channel_id": "2",
            "nonce": 9,
            "result": {"err": {"module": {}}}
        });
        let event = decode_event(&method("Messenger", OUTBOX_MESSAGE_RESULT), &data);
        assert_eq!(
            event,
            ChainEvent::OutboxMessageResult {
                destination_chain_id: ChainId::new("consensus"),
                channel_id: 2,
                nonce: "9".to_string(),
                result: AckResult::Err,
            }
        );
    }

    #[test]
    fn malformed_payload_is_undecodable_not_dropped() {
        let data = json!([{"domain": 0}, "not-a-message-id", "100"]);
        match decode_event(&method("transporter", INCOMING_TRANSFER_SUCCESSFUL), &data) {
            ChainEvent::Undecodable { name, .. } => assert_eq!(name, INCOMING_TRANSFER_SUCCESSFUL),
            other => panic!("expected undecodable, got {:?}", other),
        }
    }

    #[test]
    fn unrelated_events_are_other() {
        let event = decode_event(&method("balances", "Transfer"), &json!([]));
        assert_eq!(event, ChainEvent::Other);
    }

    #[test]
    fn flatten_segments_dedups_overlap_and_orders() {
        let record = |index| EventRecord {
            index: Some(index),
            phase: Phase::Finalization,
            event: ChainEvent::Other,
        };
        let flat = flatten_segments(vec![
            vec![record(0), record(1), record(2)],
            vec![record(2), record(3)],
            vec![record(5), record(4)],
        ]);
        let indices: Vec<u32> = flat.iter().filter_map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn odd_entries_do_not_fail_the_page() {
        let page: WireEventPage = serde_json::from_value(json!({
            "events": [
                {
                    "index": 0,
                    "phase": {"applyExtrinsic": 1},
                    "method": {"pallet": "transporter", "method": "OutgoingTransferInitiated"},
                    "data": [{"domain": 0}, [1, 5], "100"]
                },
                {"index": 1, "phase": "onIdle", "method": {"pallet": "system", "method": "Remarked"}},
                {"phase": "finalization", "method": "System.Weird"},
                {
                    "index": 3,
                    "phase": {"applyExtrinsic": 0},
                    "method": {"pallet": "transporter", "method": "OutgoingTransferInitiated"},
                    "data": "garbage"
                }
            ]
        }))
        .unwrap();

        let records: Vec<EventRecord> = page.events.iter().map(decode_event_record).collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].phase, Phase::ApplyExtrinsic(1));
        assert!(matches!(records[0].event, ChainEvent::OutgoingTransferInitiated { channel_id: 1, .. }));
        assert_eq!(records[1].phase, Phase::Other);
        assert_eq!(records[1].event, ChainEvent::Other);
        assert_eq!(records[2].index, None);
        assert!(matches!(records[2].event, ChainEvent::Undecodable { .. }));
        assert_eq!(records[3].index, Some(3));
        assert!(matches!(
            &records[3].event,
            ChainEvent::Undecodable { name, .. } if name == OUTGOING_TRANSFER_INITIATED
        ));
    }

    #[test]
    fn unindexed_records_survive_flattening() {
        let indexed = EventRecord {
            index: Some(0),
            phase: Phase::Finalization,
            event: ChainEvent::Other,
        };
        let unindexed = EventRecord {
            index: None,
            phase: Phase::Other,
            event: ChainEvent::Undecodable {
                name: "unknown".to_string(),
                reason: "no method".to_string(),
            },
        };
        let flat = flatten_segments(vec![vec![unindexed.clone(), indexed.clone()], vec![indexed.clone()]]);
        assert_eq!(flat, vec![indexed, unindexed]);
    }

    #[test]
    fn uints_beyond_u64_and_upper_hex() {
        let big = u128::from(u64::MAX) * 1000;
        let number: Value = serde_json::from_str(&big.to_string()).unwrap();
        assert_eq!(decode_uint(&number).unwrap(), big);
        assert_eq!(decode_uint(&json!("0X1F")).unwrap(), 31);
        assert_eq!(decode_uint(&json!("1,000")).unwrap(), 1000);
        assert!(decode_uint(&json!(-1)).is_err());
        assert!(decode_uint(&json!(1.5)).is_err());
    }

    #[test]
    fn wire_block_resolves_signers() {
        let wire: WireBlock = serde_json::from_value(json!({
            "number": "10",
            "hash": "0xabc",
            "extrinsics": [
                {"signature": null},
                {"signature": {"signer": {"id": "addrA"}}}
            ]
        }))
        .unwrap();
        let block = Block::from(wire);
        assert_eq!(block.height, 10);
        assert_eq!(block.extrinsics[0].signer, None);
        assert_eq!(block.extrinsics[1].signer.as_deref(), Some("addrA"));
    }
}
