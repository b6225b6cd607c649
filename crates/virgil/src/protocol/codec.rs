// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch encode/decode: UTF-8 JSON, one batch per datagram, 4 KiB cap.
//!
//! Envelope faults (undecodable payload, missing `transmittingDevice`,
//! missing or empty `messages`) fail the whole batch; per-message faults
//! decode to [`Message::Malformed`] so the rest of the batch still
//! processes in array order. Unknown fields inside known messages ride
//! along in the raw maps.

use crate::config::MAX_DATAGRAM_BYTES;
use crate::error::{Error, Result};
use crate::protocol::{Batch, ErrorValue, Message};
use serde_json::{Map, Value};

/// Envelope-level decode fault; replied to the sender as a single
/// `MalformedMessage` error batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedBatch {
    pub detail: String,
}

impl MalformedBatch {
    fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}

/// Decode one datagram payload into a batch.
pub fn decode_batch(payload: &[u8]) -> std::result::Result<Batch, MalformedBatch> {
    let root: Value = serde_json::from_slice(payload)
        .map_err(|_| MalformedBatch::new("Invalid JSON payload"))?;
    let Some(obj) = root.as_object() else {
        return Err(MalformedBatch::new("Payload is not a JSON object"));
    };

    let transmitting_device = obj
        .get("transmittingDevice")
        .and_then(Value::as_str)
        .ok_or_else(|| MalformedBatch::new("Missing 'transmittingDevice' field"))?
        .to_string();
    let receiving_device = obj
        .get("receivingDevice")
        .and_then(Value::as_str)
        .map(str::to_string);

    let Some(messages) = obj.get("messages").and_then(Value::as_array) else {
        return Err(MalformedBatch::new("Missing 'messages' array"));
    };
    if messages.is_empty() {
        return Err(MalformedBatch::new("Empty messages array"));
    }

    Ok(Batch {
        transmitting_device,
        receiving_device,
        messages: messages.iter().map(decode_message).collect(),
    })
}

fn decode_message(value: &Value) -> Message {
    let Some(obj) = value.as_object() else {
        return Message::Malformed {
            detail: "Message entry is not an object".to_string(),
        };
    };
    let Some(message_type) = obj.get("messageType").and_then(Value::as_str) else {
        return Message::Malformed {
            detail: "Missing messageType".to_string(),
        };
    };

    match message_type {
        "ParameterRequest" => match channel_index(obj) {
            // A request without a scope targets the device level.
            None if !obj.contains_key("channelIndex") => {
                Message::ParameterRequest { channel_index: -1 }
            }
            None => Message::Malformed {
                detail: "ParameterRequest has a non-integer channelIndex".to_string(),
            },
            Some(idx) => Message::ParameterRequest { channel_index: idx },
        },
        "ParameterResponse" => match channel_index(obj) {
            Some(idx) => Message::ParameterResponse {
                channel_index: idx,
                fields: strip_envelope(obj),
            },
            None => Message::Malformed {
                detail: "ParameterResponse missing channelIndex".to_string(),
            },
        },
        "ParameterCommand" => match channel_index(obj) {
            Some(idx) => Message::ParameterCommand {
                channel_index: idx,
                params: strip_envelope(obj),
            },
            None => Message::Malformed {
                detail: "ParameterCommand missing channelIndex".to_string(),
            },
        },
        "StatusUpdate" => match channel_index(obj) {
            Some(idx) => Message::StatusUpdate {
                channel_index: idx,
                values: strip_envelope(obj),
            },
            None => Message::Malformed {
                detail: "StatusUpdate missing channelIndex".to_string(),
            },
        },
        "ErrorResponse" => {
            let Some(error_value) = obj
                .get("errorValue")
                .and_then(Value::as_str)
                .and_then(ErrorValue::parse)
            else {
                return Message::Malformed {
                    detail: "ErrorResponse with missing or unknown errorValue".to_string(),
                };
            };
            Message::ErrorResponse {
                error_value,
                error_string: obj
                    .get("errorString")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }
        }
        other => Message::Unknown {
            message_type: other.to_string(),
        },
    }
}

fn channel_index(obj: &Map<String, Value>) -> Option<i32> {
    obj.get("channelIndex")
        .and_then(Value::as_i64)
        .and_then(|i| i32::try_from(i).ok())
}

/// Copy a message object minus the envelope keys; everything else,
/// including fields we do not understand, is preserved.
fn strip_envelope(obj: &Map<String, Value>) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| k.as_str() != "messageType" && k.as_str() != "channelIndex")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Encode a batch into one datagram payload. Fails when the result would
/// exceed the datagram cap.
pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&batch_to_json(batch))
        .map_err(|e| Error::Encode(format!("JSON serialization failed: {}", e)))?;
    if payload.len() > MAX_DATAGRAM_BYTES {
        return Err(Error::Encode(format!(
            "batch of {} bytes exceeds {}-byte datagram cap",
            payload.len(),
            MAX_DATAGRAM_BYTES
        )));
    }
    Ok(payload)
}

/// Encode a batch, splitting it into several datagrams when one would
/// exceed the cap. Messages stay in order across the splits; a single
/// message that cannot fit on its own is logged and dropped.
#[must_use]
pub fn encode_batches_within_limit(batch: &Batch) -> Vec<Vec<u8>> {
    if let Ok(payload) = encode_batch(batch) {
        return vec![payload];
    }
    if batch.messages.len() <= 1 {
        log::error!(
            "[codec] single message from '{}' exceeds {} bytes, dropped",
            batch.transmitting_device,
            MAX_DATAGRAM_BYTES
        );
        return Vec::new();
    }

    log::debug!(
        "[codec] splitting oversize batch of {} messages from '{}'",
        batch.messages.len(),
        batch.transmitting_device
    );
    let mid = batch.messages.len() / 2;
    let mut head = batch.clone();
    let tail = Batch {
        transmitting_device: batch.transmitting_device.clone(),
        receiving_device: batch.receiving_device.clone(),
        messages: head.messages.split_off(mid),
    };
    let mut out = encode_batches_within_limit(&head);
    out.extend(encode_batches_within_limit(&tail));
    out
}

fn batch_to_json(batch: &Batch) -> Value {
    let mut obj = Map::new();
    obj.insert(
        "transmittingDevice".to_string(),
        Value::String(batch.transmitting_device.clone()),
    );
    if let Some(receiving) = &batch.receiving_device {
        obj.insert("receivingDevice".to_string(), Value::String(receiving.clone()));
    }
    obj.insert(
        "messages".to_string(),
        Value::Array(batch.messages.iter().filter_map(message_to_json).collect()),
    );
    Value::Object(obj)
}

fn message_to_json(message: &Message) -> Option<Value> {
    let mut obj = Map::new();
    match message {
        Message::ParameterRequest { channel_index } => {
            obj.insert("messageType".to_string(), Value::String("ParameterRequest".to_string()));
            obj.insert("channelIndex".to_string(), serde_json::json!(channel_index));
        }
        Message::ParameterResponse { channel_index, fields } => {
            obj.insert("messageType".to_string(), Value::String("ParameterResponse".to_string()));
            obj.insert("channelIndex".to_string(), serde_json::json!(channel_index));
            for (k, v) in fields {
                obj.insert(k.clone(), v.clone());
            }
        }
        Message::ParameterCommand { channel_index, params } => {
            obj.insert("messageType".to_string(), Value::String("ParameterCommand".to_string()));
            obj.insert("channelIndex".to_string(), serde_json::json!(channel_index));
            for (k, v) in params {
                obj.insert(k.clone(), v.clone());
            }
        }
        Message::StatusUpdate { channel_index, values } => {
            obj.insert("messageType".to_string(), Value::String("StatusUpdate".to_string()));
            obj.insert("channelIndex".to_string(), serde_json::json!(channel_index));
            for (k, v) in values {
                obj.insert(k.clone(), v.clone());
            }
        }
        Message::ErrorResponse { error_value, error_string } => {
            obj.insert("messageType".to_string(), Value::String("ErrorResponse".to_string()));
            obj.insert("errorValue".to_string(), Value::String(error_value.as_str().to_string()));
            obj.insert("errorString".to_string(), Value::String(error_string.clone()));
        }
        Message::Unknown { message_type } => {
            log::warn!("[codec] refusing to encode unknown message type '{}'", message_type);
            return None;
        }
        Message::Malformed { detail } => {
            log::warn!("[codec] refusing to encode malformed message ({})", detail);
            return None;
        }
    }
    Some(Value::Object(obj))
}
