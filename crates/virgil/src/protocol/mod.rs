// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Virgil wire protocol: message taxonomy, codec, and the two engines.
//!
//! A datagram carries one JSON message batch:
//!
//! ```text
//! { "transmittingDevice": "StageBox12",
//!   "receivingDevice": "Desk",            // optional
//!   "messages": [ { "messageType": ..., ... }, ... ] }
//! ```
//!
//! The taxonomy is closed: `ParameterRequest`, `ParameterResponse`,
//! `ParameterCommand`, `StatusUpdate`, `ErrorResponse`. Anything else
//! decodes as [`Message::Unknown`] and is answered with
//! `UnrecognizedCommand`; structurally broken entries decode as
//! [`Message::Malformed`] and are answered with `MalformedMessage`.
//!
//! Dynamic payloads (parameter names as JSON keys) normalise into typed
//! variants here at the boundary; raw maps only survive where unknown-field
//! preservation is required (master-side merge).
//!
//! # Modules
//!
//! - `codec` - batch encode/decode with envelope validation and size cap
//! - `dispatch` - slave-side engine: inbound batch -> outbound batches
//! - `ingest` - master-side engine: response batch -> registry merge

use crate::config::DEVICE_CHANNEL_INDEX;
use serde_json::{Map, Value};
use std::fmt;

pub mod codec;
pub mod dispatch;
pub mod ingest;

pub use codec::{decode_batch, encode_batch, encode_batches_within_limit};
pub use dispatch::{handle_batch, malformed_reply, Outbound, ReplyDest};
pub use ingest::{ingest_batch, MasterNotice};

/// Closed error taxonomy carried in `ErrorResponse.errorValue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorValue {
    /// Undecodable payload, missing envelope field, or oversize datagram.
    MalformedMessage,
    /// Well-formed message with an unknown `messageType`.
    UnrecognizedCommand,
    /// Channel index outside the device's scope rules.
    ChannelIndexInvalid,
    /// Parameter does not exist on the addressed channel.
    ParameterUnsupported,
    /// Parameter exists but is locked against inbound writes.
    ParameterLocked,
    /// Proposed value's runtime type does not match the parameter's.
    InvalidValueType,
    /// Numeric range/precision violation or enum value not admissible.
    ValueOutOfRange,
}

impl ErrorValue {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorValue::MalformedMessage => "MalformedMessage",
            ErrorValue::UnrecognizedCommand => "UnrecognizedCommand",
            ErrorValue::ChannelIndexInvalid => "ChannelIndexInvalid",
            ErrorValue::ParameterUnsupported => "ParameterUnsupported",
            ErrorValue::ParameterLocked => "ParameterLocked",
            ErrorValue::InvalidValueType => "InvalidValueType",
            ErrorValue::ValueOutOfRange => "ValueOutOfRange",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MalformedMessage" => Some(ErrorValue::MalformedMessage),
            "UnrecognizedCommand" => Some(ErrorValue::UnrecognizedCommand),
            "ChannelIndexInvalid" => Some(ErrorValue::ChannelIndexInvalid),
            "ParameterUnsupported" => Some(ErrorValue::ParameterUnsupported),
            "ParameterLocked" => Some(ErrorValue::ParameterLocked),
            "InvalidValueType" => Some(ErrorValue::InvalidValueType),
            "ValueOutOfRange" => Some(ErrorValue::ValueOutOfRange),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// master -> slave: request the full parameter tree for a scope.
    ParameterRequest { channel_index: i32 },
    /// slave -> master: parameter descriptors (or device-level fields) for
    /// one scope. `fields` preserves unknown keys verbatim.
    ParameterResponse {
        channel_index: i32,
        fields: Map<String, Value>,
    },
    /// master -> slave: write request, nested form
    /// `{ "<param>": { "value": ... } }`.
    ParameterCommand {
        channel_index: i32,
        params: Map<String, Value>,
    },
    /// slave -> master / multicast group: changed raw values (not full
    /// descriptors).
    StatusUpdate {
        channel_index: i32,
        values: Map<String, Value>,
    },
    /// Per-problem diagnostic; may sit alongside successful results in the
    /// same batch.
    ErrorResponse {
        error_value: ErrorValue,
        error_string: String,
    },
    /// Well-formed message whose `messageType` is outside the taxonomy.
    Unknown { message_type: String },
    /// Structurally broken entry (missing `messageType`, non-object, ...).
    Malformed { detail: String },
}

impl Message {
    /// Wire name of the message type (diagnostic label for the local
    /// variants).
    #[must_use]
    pub fn message_type(&self) -> &str {
        match self {
            Message::ParameterRequest { .. } => "ParameterRequest",
            Message::ParameterResponse { .. } => "ParameterResponse",
            Message::ParameterCommand { .. } => "ParameterCommand",
            Message::StatusUpdate { .. } => "StatusUpdate",
            Message::ErrorResponse { .. } => "ErrorResponse",
            Message::Unknown { message_type } => message_type,
            Message::Malformed { .. } => "<malformed>",
        }
    }

    /// Channel index carried by the message, if the type has one.
    #[must_use]
    pub fn channel_index(&self) -> Option<i32> {
        match self {
            Message::ParameterRequest { channel_index }
            | Message::ParameterResponse { channel_index, .. }
            | Message::ParameterCommand { channel_index, .. }
            | Message::StatusUpdate { channel_index, .. } => Some(*channel_index),
            _ => None,
        }
    }

    pub(crate) fn error(error_value: ErrorValue, error_string: impl Into<String>) -> Self {
        Message::ErrorResponse {
            error_value,
            error_string: error_string.into(),
        }
    }
}

/// A message batch: the unit of exchange, one per datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub transmitting_device: String,
    pub receiving_device: Option<String>,
    pub messages: Vec<Message>,
}

impl Batch {
    #[must_use]
    pub fn new(transmitting_device: impl Into<String>) -> Self {
        Self {
            transmitting_device: transmitting_device.into(),
            receiving_device: None,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn to_device(transmitting_device: impl Into<String>, receiving_device: impl Into<String>) -> Self {
        Self {
            transmitting_device: transmitting_device.into(),
            receiving_device: Some(receiving_device.into()),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True if any response-class message illegally carries the "all"
    /// scope; masters must ignore such messages.
    #[must_use]
    pub fn has_wildcard_response(&self) -> bool {
        self.messages.iter().any(|m| {
            matches!(
                m,
                Message::ParameterResponse { channel_index, .. }
                | Message::StatusUpdate { channel_index, .. }
                if *channel_index < DEVICE_CHANNEL_INDEX
            )
        })
    }
}
