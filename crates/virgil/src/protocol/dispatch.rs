// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slave-side protocol engine.
//!
//! Pure batch-in, batches-out: the request loop decodes a datagram, hands
//! the batch here under the state lock, and sends whatever comes back.
//! No sockets, no locks taken, no clock - which is what makes the whole
//! dispatch surface testable as plain functions.
//!
//! Reply shape per inbound batch: one grouped unicast batch carrying
//! responses, per-parameter errors, and command `StatusUpdate`s (errors
//! for a command precede its `StatusUpdate`), followed by one multicast
//! `StatusUpdate` per channel with accepted changes.

use crate::config::{ALL_CHANNELS_INDEX, DEVICE_CHANNEL_INDEX};
use crate::model::DeviceState;
use crate::protocol::{Batch, ErrorValue, Message};
use serde_json::{Map, Value};
use std::net::Ipv4Addr;

/// Where an outbound batch goes; the sender resolves `Peer` to the source
/// IP at the control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDest {
    /// Unicast back to the requesting peer.
    Peer,
    /// Multicast to a per-channel telemetry group.
    Group(Ipv4Addr),
}

/// One outbound batch produced by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub dest: ReplyDest,
    pub batch: Batch,
}

/// Single-error reply for envelope-level faults (undecodable payload,
/// missing envelope fields, oversize datagram).
#[must_use]
pub fn malformed_reply(device_name: &str, detail: impl Into<String>) -> Batch {
    let mut batch = Batch::new(device_name);
    batch.push(Message::error(ErrorValue::MalformedMessage, detail));
    batch
}

/// Process one inbound batch against the device state.
///
/// Messages are handled in array order. Response-class messages
/// (`ParameterResponse`, `StatusUpdate`, `ErrorResponse`) carry no slave
/// action and are ignored; answering them would reply-loop between two
/// same-port participants.
pub fn handle_batch(state: &mut DeviceState, batch: &Batch) -> Vec<Outbound> {
    let mut reply = Batch::new(state.device_name());
    let mut group_updates: Vec<(i32, Map<String, Value>)> = Vec::new();

    for message in &batch.messages {
        match message {
            Message::ParameterRequest { channel_index } => {
                handle_request(state, *channel_index, &mut reply);
            }
            Message::ParameterCommand { channel_index, params } => {
                handle_command(state, *channel_index, params, &mut reply, &mut group_updates);
            }
            Message::ParameterResponse { .. }
            | Message::StatusUpdate { .. }
            | Message::ErrorResponse { .. } => {
                log::debug!(
                    "[dispatch] ignoring inbound {} from '{}'",
                    message.message_type(),
                    batch.transmitting_device
                );
            }
            Message::Unknown { message_type } => {
                reply.push(Message::error(
                    ErrorValue::UnrecognizedCommand,
                    format!("Unsupported message type: {}", message_type),
                ));
            }
            Message::Malformed { detail } => {
                reply.push(Message::error(ErrorValue::MalformedMessage, detail.clone()));
            }
        }
    }

    let mut outbound = Vec::new();
    if !reply.is_empty() {
        outbound.push(Outbound { dest: ReplyDest::Peer, batch: reply });
    }
    for (channel_index, values) in group_updates {
        let Some(group) = state.multicast_base().group(channel_index) else {
            log::warn!(
                "[dispatch] channel {} cannot form a multicast group on base {}",
                channel_index,
                state.multicast_base()
            );
            continue;
        };
        let mut batch = Batch::new(state.device_name());
        batch.push(Message::StatusUpdate { channel_index, values });
        outbound.push(Outbound { dest: ReplyDest::Group(group), batch });
    }
    outbound
}

/// Scope rules: `-1` device level, `-2` device level plus every channel in
/// index order, `>= 0` one existing channel, anything else invalid.
fn handle_request(state: &DeviceState, channel_index: i32, reply: &mut Batch) {
    match channel_index {
        DEVICE_CHANNEL_INDEX => {
            reply.push(Message::ParameterResponse {
                channel_index: DEVICE_CHANNEL_INDEX,
                fields: state.device_info(),
            });
        }
        ALL_CHANNELS_INDEX => {
            reply.push(Message::ParameterResponse {
                channel_index: DEVICE_CHANNEL_INDEX,
                fields: state.device_info(),
            });
            for index in state.channel_indices() {
                if let Some(fields) = state.channel_descriptor(index) {
                    reply.push(Message::ParameterResponse { channel_index: index, fields });
                }
            }
        }
        index if index >= 0 => match state.channel_descriptor(index) {
            Some(fields) => {
                reply.push(Message::ParameterResponse { channel_index: index, fields });
            }
            None => {
                reply.push(Message::error(
                    ErrorValue::ChannelIndexInvalid,
                    format!("Invalid channel index: {}", index),
                ));
            }
        },
        index => {
            reply.push(Message::error(
                ErrorValue::ChannelIndexInvalid,
                format!("Invalid channel index: {}", index),
            ));
        }
    }
}

/// Commands target exactly one real channel; device-level and "all" scopes
/// are invalid. Accepted changes append one unicast `StatusUpdate` after
/// this command's errors and queue the matching multicast update.
fn handle_command(
    state: &mut DeviceState,
    channel_index: i32,
    params: &Map<String, Value>,
    reply: &mut Batch,
    group_updates: &mut Vec<(i32, Map<String, Value>)>,
) {
    if channel_index < 0 || state.channel(channel_index).is_none() {
        reply.push(Message::error(
            ErrorValue::ChannelIndexInvalid,
            format!("Invalid channel index for command: {}", channel_index),
        ));
        return;
    }

    // Unwrap the nested form: { "<param>": { "value": ... } }.
    let mut proposed = Map::new();
    for (name, entry) in params {
        match entry.as_object().and_then(|o| o.get("value")) {
            Some(value) => {
                proposed.insert(name.clone(), value.clone());
            }
            None => {
                reply.push(Message::error(
                    ErrorValue::InvalidValueType,
                    format!("Parameter '{}' is missing a 'value' field", name),
                ));
            }
        }
    }

    let outcome = match state.apply_command(channel_index, &proposed) {
        Ok(outcome) => outcome,
        Err(e) => {
            // Channel vanishing between the check above and here cannot
            // happen under the single writer lock; keep the error honest
            // anyway.
            reply.push(Message::error(ErrorValue::ChannelIndexInvalid, e.to_string()));
            return;
        }
    };

    for rejection in &outcome.rejected {
        reply.push(Message::error(rejection.error, rejection.detail.clone()));
    }
    if !outcome.accepted.is_empty() {
        let values: Map<String, Value> = outcome
            .accepted
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        reply.push(Message::StatusUpdate { channel_index, values: values.clone() });
        group_updates.push((channel_index, values));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DeviceType, MulticastBase};
    use crate::model::profiles::wireless_receiver_channel;

    fn test_state() -> DeviceState {
        let mut state = DeviceState::new(
            "StageLeft",
            "RX-4",
            DeviceType::WirelessReceiver,
            MulticastBase::new(239, 10, 7),
        );
        state.add_channel(0, wireless_receiver_channel()).expect("channel 0");
        state.add_channel(1, wireless_receiver_channel()).expect("channel 1");
        state
    }

    fn inbound(messages: Vec<Message>) -> Batch {
        Batch {
            transmitting_device: "Desk".to_string(),
            receiving_device: Some("StageLeft".to_string()),
            messages,
        }
    }

    fn command(channel_index: i32, pairs: &[(&str, Value)]) -> Message {
        Message::ParameterCommand {
            channel_index,
            params: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), serde_json::json!({ "value": v })))
                .collect(),
        }
    }

    fn unicast_reply(outbound: &[Outbound]) -> &Batch {
        let out = outbound
            .iter()
            .find(|o| o.dest == ReplyDest::Peer)
            .expect("a unicast reply batch");
        &out.batch
    }

    #[test]
    fn test_device_request() {
        let mut state = test_state();
        let out = handle_batch(&mut state, &inbound(vec![Message::ParameterRequest { channel_index: -1 }]));
        assert_eq!(out.len(), 1);
        let reply = unicast_reply(&out);
        assert_eq!(reply.transmitting_device, "StageLeft");
        match &reply.messages[0] {
            Message::ParameterResponse { channel_index, fields } => {
                assert_eq!(*channel_index, -1);
                assert_eq!(fields["channelIndices"], serde_json::json!([0, 1]));
            }
            other => panic!("expected device response, got {:?}", other),
        }
    }

    #[test]
    fn test_all_scope_walks_channels_in_order() {
        let mut state = test_state();
        let out = handle_batch(&mut state, &inbound(vec![Message::ParameterRequest { channel_index: -2 }]));
        let reply = unicast_reply(&out);
        let indices: Vec<i32> = reply
            .messages
            .iter()
            .map(|m| m.channel_index().expect("response"))
            .collect();
        assert_eq!(indices, vec![-1, 0, 1]);
        // The "all" scope itself never appears in responses.
        assert!(!reply.has_wildcard_response());
    }

    #[test]
    fn test_channel_request_returns_descriptors() {
        let mut state = test_state();
        let out = handle_batch(&mut state, &inbound(vec![Message::ParameterRequest { channel_index: 1 }]));
        let reply = unicast_reply(&out);
        match &reply.messages[0] {
            Message::ParameterResponse { channel_index, fields } => {
                assert_eq!(*channel_index, 1);
                assert_eq!(fields["gain"]["dataType"], serde_json::json!("number"));
                assert_eq!(fields["gain"]["minValue"], serde_json::json!(-5.0));
            }
            other => panic!("expected channel response, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_request_indices() {
        let mut state = test_state();
        for idx in [-3, 2, 99] {
            let out = handle_batch(
                &mut state,
                &inbound(vec![Message::ParameterRequest { channel_index: idx }]),
            );
            let reply = unicast_reply(&out);
            assert_eq!(
                reply.messages[0],
                Message::ErrorResponse {
                    error_value: ErrorValue::ChannelIndexInvalid,
                    error_string: format!("Invalid channel index: {}", idx),
                },
                "index {} must be rejected",
                idx
            );
        }
    }

    #[test]
    fn test_command_device_scopes_rejected() {
        let mut state = test_state();
        for idx in [-1, -2] {
            let out = handle_batch(
                &mut state,
                &inbound(vec![command(idx, &[("gain", serde_json::json!(10))])]),
            );
            let reply = unicast_reply(&out);
            assert!(matches!(
                reply.messages[0],
                Message::ErrorResponse { error_value: ErrorValue::ChannelIndexInvalid, .. }
            ));
        }
    }

    // Scenario: a valid write produces a unicast StatusUpdate plus a
    // multicast StatusUpdate on <base>.<channel>, and the value sticks.
    #[test]
    fn test_accepted_command_emits_unicast_and_multicast() {
        let mut state = test_state();
        let out = handle_batch(
            &mut state,
            &inbound(vec![command(0, &[("gain", serde_json::json!(10))])]),
        );
        assert_eq!(out.len(), 2);

        let reply = unicast_reply(&out);
        assert_eq!(
            reply.messages[0],
            Message::StatusUpdate {
                channel_index: 0,
                values: [("gain".to_string(), serde_json::json!(10.0))].into_iter().collect(),
            }
        );

        let group = out
            .iter()
            .find(|o| matches!(o.dest, ReplyDest::Group(_)))
            .expect("multicast update");
        assert_eq!(group.dest, ReplyDest::Group(Ipv4Addr::new(239, 10, 7, 0)));
        assert_eq!(group.batch.messages.len(), 1);

        // Follow-up request observes the committed value.
        let out = handle_batch(&mut state, &inbound(vec![Message::ParameterRequest { channel_index: 0 }]));
        match &unicast_reply(&out).messages[0] {
            Message::ParameterResponse { fields, .. } => {
                assert_eq!(fields["gain"]["value"], serde_json::json!(10.0));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    // Scenario: an out-of-range write is rejected and the old value is
    // returned by a follow-up request.
    #[test]
    fn test_rejected_command_leaves_state() {
        let mut state = test_state();
        let out = handle_batch(
            &mut state,
            &inbound(vec![command(0, &[("gain", serde_json::json!(60))])]),
        );
        assert_eq!(out.len(), 1);
        let reply = unicast_reply(&out);
        assert!(matches!(
            reply.messages[0],
            Message::ErrorResponse { error_value: ErrorValue::ValueOutOfRange, .. }
        ));

        let out = handle_batch(&mut state, &inbound(vec![Message::ParameterRequest { channel_index: 0 }]));
        match &unicast_reply(&out).messages[0] {
            Message::ParameterResponse { fields, .. } => {
                assert_eq!(fields["gain"]["value"], serde_json::json!(0.0));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    // Scenario: mixed command - locked parameter rejected, sibling commits,
    // both visible in one grouped batch with the error first.
    #[test]
    fn test_mixed_command_groups_error_and_update() {
        let mut state = test_state();
        let out = handle_batch(
            &mut state,
            &inbound(vec![command(
                0,
                &[
                    ("gain", serde_json::json!(5)),
                    ("transmitterConnected", serde_json::json!(false)),
                ],
            )]),
        );
        let reply = unicast_reply(&out);
        assert_eq!(reply.messages.len(), 2);
        assert!(matches!(
            reply.messages[0],
            Message::ErrorResponse { error_value: ErrorValue::ParameterLocked, .. }
        ));
        match &reply.messages[1] {
            Message::StatusUpdate { channel_index, values } => {
                assert_eq!(*channel_index, 0);
                assert_eq!(values["gain"], serde_json::json!(5.0));
            }
            other => panic!("expected StatusUpdate, got {:?}", other),
        }
    }

    // Scenario: three commands in one batch - valid, unknown parameter,
    // out of range - produce one grouped reply with one StatusUpdate and
    // two errors.
    #[test]
    fn test_three_commands_one_grouped_reply() {
        let mut state = test_state();
        let out = handle_batch(
            &mut state,
            &inbound(vec![
                command(0, &[("gain", serde_json::json!(7))]),
                command(0, &[("sparkle", serde_json::json!(1))]),
                command(0, &[("squelch", serde_json::json!(-10))]),
            ]),
        );
        let reply = unicast_reply(&out);
        let mut status = 0;
        let mut errors = Vec::new();
        for message in &reply.messages {
            match message {
                Message::StatusUpdate { .. } => status += 1,
                Message::ErrorResponse { error_value, .. } => errors.push(*error_value),
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert_eq!(status, 1);
        assert_eq!(
            errors,
            vec![ErrorValue::ParameterUnsupported, ErrorValue::ValueOutOfRange]
        );
    }

    #[test]
    fn test_unknown_and_malformed_messages() {
        let mut state = test_state();
        let out = handle_batch(
            &mut state,
            &inbound(vec![
                Message::Unknown { message_type: "RebootDevice".to_string() },
                Message::Malformed { detail: "Missing messageType".to_string() },
            ]),
        );
        let reply = unicast_reply(&out);
        assert!(matches!(
            reply.messages[0],
            Message::ErrorResponse { error_value: ErrorValue::UnrecognizedCommand, .. }
        ));
        assert!(matches!(
            reply.messages[1],
            Message::ErrorResponse { error_value: ErrorValue::MalformedMessage, .. }
        ));
    }

    #[test]
    fn test_response_class_messages_ignored() {
        let mut state = test_state();
        let out = handle_batch(
            &mut state,
            &inbound(vec![
                Message::StatusUpdate { channel_index: 0, values: Map::new() },
                Message::ParameterResponse { channel_index: -1, fields: Map::new() },
                Message::error(ErrorValue::ValueOutOfRange, "from a peer"),
            ]),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_command_missing_value_field() {
        let mut state = test_state();
        let params: Map<String, Value> =
            [("gain".to_string(), serde_json::json!(10))].into_iter().collect();
        let out = handle_batch(
            &mut state,
            &inbound(vec![Message::ParameterCommand { channel_index: 0, params }]),
        );
        let reply = unicast_reply(&out);
        assert!(matches!(
            reply.messages[0],
            Message::ErrorResponse { error_value: ErrorValue::InvalidValueType, .. }
        ));
    }

    // The slave never emits the "all" scope, whatever it is asked.
    #[test]
    fn test_no_wildcard_in_any_output() {
        let mut state = test_state();
        let inputs = vec![
            Message::ParameterRequest { channel_index: -2 },
            Message::ParameterRequest { channel_index: -1 },
            command(1, &[("gain", serde_json::json!(3))]),
        ];
        for out in handle_batch(&mut state, &inbound(inputs)) {
            assert!(!out.batch.has_wildcard_response());
        }
    }
}
