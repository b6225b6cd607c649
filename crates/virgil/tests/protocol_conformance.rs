// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire-level protocol conformance: JSON batches in, JSON batches out.
//!
//! Drives the slave engine through the codec exactly as the request loop
//! does, without sockets, and checks the end-to-end scenarios and
//! invariants of the protocol: command round-trips, partial commits,
//! grouped error batches, reserved-index rules, and the scope-walk law.

use serde_json::{json, Map, Value};
use virgil::model::profiles::wireless_receiver_channel;
use virgil::model::DeviceState;
use virgil::protocol::{
    codec, dispatch, handle_batch, ErrorValue, Message, Outbound, ReplyDest,
};
use virgil::{DeviceType, MulticastBase};

fn slave_state() -> DeviceState {
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

/// Feed raw JSON to the engine the way the request loop does.
fn drive(state: &mut DeviceState, payload: Value) -> Vec<Outbound> {
    let bytes = serde_json::to_vec(&payload).expect("serialize test payload");
    assert!(bytes.len() <= 4096, "test payload must fit one datagram");
    let batch = codec::decode_batch(&bytes).expect("payload should decode");
    handle_batch(state, &batch)
}

fn unicast_json(outbound: &[Outbound]) -> Value {
    let reply = outbound
        .iter()
        .find(|o| o.dest == ReplyDest::Peer)
        .expect("a unicast reply");
    let bytes = codec::encode_batch(&reply.batch).expect("reply should encode");
    serde_json::from_slice(&bytes).expect("reply should be valid JSON")
}

fn command_payload(channel: i32, pairs: &[(&str, Value)]) -> Value {
    let mut msg = Map::new();
    msg.insert("messageType".to_string(), json!("ParameterCommand"));
    msg.insert("channelIndex".to_string(), json!(channel));
    for (name, value) in pairs {
        msg.insert((*name).to_string(), json!({ "value": value }));
    }
    json!({
        "transmittingDevice": "Desk",
        "receivingDevice": "StageLeft",
        "messages": [Value::Object(msg)]
    })
}

fn request_payload(channel: i32) -> Value {
    json!({
        "transmittingDevice": "Desk",
        "messages": [{"messageType": "ParameterRequest", "channelIndex": channel}]
    })
}

// Valid command: unicast StatusUpdate plus multicast StatusUpdate on
// <base>.<channel>, and a follow-up request returns the committed value.
#[test]
fn test_command_round_trip() {
    let mut state = slave_state();

    let out = drive(&mut state, command_payload(0, &[("gain", json!(10))]));
    assert_eq!(out.len(), 2);

    let reply = unicast_json(&out);
    assert_eq!(reply["transmittingDevice"], json!("StageLeft"));
    assert_eq!(reply["messages"][0]["messageType"], json!("StatusUpdate"));
    assert_eq!(reply["messages"][0]["channelIndex"], json!(0));
    assert_eq!(reply["messages"][0]["gain"], json!(10.0));

    let group = out
        .iter()
        .find(|o| matches!(o.dest, ReplyDest::Group(_)))
        .expect("multicast telemetry");
    assert_eq!(
        group.dest,
        ReplyDest::Group("239.10.7.0".parse().expect("group address"))
    );

    let out = drive(&mut state, request_payload(0));
    let reply = unicast_json(&out);
    assert_eq!(reply["messages"][0]["messageType"], json!("ParameterResponse"));
    assert_eq!(reply["messages"][0]["gain"]["value"], json!(10.0));
}

// Out-of-range command: ValueOutOfRange, value unchanged.
#[test]
fn test_out_of_range_command_rejected() {
    let mut state = slave_state();

    let out = drive(&mut state, command_payload(0, &[("gain", json!(60))]));
    let reply = unicast_json(&out);
    assert_eq!(reply["messages"][0]["messageType"], json!("ErrorResponse"));
    assert_eq!(reply["messages"][0]["errorValue"], json!("ValueOutOfRange"));

    let out = drive(&mut state, request_payload(0));
    assert_eq!(unicast_json(&out)["messages"][0]["gain"]["value"], json!(0.0));
}

// Locked sibling: one batch with both the ParameterLocked error and the
// StatusUpdate for the committed sibling.
#[test]
fn test_locked_sibling_grouped_with_status() {
    let mut state = slave_state();

    let out = drive(
        &mut state,
        command_payload(
            0,
            &[("gain", json!(5)), ("transmitterConnected", json!(false))],
        ),
    );
    let reply = unicast_json(&out);
    let messages = reply["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["errorValue"], json!("ParameterLocked"));
    assert_eq!(messages[1]["messageType"], json!("StatusUpdate"));
    assert_eq!(messages[1]["gain"], json!(5.0));

    // Locked value never changed.
    let out = drive(&mut state, request_payload(0));
    assert_eq!(
        unicast_json(&out)["messages"][0]["transmitterConnected"]["value"],
        json!(true)
    );
}

// Batch of three commands (valid / unknown parameter / out of range):
// one outbound unicast batch with one StatusUpdate and two errors.
#[test]
fn test_mixed_batch_single_grouped_reply() {
    let mut state = slave_state();

    let payload = json!({
        "transmittingDevice": "Desk",
        "messages": [
            {"messageType": "ParameterCommand", "channelIndex": 0, "gain": {"value": 7}},
            {"messageType": "ParameterCommand", "channelIndex": 0, "sparkle": {"value": 1}},
            {"messageType": "ParameterCommand", "channelIndex": 0, "squelch": {"value": -10}}
        ]
    });
    let out = drive(&mut state, payload);

    let unicast: Vec<&Outbound> = out.iter().filter(|o| o.dest == ReplyDest::Peer).collect();
    assert_eq!(unicast.len(), 1, "errors and updates share one reply batch");

    let reply = unicast_json(&out);
    let messages = reply["messages"].as_array().expect("messages");
    let status = messages
        .iter()
        .filter(|m| m["messageType"] == json!("StatusUpdate"))
        .count();
    let errors: Vec<&str> = messages
        .iter()
        .filter(|m| m["messageType"] == json!("ErrorResponse"))
        .map(|m| m["errorValue"].as_str().expect("errorValue"))
        .collect();
    assert_eq!(status, 1);
    assert_eq!(errors, vec!["ParameterUnsupported", "ValueOutOfRange"]);
}

// The -2 scope walk: device message first, then every channel in order;
// the device-level channelIndices equals the walked indices (L3), and -2
// itself never appears in any output (P4).
#[test]
fn test_all_scope_walk_matches_channel_indices() {
    let mut state = slave_state();

    let out = drive(&mut state, request_payload(-2));
    let reply = unicast_json(&out);
    let messages = reply["messages"].as_array().expect("messages");

    assert_eq!(messages[0]["channelIndex"], json!(-1));
    let advertised: Vec<i64> = messages[0]["channelIndices"]
        .as_array()
        .expect("channelIndices")
        .iter()
        .map(|v| v.as_i64().expect("index"))
        .collect();
    let walked: Vec<i64> = messages[1..]
        .iter()
        .map(|m| m["channelIndex"].as_i64().expect("index"))
        .collect();
    assert_eq!(advertised, walked);

    for message in messages {
        assert_ne!(message["channelIndex"], json!(-2));
    }
}

// Reserved and unknown channel indices.
#[test]
fn test_channel_index_boundaries() {
    let mut state = slave_state();

    for channel in [-3, 2, 4096] {
        let out = drive(&mut state, request_payload(channel));
        let reply = unicast_json(&out);
        assert_eq!(reply["messages"][0]["errorValue"], json!("ChannelIndexInvalid"));
    }

    // Commands at device scopes are invalid.
    for channel in [-1, -2] {
        let out = drive(&mut state, command_payload(channel, &[("gain", json!(1))]));
        let reply = unicast_json(&out);
        assert_eq!(reply["messages"][0]["errorValue"], json!("ChannelIndexInvalid"));
    }
}

// Precision boundaries: min + k*precision inside the bounds commits,
// including both endpoints.
#[test]
fn test_precision_ladder_accepted() {
    let mut state = slave_state();
    for k in [0, 1, 27, 55] {
        let value = -5.0 + f64::from(k);
        let out = drive(&mut state, command_payload(0, &[("gain", json!(value))]));
        let reply = unicast_json(&out);
        assert_eq!(
            reply["messages"][0]["messageType"],
            json!("StatusUpdate"),
            "gain {} must commit",
            value
        );
    }
}

// Envelope faults produce a single MalformedMessage error batch; unknown
// message types produce UnrecognizedCommand.
#[test]
fn test_envelope_and_taxonomy_faults() {
    let mut state = slave_state();

    for bad in [
        json!({"messages": [{"messageType": "ParameterRequest"}]}),
        json!({"transmittingDevice": "Desk"}),
        json!({"transmittingDevice": "Desk", "messages": []}),
    ] {
        let bytes = serde_json::to_vec(&bad).expect("serialize");
        let fault = codec::decode_batch(&bytes).expect_err("envelope fault");
        let reply = dispatch::malformed_reply("StageLeft", fault.detail);
        assert_eq!(reply.messages.len(), 1);
        assert!(matches!(
            reply.messages[0],
            Message::ErrorResponse { error_value: ErrorValue::MalformedMessage, .. }
        ));
    }

    let out = drive(
        &mut state,
        json!({
            "transmittingDevice": "Desk",
            "messages": [{"messageType": "FactoryReset"}]
        }),
    );
    let reply = unicast_json(&out);
    assert_eq!(reply["messages"][0]["errorValue"], json!("UnrecognizedCommand"));
}

// Unknown fields on a command message ride along without breaking
// dispatch of the fields we do understand.
#[test]
fn test_unknown_fields_ignored_on_dispatch() {
    let mut state = slave_state();
    let payload = json!({
        "transmittingDevice": "Desk",
        "vendorHint": {"priority": "high"},
        "messages": [{
            "messageType": "ParameterCommand",
            "channelIndex": 0,
            "gain": {"value": 3, "rampMs": 20}
        }]
    });
    let out = drive(&mut state, payload);
    let reply = unicast_json(&out);
    assert_eq!(reply["messages"][0]["messageType"], json!("StatusUpdate"));
    assert_eq!(reply["messages"][0]["gain"], json!(3.0));
}
