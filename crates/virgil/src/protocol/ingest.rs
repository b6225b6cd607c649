// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master-side protocol engine: merge response batches into the registry.
//!
//! Pure with respect to I/O: the listener loop decodes a datagram and
//! hands the batch here; notices bubble up to the application driver.
//! Batches from senders the registry does not know are dropped whole -
//! a malformed or spoofed batch never creates registry entries.

use crate::master::registry::Registry;
use crate::protocol::{Batch, ErrorValue, Message};
use std::net::Ipv4Addr;

/// Observations surfaced to the application driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MasterNotice {
    /// A device answered with an `ErrorResponse`.
    ErrorReported {
        device_name: String,
        error_value: ErrorValue,
        error_string: String,
    },
    /// Device-level or channel fields changed.
    DeviceUpdated { device_name: String, channel_index: i32 },
}

/// Merge one inbound batch. Returns notices in message order.
pub fn ingest_batch(registry: &Registry, batch: &Batch, source: Ipv4Addr) -> Vec<MasterNotice> {
    let device_name = batch.transmitting_device.as_str();
    if !registry.contains(device_name) {
        log::debug!("[ingest] ignoring batch from unknown sender '{}'", device_name);
        return Vec::new();
    }
    registry.touch(device_name, source);

    let mut notices = Vec::new();
    for message in &batch.messages {
        match message {
            Message::ParameterResponse { channel_index, fields }
            | Message::StatusUpdate { channel_index, values: fields } => {
                match *channel_index {
                    -1 => {
                        registry.merge_device_fields(device_name, fields);
                        notices.push(MasterNotice::DeviceUpdated {
                            device_name: device_name.to_string(),
                            channel_index: -1,
                        });
                    }
                    index if index >= 0 => {
                        registry.merge_channel(device_name, index, fields);
                        notices.push(MasterNotice::DeviceUpdated {
                            device_name: device_name.to_string(),
                            channel_index: index,
                        });
                    }
                    // The "all" scope must never appear in responses.
                    index => {
                        log::warn!(
                            "[ingest] '{}' sent {} with illegal channelIndex {}, ignoring",
                            device_name,
                            message.message_type(),
                            index
                        );
                    }
                }
            }
            Message::ErrorResponse { error_value, error_string } => {
                notices.push(MasterNotice::ErrorReported {
                    device_name: device_name.to_string(),
                    error_value: *error_value,
                    error_string: error_string.clone(),
                });
            }
            Message::ParameterRequest { .. } | Message::ParameterCommand { .. } => {
                // Request traffic addressed at a pure master carries no action.
                log::debug!(
                    "[ingest] ignoring inbound {} from '{}'",
                    message.message_type(),
                    device_name
                );
            }
            Message::Unknown { message_type } => {
                log::debug!(
                    "[ingest] unknown message type '{}' from '{}', ignoring",
                    message_type,
                    device_name
                );
            }
            Message::Malformed { detail } => {
                log::warn!("[ingest] malformed message from '{}': {}", device_name, detail);
            }
        }
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DeviceType, MulticastBase, Role, ServiceIdentity};
    use serde_json::{Map, Value};

    fn seeded_registry() -> Registry {
        let registry = Registry::new();
        registry.upsert_present(
            &ServiceIdentity {
                device_name: "StageLeft".to_string(),
                role: Role::Slave,
                model: "RX-4".to_string(),
                device_type: DeviceType::WirelessReceiver,
                multicast_base: Some(MulticastBase::new(239, 10, 1)),
            },
            None,
            60,
        );
        registry
    }

    fn fields(json: Value) -> Map<String, Value> {
        json.as_object().expect("object").clone()
    }

    fn source() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 9)
    }

    #[test]
    fn test_unknown_sender_dropped() {
        let registry = seeded_registry();
        let batch = Batch {
            transmitting_device: "Intruder".to_string(),
            receiving_device: None,
            messages: vec![Message::ParameterResponse {
                channel_index: -1,
                fields: fields(serde_json::json!({"model": "Spoof"})),
            }],
        };
        assert!(ingest_batch(&registry, &batch, source()).is_empty());
        assert!(!registry.contains("Intruder"));
    }

    #[test]
    fn test_device_level_merge_and_address_refresh() {
        let registry = seeded_registry();
        let mut batch = Batch::new("StageLeft");
        batch.push(Message::ParameterResponse {
            channel_index: -1,
            fields: fields(serde_json::json!({
                "protocolVersion": "1.0.0",
                "channelIndices": [0, 1]
            })),
        });

        let notices = ingest_batch(&registry, &batch, source());
        assert_eq!(
            notices,
            vec![MasterNotice::DeviceUpdated {
                device_name: "StageLeft".to_string(),
                channel_index: -1
            }]
        );
        let record = registry.get("StageLeft").expect("record");
        assert_eq!(record.ip_address, Some(source()));
        assert_eq!(record.channel_indices, vec![0, 1]);
    }

    #[test]
    fn test_channel_merge_from_status_update() {
        let registry = seeded_registry();
        let mut batch = Batch::new("StageLeft");
        batch.push(Message::StatusUpdate {
            channel_index: 0,
            values: fields(serde_json::json!({"audioLevel": -18.5})),
        });

        let notices = ingest_batch(&registry, &batch, source());
        assert_eq!(notices.len(), 1);
        let record = registry.get("StageLeft").expect("record");
        assert_eq!(record.channels[&0]["audioLevel"], serde_json::json!(-18.5));
    }

    #[test]
    fn test_wildcard_response_ignored() {
        let registry = seeded_registry();
        let mut batch = Batch::new("StageLeft");
        batch.push(Message::ParameterResponse {
            channel_index: -2,
            fields: fields(serde_json::json!({"model": "ShouldNotMerge"})),
        });

        assert!(ingest_batch(&registry, &batch, source()).is_empty());
        assert_eq!(registry.get("StageLeft").expect("record").model, "RX-4");
    }

    #[test]
    fn test_errors_surface_without_mutation() {
        let registry = seeded_registry();
        let before = registry.get("StageLeft").expect("record");

        let mut batch = Batch::new("StageLeft");
        batch.push(Message::error(ErrorValue::ParameterLocked, "Parameter 'subDevice' is locked"));

        let notices = ingest_batch(&registry, &batch, source());
        assert_eq!(
            notices,
            vec![MasterNotice::ErrorReported {
                device_name: "StageLeft".to_string(),
                error_value: ErrorValue::ParameterLocked,
                error_string: "Parameter 'subDevice' is locked".to_string(),
            }]
        );
        let after = registry.get("StageLeft").expect("record");
        assert_eq!(after.channels.len(), before.channels.len());
        assert_eq!(after.device_fields, before.device_fields);
    }
}
