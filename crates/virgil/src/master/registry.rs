// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master-side device registry.
//!
//! One record per discovered device, created on the first parseable
//! announcement and kept after the device goes absent so the
//! audio-transport link is retained. The registry is the exclusive owner
//! of every record; readers get clones.

use crate::identity::{DeviceType, MulticastBase, Role, ServiceIdentity};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};

/// Everything the master knows about one device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_name: String,
    pub role: Role,
    pub model: String,
    pub device_type: DeviceType,
    pub protocol_version: String,
    pub multicast_base: Option<MulticastBase>,
    pub ip_address: Option<Ipv4Addr>,
    /// Device-level fields as merged from `channelIndex == -1` responses,
    /// unknown keys preserved verbatim.
    pub device_fields: Map<String, Value>,
    /// Channel slots as seen in responses (raw descriptor maps).
    pub channels: BTreeMap<i32, Map<String, Value>>,
    pub channel_indices: Vec<i32>,
    pub is_present: bool,
    pub ttl_seconds: u64,
    pub last_seen: SystemTime,
}

impl DeviceRecord {
    fn from_identity(identity: &ServiceIdentity, ip: Option<Ipv4Addr>, ttl_seconds: u64) -> Self {
        Self {
            device_name: identity.device_name.clone(),
            role: identity.role,
            model: identity.model.clone(),
            device_type: identity.device_type,
            protocol_version: String::new(),
            multicast_base: identity.multicast_base,
            ip_address: ip,
            device_fields: Map::new(),
            channels: BTreeMap::new(),
            channel_indices: Vec::new(),
            is_present: true,
            ttl_seconds,
            last_seen: SystemTime::now(),
        }
    }

    /// True while `now - last_seen` stays within the advertised TTL.
    #[must_use]
    pub fn within_ttl(&self, now: SystemTime, grace: Duration) -> bool {
        match now.duration_since(self.last_seen) {
            Ok(age) => age <= Duration::from_secs(self.ttl_seconds) + grace,
            // last_seen in the future (clock step): treat as fresh.
            Err(_) => true,
        }
    }
}

/// Shared registry handle. Creation and enrichment go through the writer
/// lock; snapshots are cheap clones.
#[derive(Default)]
pub struct Registry {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a record from a discovery announcement.
    ///
    /// Returns `true` when the device newly transitioned to present
    /// (first sighting or re-observation after absent).
    pub fn upsert_present(
        &self,
        identity: &ServiceIdentity,
        ip: Option<Ipv4Addr>,
        ttl_seconds: u64,
    ) -> bool {
        let mut records = self.records.write();
        match records.get_mut(&identity.device_name) {
            Some(record) => {
                let newly_present = !record.is_present;
                record.role = identity.role;
                record.model = identity.model.clone();
                record.device_type = identity.device_type;
                if identity.multicast_base.is_some() {
                    record.multicast_base = identity.multicast_base;
                }
                if ip.is_some() {
                    record.ip_address = ip;
                }
                record.ttl_seconds = ttl_seconds;
                record.last_seen = SystemTime::now();
                record.is_present = true;
                if newly_present {
                    log::info!("[registry] device '{}' present again", identity.device_name);
                }
                newly_present
            }
            None => {
                log::info!(
                    "[registry] discovered '{}' ({}, {})",
                    identity.device_name,
                    identity.role,
                    identity.device_type
                );
                records.insert(
                    identity.device_name.clone(),
                    DeviceRecord::from_identity(identity, ip, ttl_seconds),
                );
                true
            }
        }
    }

    /// Goodbye or TTL expiry: mark absent, keep the record. Returns `true`
    /// when the device was present.
    pub fn mark_absent(&self, device_name: &str) -> bool {
        let mut records = self.records.write();
        match records.get_mut(device_name) {
            Some(record) if record.is_present => {
                record.is_present = false;
                log::info!("[registry] device '{}' absent", device_name);
                true
            }
            _ => false,
        }
    }

    /// TTL-based presence inference: any present record older than its
    /// advertised TTL (plus `grace`) flips to absent. Returns the names
    /// that changed.
    ///
    /// The master's discovery driver runs this every poll round, so a
    /// peer that stops announcing goes absent even without a removal
    /// event from the mDNS daemon.
    pub fn mark_stale(&self, now: SystemTime, grace: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        let mut records = self.records.write();
        for (name, record) in records.iter_mut() {
            if record.is_present && !record.within_ttl(now, grace) {
                record.is_present = false;
                log::info!("[registry] device '{}' absent (TTL expired)", name);
                expired.push(name.clone());
            }
        }
        expired
    }

    /// Refresh liveness and address from any traffic received off the
    /// device.
    pub fn touch(&self, device_name: &str, ip: Ipv4Addr) {
        if let Some(record) = self.records.write().get_mut(device_name) {
            record.ip_address = Some(ip);
            record.last_seen = SystemTime::now();
        }
    }

    /// Merge device-level response fields (`channelIndex == -1`).
    ///
    /// Known identity fields are lifted into their typed slots; everything
    /// else, recognised or not, lands in `device_fields` for forwarding.
    pub fn merge_device_fields(&self, device_name: &str, fields: &Map<String, Value>) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(device_name) else {
            return;
        };
        for (key, value) in fields {
            match key.as_str() {
                "model" => {
                    if let Some(s) = value.as_str() {
                        record.model = s.to_string();
                    }
                }
                "deviceType" => {
                    if let Some(ty) = value.as_str().and_then(DeviceType::parse) {
                        record.device_type = ty;
                    }
                }
                "protocolVersion" => {
                    if let Some(s) = value.as_str() {
                        record.protocol_version = s.to_string();
                    }
                }
                "multicastBase" => {
                    if let Some(base) = value.as_str().and_then(|s| s.parse().ok()) {
                        record.multicast_base = Some(base);
                    }
                }
                "channelIndices" => {
                    if let Some(indices) = parse_channel_indices(value) {
                        record.channel_indices = indices;
                    }
                }
                _ => {}
            }
            record.device_fields.insert(key.clone(), value.clone());
        }
    }

    /// Merge a channel-scope response or telemetry update into the
    /// channel's slot, creating the slot if needed.
    pub fn merge_channel(&self, device_name: &str, channel_index: i32, fields: &Map<String, Value>) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(device_name) else {
            return;
        };
        let slot = record.channels.entry(channel_index).or_default();
        for (key, value) in fields {
            slot.insert(key.clone(), value.clone());
        }
        if !record.channel_indices.contains(&channel_index) {
            record.channel_indices.push(channel_index);
            record.channel_indices.sort_unstable();
        }
    }

    #[must_use]
    pub fn contains(&self, device_name: &str) -> bool {
        self.records.read().contains_key(device_name)
    }

    #[must_use]
    pub fn get(&self, device_name: &str) -> Option<DeviceRecord> {
        self.records.read().get(device_name).cloned()
    }

    /// Snapshot of every record, sorted by device name.
    #[must_use]
    pub fn list(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.device_name.cmp(&b.device_name));
        records
    }
}

fn parse_channel_indices(value: &Value) -> Option<Vec<i32>> {
    let array = value.as_array()?;
    let mut indices = Vec::with_capacity(array.len());
    for entry in array {
        indices.push(i32::try_from(entry.as_i64()?).ok()?);
    }
    Some(indices)
}
