// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! mDNS-style presence service for Virgil participants.
//!
//! Every participant owns a `"<deviceName>._virgil._udp.local."` service
//! instance with TXT keys `function`, `model`, `deviceType`, and (for
//! slaves) `multicastAddress`. The `mdns-sd` daemon owns announcement
//! cadence, cache TTL refresh, and the goodbye on unregister; this module
//! layers Virgil presence semantics on top of its event stream:
//!
//! - [`Announcer`] registers the identity and emits the goodbye on
//!   shutdown.
//! - [`Browser`] turns daemon events into [`DiscoveryEvent`]s
//!   (`ServiceResolved` -> present, `ServiceRemoved` -> absent; the
//!   latter covers both goodbye packets and TTL expiry).
//! - [`browser::scan_used_bases`] + [`browser::pick_lowest_available`]
//!   implement the slave's startup multicast-base selection.

use crate::config::SERVICE_TYPE;
use crate::identity::{DeviceType, MulticastBase, Role, ServiceIdentity};
use mdns_sd::ResolvedService;
use std::net::{IpAddr, Ipv4Addr};

pub mod announcer;
pub mod browser;

pub use announcer::Announcer;
pub use browser::{pick_lowest_available, scan_used_bases, Browser};

/// TXT key for the participant role.
pub const TXT_FUNCTION: &str = "function";
/// TXT key for the model string.
pub const TXT_MODEL: &str = "model";
/// TXT key for the device type.
pub const TXT_DEVICE_TYPE: &str = "deviceType";
/// TXT key for the slave's three-octet multicast base.
pub const TXT_MULTICAST_ADDRESS: &str = "multicastAddress";

/// Presence transition observed on the LAN.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    PeerPresent {
        identity: ServiceIdentity,
        ip: Option<Ipv4Addr>,
    },
    PeerAbsent {
        device_name: String,
    },
}

/// Extract the instance (device) name from a full service name.
#[must_use]
pub fn instance_from_fullname(fullname: &str) -> Option<&str> {
    let suffix = format!(".{}", SERVICE_TYPE);
    fullname.strip_suffix(suffix.as_str()).filter(|name| !name.is_empty())
}

/// Parse a resolved service record into a peer identity.
///
/// Records missing a required TXT key are dropped with a warning (they
/// are not Virgil participants, or they are broken ones).
#[must_use]
pub fn parse_resolved(info: &ResolvedService) -> Option<(ServiceIdentity, Option<Ipv4Addr>)> {
    let device_name = instance_from_fullname(&info.fullname)?.to_string();
    let txt = &info.txt_properties;

    let Some(role) = txt.get_property_val_str(TXT_FUNCTION).and_then(Role::parse) else {
        log::warn!("[mDNS] '{}' has missing or invalid '{}' TXT key", device_name, TXT_FUNCTION);
        return None;
    };
    let model = match txt.get_property_val_str(TXT_MODEL) {
        Some(model) if !model.is_empty() => model.to_string(),
        _ => {
            log::warn!("[mDNS] '{}' has missing or empty '{}' TXT key", device_name, TXT_MODEL);
            return None;
        }
    };
    let Some(device_type) = txt
        .get_property_val_str(TXT_DEVICE_TYPE)
        .and_then(DeviceType::parse)
    else {
        log::warn!("[mDNS] '{}' has missing or invalid '{}' TXT key", device_name, TXT_DEVICE_TYPE);
        return None;
    };

    let multicast_base = txt
        .get_property_val_str(TXT_MULTICAST_ADDRESS)
        .and_then(|s| s.parse::<MulticastBase>().ok());
    if role.serves_parameters() && multicast_base.is_none() {
        log::warn!(
            "[mDNS] slave '{}' announces without a valid '{}' TXT key",
            device_name,
            TXT_MULTICAST_ADDRESS
        );
        return None;
    }

    let ip = info.addresses.iter().find_map(|addr| match addr.to_ip_addr() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    });

    Some((
        ServiceIdentity {
            device_name,
            role,
            model,
            device_type,
            multicast_base,
        },
        ip,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_from_fullname() {
        assert_eq!(
            instance_from_fullname("StageLeft._virgil._udp.local."),
            Some("StageLeft")
        );
        assert_eq!(instance_from_fullname("._virgil._udp.local."), None);
        assert_eq!(instance_from_fullname("StageLeft._other._udp.local."), None);
    }
}
