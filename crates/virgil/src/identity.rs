// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant identity: roles, device types, multicast bases.
//!
//! Every Virgil participant carries a stable device name (matching its
//! audio-transport endpoint name), a role, a model string, and a device
//! type. Slaves additionally own a three-octet multicast base combined
//! with a channel index to form that channel's telemetry group.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Participant role as announced in the discovery `function` TXT key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
    /// Acts as both master and slave on the same control port.
    Both,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
            Role::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "master" => Some(Role::Master),
            "slave" => Some(Role::Slave),
            "both" => Some(Role::Both),
            _ => None,
        }
    }

    /// True when the participant owns a parameter tree (slaves and combos).
    #[must_use]
    pub fn serves_parameters(self) -> bool {
        matches!(self, Role::Slave | Role::Both)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device category advertised in discovery and device-level responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    DigitalStageBox,
    WirelessReceiver,
    WirelessTransmitter,
    WirelessCombo,
    Mixer,
    Dsp,
    Computer,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::DigitalStageBox => "digitalStageBox",
            DeviceType::WirelessReceiver => "wirelessReceiver",
            DeviceType::WirelessTransmitter => "wirelessTransmitter",
            DeviceType::WirelessCombo => "wirelessCombo",
            DeviceType::Mixer => "mixer",
            DeviceType::Dsp => "dsp",
            DeviceType::Computer => "computer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "digitalStageBox" => Some(DeviceType::DigitalStageBox),
            "wirelessReceiver" => Some(DeviceType::WirelessReceiver),
            "wirelessTransmitter" => Some(DeviceType::WirelessTransmitter),
            "wirelessCombo" => Some(DeviceType::WirelessCombo),
            "mixer" => Some(DeviceType::Mixer),
            "dsp" => Some(DeviceType::Dsp),
            "computer" => Some(DeviceType::Computer),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-octet IPv4 prefix owned by a slave; `<base>.<channelIndex>` is the
/// telemetry multicast group for that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MulticastBase([u8; 3]);

impl MulticastBase {
    #[must_use]
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    pub fn octets(self) -> [u8; 3] {
        self.0
    }

    /// Telemetry group address for `channel_index`, or `None` when the
    /// index cannot form a valid last octet (negative or > 255).
    #[must_use]
    pub fn group(self, channel_index: i32) -> Option<Ipv4Addr> {
        let last = u8::try_from(channel_index).ok()?;
        Some(Ipv4Addr::new(self.0[0], self.0[1], self.0[2], last))
    }

    /// True when the base lies in the range scanned during slave startup
    /// (`224.1.1` ... `239.255.255`).
    #[must_use]
    pub fn in_selection_range(self) -> bool {
        (224..=239).contains(&self.0[0]) && self.0[1] >= 1 && self.0[2] >= 1
    }
}

impl fmt::Display for MulticastBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for MulticastBase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 3];
        let mut parts = s.split('.');
        for slot in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| format!("expected three octets, got '{}'", s))?;
            *slot = part
                .parse::<u8>()
                .map_err(|_| format!("invalid octet '{}' in '{}'", part, s))?;
        }
        if parts.next().is_some() {
            return Err(format!("expected three octets, got '{}'", s));
        }
        Ok(Self(octets))
    }
}

/// Identity a participant announces over discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceIdentity {
    pub device_name: String,
    pub role: Role,
    pub model: String,
    pub device_type: DeviceType,
    /// Required for `slave`/`both`; masters announce without one.
    pub multicast_base: Option<MulticastBase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Master, Role::Slave, Role::Both] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("observer"), None);
    }

    #[test]
    fn test_device_type_round_trip() {
        for ty in [
            DeviceType::DigitalStageBox,
            DeviceType::WirelessReceiver,
            DeviceType::WirelessTransmitter,
            DeviceType::WirelessCombo,
            DeviceType::Mixer,
            DeviceType::Dsp,
            DeviceType::Computer,
        ] {
            assert_eq!(DeviceType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(DeviceType::parse("toaster"), None);
    }

    #[test]
    fn test_base_parse_and_display() {
        let base: MulticastBase = "224.1.1".parse().expect("valid base");
        assert_eq!(base, MulticastBase::new(224, 1, 1));
        assert_eq!(base.to_string(), "224.1.1");

        assert!("224.1".parse::<MulticastBase>().is_err());
        assert!("224.1.1.1".parse::<MulticastBase>().is_err());
        assert!("224.1.x".parse::<MulticastBase>().is_err());
        assert!("224.1.300".parse::<MulticastBase>().is_err());
    }

    #[test]
    fn test_group_address() {
        let base = MulticastBase::new(239, 10, 2);
        assert_eq!(base.group(0), Some(Ipv4Addr::new(239, 10, 2, 0)));
        assert_eq!(base.group(17), Some(Ipv4Addr::new(239, 10, 2, 17)));
        assert_eq!(base.group(-1), None);
        assert_eq!(base.group(256), None);
    }

    #[test]
    fn test_selection_range() {
        assert!(MulticastBase::new(224, 1, 1).in_selection_range());
        assert!(MulticastBase::new(239, 255, 255).in_selection_range());
        assert!(!MulticastBase::new(244, 1, 1).in_selection_range());
        assert!(!MulticastBase::new(224, 0, 1).in_selection_range());
    }
}
