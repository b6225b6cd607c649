// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network interface discovery for multicast and announcements.

use std::net::{IpAddr, Ipv4Addr};

/// Interface used for multicast group membership.
///
/// Honors the `VIRGIL_MULTICAST_IF` environment variable, then falls back
/// to the first non-loopback IPv4 interface, then to `UNSPECIFIED`.
pub fn multicast_interface() -> Ipv4Addr {
    if let Ok(var) = std::env::var("VIRGIL_MULTICAST_IF") {
        if let Ok(addr) = var.parse::<Ipv4Addr>() {
            log::debug!("[iface] Using VIRGIL_MULTICAST_IF override: {}", addr);
            return addr;
        }
        log::warn!(
            "[iface] Invalid VIRGIL_MULTICAST_IF='{}' -- falling back to auto-detect",
            var
        );
    }

    list_ipv4_interfaces().first().copied().unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Primary IPv4 address of this host, used when registering the discovery
/// service record.
///
/// Falls back to interface enumeration, then loopback (a loopback record is
/// still resolvable for same-host testing).
pub fn primary_ipv4() -> Ipv4Addr {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(addr)) => return addr,
        Ok(IpAddr::V6(_)) | Err(_) => {}
    }

    if let Some(addr) = list_ipv4_interfaces().first().copied() {
        return addr;
    }

    log::warn!("[iface] No non-loopback IPv4 interface found, using loopback");
    Ipv4Addr::LOCALHOST
}

/// All non-loopback IPv4 interfaces via the `local_ip_address` crate.
fn list_ipv4_interfaces() -> Vec<Ipv4Addr> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[iface] Failed to list network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut addrs = Vec::new();
    for (_name, ip) in interfaces {
        if let IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                addrs.push(ipv4);
            }
        }
    }
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_ipv4_is_ipv4() {
        // Whatever the environment, we must come back with some IPv4 address.
        let addr = primary_ipv4();
        assert!(!addr.is_multicast());
    }

    #[test]
    fn test_multicast_interface_never_panics() {
        let _ = multicast_interface();
    }
}
