// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service announcement: register the participant identity, goodbye on
//! shutdown.

use crate::config::SERVICE_TYPE;
use crate::discovery::{TXT_DEVICE_TYPE, TXT_FUNCTION, TXT_MODEL, TXT_MULTICAST_ADDRESS};
use crate::error::{Error, Result};
use crate::identity::ServiceIdentity;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Advertises one Virgil participant via mDNS.
///
/// The daemon re-announces and answers queries on its own; unregistering
/// emits the records with TTL 0 (the goodbye). Shutdown is automatic on
/// drop and safe to call twice.
pub struct Announcer {
    daemon: Arc<ServiceDaemon>,
    fullname: String,
    shutdown_called: AtomicBool,
}

impl Announcer {
    /// Register `identity` at `ip:port`.
    ///
    /// Slaves must carry a multicast base; masters must not announce one.
    pub fn register(
        daemon: Arc<ServiceDaemon>,
        identity: &ServiceIdentity,
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<Self> {
        if identity.device_name.is_empty() {
            return Err(Error::InvalidConfig("device name must not be empty".to_string()));
        }
        if identity.role.serves_parameters() && identity.multicast_base.is_none() {
            return Err(Error::InvalidConfig(format!(
                "role '{}' requires a multicast base",
                identity.role
            )));
        }

        let mut txt = HashMap::new();
        txt.insert(TXT_FUNCTION.to_string(), identity.role.as_str().to_string());
        txt.insert(TXT_MODEL.to_string(), identity.model.clone());
        txt.insert(TXT_DEVICE_TYPE.to_string(), identity.device_type.as_str().to_string());
        if let Some(base) = identity.multicast_base {
            txt.insert(TXT_MULTICAST_ADDRESS.to_string(), base.to_string());
        }

        let host = format!("{}.local.", dns_hostname(&identity.device_name));
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &identity.device_name,
            &host,
            IpAddr::V4(ip),
            port,
            Some(txt),
        )
        .map_err(|e| Error::Mdns(format!("service registration failed: {}", e)))?;

        let fullname = service.get_fullname().to_string();
        daemon
            .register(service)
            .map_err(|e| Error::Mdns(format!("service registration failed: {}", e)))?;

        log::info!(
            "[mDNS] announcing '{}' ({}) at {}:{}",
            identity.device_name,
            identity.role,
            ip,
            port
        );

        Ok(Self {
            daemon,
            fullname,
            shutdown_called: AtomicBool::new(false),
        })
    }

    /// Unregister the service, emitting the mDNS goodbye (TTL 0).
    ///
    /// Called automatically on drop; subsequent calls are no-ops.
    pub fn shutdown(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.daemon.unregister(&self.fullname) {
            Ok(status) => {
                // Wait for the goodbye to flush; callers typically shut the
                // daemon down right after.
                let _ = status.recv_timeout(std::time::Duration::from_secs(1));
                log::info!("[mDNS] goodbye sent for '{}'", self.fullname);
            }
            Err(e) => log::warn!("[mDNS] failed to unregister '{}': {}", self.fullname, e),
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sanitize a device name for use as a DNS hostname (lowercase,
/// alphanumerics and dashes only).
fn dns_hostname(device_name: &str) -> String {
    let sanitized: String = device_name
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if sanitized.is_empty() {
        "virgil-device".to_string()
    } else {
        sanitized
    }
}
