// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer observation: browse loop and multicast-base selection.

use crate::config::{FALLBACK_MULTICAST_BASE, RECV_POLL_TIMEOUT, SERVICE_TYPE, STOP_POLL_INTERVAL};
use crate::discovery::{instance_from_fullname, parse_resolved, DiscoveryEvent, TXT_MULTICAST_ADDRESS};
use crate::error::{Error, Result};
use crate::identity::MulticastBase;
use crossbeam::channel::Sender;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Background browse loop feeding [`DiscoveryEvent`]s into a channel.
///
/// `ServiceResolved` maps to present, `ServiceRemoved` to absent; the
/// daemon's cache aging makes the latter fire on both goodbye packets and
/// natural TTL expiry. Our own announcements are filtered out.
pub struct Browser {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    daemon: Arc<ServiceDaemon>,
}

impl Browser {
    /// Start browsing. `own_name` suppresses self-observation.
    pub fn spawn(
        daemon: Arc<ServiceDaemon>,
        own_name: String,
        events: Sender<DiscoveryEvent>,
    ) -> Result<Self> {
        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Mdns(format!("browse failed: {}", e)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            log::debug!("[mDNS] browse loop started (self='{}')", own_name);
            while !stop_flag.load(Ordering::Relaxed) {
                match receiver.recv_timeout(RECV_POLL_TIMEOUT) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let Some((identity, ip)) = parse_resolved(&info) else {
                            continue;
                        };
                        if identity.device_name == own_name {
                            continue;
                        }
                        log::debug!(
                            "[mDNS] peer present: '{}' ({}, base={:?})",
                            identity.device_name,
                            identity.role,
                            identity.multicast_base
                        );
                        if events.send(DiscoveryEvent::PeerPresent { identity, ip }).is_err() {
                            break;
                        }
                    }
                    Ok(ServiceEvent::ServiceRemoved(_ty, fullname)) => {
                        let Some(name) = instance_from_fullname(&fullname) else {
                            continue;
                        };
                        if name == own_name {
                            continue;
                        }
                        log::debug!("[mDNS] peer absent: '{}'", name);
                        let event = DiscoveryEvent::PeerAbsent { device_name: name.to_string() };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => {
                        // Timeout, or the daemon went away; back off and
                        // re-check the stop flag either way.
                        thread::sleep(STOP_POLL_INTERVAL);
                    }
                }
            }
            log::debug!("[mDNS] browse loop stopped");
        });

        Ok(Self {
            handle: Some(handle),
            stop,
            daemon,
        })
    }

    /// Stop the browse loop and wait for it.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            log::debug!("[mDNS] stop_browse failed: {}", e);
        }
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Collect the multicast bases announced by peers during `window`.
///
/// Run once at slave startup, before this participant announces.
pub fn scan_used_bases(
    daemon: &ServiceDaemon,
    window: std::time::Duration,
) -> Result<HashSet<MulticastBase>> {
    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| Error::Mdns(format!("scan browse failed: {}", e)))?;

    let mut used = HashSet::new();
    let start = Instant::now();
    loop {
        let remaining = window.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining.min(RECV_POLL_TIMEOUT)) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                // Any record announcing a base reserves it, whether or not
                // the rest of the identity parses.
                if let Some(base) = info
                    .txt_properties
                    .get_property_val_str(TXT_MULTICAST_ADDRESS)
                    .and_then(|s| s.parse::<MulticastBase>().ok())
                {
                    log::debug!("[mDNS] scan: base {} in use by '{}'", base, info.fullname);
                    used.insert(base);
                }
            }
            Ok(_) | Err(_) => {}
        }
    }

    if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
        log::debug!("[mDNS] stop_browse after scan failed: {}", e);
    }
    log::info!("[mDNS] base scan complete: {} base(s) in use", used.len());
    Ok(used)
}

/// Deterministic lowest-available selection over `224.1.1 ... 239.255.255`
/// in ascending octet order; two slaves scanning the same LAN pick
/// distinct bases. Falls back to the out-of-range default only when every
/// candidate is taken.
#[must_use]
pub fn pick_lowest_available(used: &HashSet<MulticastBase>) -> MulticastBase {
    for a in 224..=239u8 {
        for b in 1..=255u8 {
            for c in 1..=255u8 {
                let candidate = MulticastBase::new(a, b, c);
                if !used.contains(&candidate) {
                    return candidate;
                }
            }
        }
    }
    MulticastBase::new(
        FALLBACK_MULTICAST_BASE[0],
        FALLBACK_MULTICAST_BASE[1],
        FALLBACK_MULTICAST_BASE[2],
    )
}
