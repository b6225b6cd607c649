// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slave orchestrator: parameter tree + request handler + telemetry timer.
//!
//! Boot order: pick the multicast base (scan unless overridden), bind the
//! control socket, build the device state, start announcing, then start
//! the request loop and the 500 ms telemetry timer. Shutdown runs the
//! reverse: telemetry stops, the discovery goodbye goes out, the request
//! loop drains, multicast groups are left, and the socket closes.

use crate::config::{
    BASE_SCAN_WINDOW, RECV_POLL_TIMEOUT, STOP_POLL_INTERVAL, TELEMETRY_PERIOD, VIRGIL_PORT,
};
use crate::discovery::{scan_used_bases, Announcer};
use crate::error::{Error, Result};
use crate::identity::{DeviceType, MulticastBase, Role, ServiceIdentity};
use crate::model::{Channel, DeviceState, ParamValue};
use crate::protocol::{self, codec, dispatch, Batch, Message, ReplyDest};
use crate::transport::{iface, ControlSocket, Datagram};
use mdns_sd::ServiceDaemon;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Slave startup configuration.
#[derive(Debug, Clone)]
pub struct SlaveConfig {
    pub device_name: String,
    pub model: String,
    pub device_type: DeviceType,
    /// `(channelIndex, parameter set)` pairs; indices must be unique and
    /// non-negative.
    pub channels: Vec<(i32, Channel)>,
    /// Control port; non-default values are for multi-instance testing.
    pub control_port: u16,
    /// Explicit base skips the startup scan (tests, fixed deployments).
    pub multicast_base: Option<MulticastBase>,
    /// Scan window before picking a base.
    pub scan_window: Duration,
}

impl SlaveConfig {
    pub fn new(
        device_name: impl Into<String>,
        model: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            model: model.into(),
            device_type,
            channels: Vec::new(),
            control_port: VIRGIL_PORT,
            multicast_base: None,
            scan_window: BASE_SCAN_WINDOW,
        }
    }

    #[must_use]
    pub fn with_channel(mut self, index: i32, channel: Channel) -> Self {
        self.channels.push((index, channel));
        self
    }

    #[must_use]
    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    #[must_use]
    pub fn with_multicast_base(mut self, base: MulticastBase) -> Self {
        self.multicast_base = Some(base);
        self
    }

    #[must_use]
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }
}

struct SlaveShared {
    state: Mutex<DeviceState>,
    socket: ControlSocket,
    running: AtomicBool,
}

/// A running slave participant.
///
/// Dropping it performs the orderly shutdown; [`Slave::stop`] does the
/// same explicitly.
pub struct Slave {
    shared: Arc<SlaveShared>,
    daemon: Arc<ServiceDaemon>,
    announcer: Option<Announcer>,
    request_thread: Option<JoinHandle<()>>,
    telemetry_thread: Option<JoinHandle<()>>,
}

impl Slave {
    /// Boot a slave from `config`.
    pub fn start(config: SlaveConfig) -> Result<Self> {
        if config.device_name.is_empty() {
            return Err(Error::InvalidConfig("device name must not be empty".to_string()));
        }

        let daemon = Arc::new(
            ServiceDaemon::new().map_err(|e| Error::Mdns(format!("daemon start failed: {}", e)))?,
        );

        // Base selection happens before we announce anything ourselves.
        let multicast_base = match config.multicast_base {
            Some(base) => base,
            None => {
                log::info!(
                    "[slave] scanning {}s for multicast bases in use",
                    config.scan_window.as_secs()
                );
                let used = scan_used_bases(&daemon, config.scan_window)?;
                crate::discovery::pick_lowest_available(&used)
            }
        };
        log::info!("[slave] '{}' using multicast base {}", config.device_name, multicast_base);

        let socket = ControlSocket::bind_to(config.control_port)?;

        let mut state = DeviceState::new(
            config.device_name.clone(),
            config.model.clone(),
            config.device_type,
            multicast_base,
        );
        for (index, channel) in config.channels {
            state.add_channel(index, channel)?;
        }

        let identity = ServiceIdentity {
            device_name: config.device_name.clone(),
            role: Role::Slave,
            model: config.model,
            device_type: config.device_type,
            multicast_base: Some(multicast_base),
        };
        let announcer = Announcer::register(
            Arc::clone(&daemon),
            &identity,
            iface::primary_ipv4(),
            config.control_port,
        )?;

        let shared = Arc::new(SlaveShared {
            state: Mutex::new(state),
            socket,
            running: AtomicBool::new(true),
        });

        let request_shared = Arc::clone(&shared);
        let request_thread = thread::spawn(move || request_loop(&request_shared));
        let telemetry_shared = Arc::clone(&shared);
        let telemetry_thread = thread::spawn(move || telemetry_loop(&telemetry_shared));

        Ok(Self {
            shared,
            daemon,
            announcer: Some(announcer),
            request_thread: Some(request_thread),
            telemetry_thread: Some(telemetry_thread),
        })
    }

    #[must_use]
    pub fn device_name(&self) -> String {
        self.shared.state.lock().device_name().to_string()
    }

    #[must_use]
    pub fn multicast_base(&self) -> MulticastBase {
        self.shared.state.lock().multicast_base()
    }

    #[must_use]
    pub fn control_port(&self) -> u16 {
        self.shared.socket.port()
    }

    #[must_use]
    pub fn channel_indices(&self) -> Vec<i32> {
        self.shared.state.lock().channel_indices()
    }

    /// Device-level fields as a `channelIndex == -1` response would carry
    /// them.
    #[must_use]
    pub fn device_snapshot(&self) -> Map<String, Value> {
        self.shared.state.lock().device_info()
    }

    /// Full descriptor map for one channel.
    #[must_use]
    pub fn channel_snapshot(&self, index: i32) -> Option<Map<String, Value>> {
        self.shared.state.lock().channel_descriptor(index)
    }

    /// Feed a sensor sample into a continuous parameter (driver surface;
    /// real firmware wires its ADCs here).
    pub fn simulate_continuous(&self, index: i32, name: &str, value: ParamValue) -> Result<()> {
        self.shared.state.lock().set_continuous(index, name, value)
    }

    /// Orderly shutdown: telemetry, goodbye, request loop, socket.
    pub fn stop(mut self) {
        self.stop_impl();
    }

    fn stop_impl(&mut self) {
        if !self.shared.running.swap(false, Ordering::Relaxed) {
            return;
        }
        log::info!("[slave] stopping");
        if let Some(handle) = self.telemetry_thread.take() {
            let _ = handle.join();
        }
        if let Some(announcer) = self.announcer.take() {
            announcer.shutdown();
        }
        if let Some(handle) = self.request_thread.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.daemon.shutdown() {
            log::debug!("[slave] mDNS daemon shutdown: {}", e);
        }
        self.shared.socket.leave_all();
    }
}

impl Drop for Slave {
    fn drop(&mut self) {
        self.stop_impl();
    }
}

/// Request handler: decode, dispatch under the state lock, send replies.
fn request_loop(shared: &SlaveShared) {
    log::debug!("[slave] request loop started");
    while shared.running.load(Ordering::Relaxed) {
        let datagram = match shared.socket.recv(RECV_POLL_TIMEOUT) {
            Ok(Some(datagram)) => datagram,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("[slave] receive error: {}", e);
                thread::sleep(STOP_POLL_INTERVAL);
                continue;
            }
        };
        handle_datagram(shared, &datagram);
    }
    log::debug!("[slave] request loop stopped");
}

fn handle_datagram(shared: &SlaveShared, datagram: &Datagram) {
    let Some(source_ip) = datagram.source_ipv4() else {
        log::debug!("[slave] dropping non-IPv4 datagram from {}", datagram.source);
        return;
    };

    let device_name = shared.state.lock().device_name().to_string();
    if datagram.oversize {
        reply_malformed(shared, &device_name, source_ip, "Datagram exceeds 4096 bytes");
        return;
    }

    let batch = match codec::decode_batch(&datagram.payload) {
        Ok(batch) => batch,
        Err(fault) => {
            reply_malformed(shared, &device_name, source_ip, fault.detail);
            return;
        }
    };

    let outbound = {
        let mut state = shared.state.lock();
        dispatch::handle_batch(&mut state, &batch)
    };
    // No lock is held across sends.
    for out in outbound {
        send_outbound(shared, &out.batch, out.dest, source_ip);
    }
}

fn reply_malformed(shared: &SlaveShared, device_name: &str, source_ip: Ipv4Addr, detail: impl Into<String>) {
    let batch = protocol::malformed_reply(device_name, detail);
    send_outbound(shared, &batch, ReplyDest::Peer, source_ip);
}

fn send_outbound(shared: &SlaveShared, batch: &Batch, dest: ReplyDest, source_ip: Ipv4Addr) {
    let port = shared.socket.port();
    for payload in codec::encode_batches_within_limit(batch) {
        match dest {
            // Replies go to the source IP at the control port, not the
            // source ephemeral port.
            ReplyDest::Peer => shared.socket.send_unicast(&payload, source_ip, port),
            ReplyDest::Group(group) => shared.socket.send_multicast(&payload, group, port),
        }
    }
}

/// Telemetry timer: every tick, one `StatusUpdate` per channel with its
/// current continuous values, multicast to `<base>.<channel>`.
fn telemetry_loop(shared: &SlaveShared) {
    log::debug!("[slave] telemetry loop started");
    while shared.running.load(Ordering::Relaxed) {
        let updates = {
            let state = shared.state.lock();
            let device_name = state.device_name().to_string();
            let base = state.multicast_base();
            state
                .channel_indices()
                .into_iter()
                .filter_map(|index| {
                    let values = state.channel(index)?.continuous_values();
                    if values.is_empty() {
                        return None;
                    }
                    let group = base.group(index)?;
                    let mut batch = Batch::new(device_name.clone());
                    batch.push(Message::StatusUpdate { channel_index: index, values });
                    Some((group, batch))
                })
                .collect::<Vec<_>>()
        };

        let port = shared.socket.port();
        for (group, batch) in updates {
            for payload in codec::encode_batches_within_limit(&batch) {
                shared.socket.send_multicast(&payload, group, port);
            }
        }

        // Chunked sleep for responsive shutdown.
        let deadline = Instant::now() + TELEMETRY_PERIOD;
        while Instant::now() < deadline {
            if !shared.running.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }
    log::debug!("[slave] telemetry loop stopped");
}
