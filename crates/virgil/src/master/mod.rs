// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master orchestrator: discovery-driven registry + subscription manager.
//!
//! Three cooperating activities: the discovery driver (turns
//! [`DiscoveryEvent`]s into registry transitions and full parameter
//! requests), the response listener (ingests unicast replies and
//! subscribed multicast telemetry off the control socket), and the
//! application driver calling the control surface
//! (`list_devices`/`subscribe`/`send_command`/...).

use crate::config::{
    PRESENCE_GRACE, PRESENCE_TTL_SECS, RECV_POLL_TIMEOUT, STOP_POLL_INTERVAL, VIRGIL_PORT,
};
use crate::discovery::{Announcer, Browser, DiscoveryEvent};
use crate::error::{Error, Result};
use crate::identity::{DeviceType, Role, ServiceIdentity};
use crate::protocol::{codec, ingest, Batch, ErrorValue, MasterNotice, Message};
use crate::transport::{iface, ControlSocket};
use crossbeam::channel::{unbounded, Receiver, Sender};
use mdns_sd::ServiceDaemon;
use serde_json::{Map, Value};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub mod registry;

pub use registry::{DeviceRecord, Registry};

/// Master startup configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub device_name: String,
    /// Model string announced in discovery.
    pub model: String,
    pub device_type: DeviceType,
    /// Control port; non-default values are for multi-instance testing.
    pub control_port: u16,
}

impl MasterConfig {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            model: "VirgilMaster".to_string(),
            device_type: DeviceType::Computer,
            control_port: VIRGIL_PORT,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    #[must_use]
    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }
}

/// Events surfaced to the application driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MasterEvent {
    DeviceDiscovered { device_name: String },
    DeviceLost { device_name: String },
    /// Device-level (`-1`) or channel fields changed in the registry.
    DeviceUpdated { device_name: String, channel_index: i32 },
    /// A device answered with an `ErrorResponse`.
    ErrorReported {
        device_name: String,
        error_value: ErrorValue,
        error_string: String,
    },
}

struct MasterShared {
    device_name: String,
    registry: Registry,
    socket: ControlSocket,
    running: AtomicBool,
    events: Sender<MasterEvent>,
}

impl MasterShared {
    /// Full parameter request (`channelIndex == -2`) to a peer.
    fn send_full_request(&self, device_name: &str, ip: Ipv4Addr) {
        let mut batch = Batch::to_device(self.device_name.clone(), device_name);
        batch.push(Message::ParameterRequest { channel_index: -2 });
        match codec::encode_batch(&batch) {
            Ok(payload) => {
                log::info!("[master] requesting full parameter tree from '{}'", device_name);
                self.socket.send_unicast(&payload, ip, self.socket.port());
            }
            Err(e) => log::warn!("[master] failed to encode request for '{}': {}", device_name, e),
        }
    }
}

/// A running master participant.
pub struct Master {
    shared: Arc<MasterShared>,
    daemon: Arc<ServiceDaemon>,
    announcer: Option<Announcer>,
    browser: Option<Browser>,
    driver_thread: Option<JoinHandle<()>>,
    listener_thread: Option<JoinHandle<()>>,
    events: Receiver<MasterEvent>,
}

impl Master {
    /// Boot a master from `config`.
    pub fn start(config: MasterConfig) -> Result<Self> {
        if config.device_name.is_empty() {
            return Err(Error::InvalidConfig("device name must not be empty".to_string()));
        }

        let daemon = Arc::new(
            ServiceDaemon::new().map_err(|e| Error::Mdns(format!("daemon start failed: {}", e)))?,
        );
        let socket = ControlSocket::bind_to(config.control_port)?;

        let identity = ServiceIdentity {
            device_name: config.device_name.clone(),
            role: Role::Master,
            model: config.model.clone(),
            device_type: config.device_type,
            multicast_base: None,
        };
        let announcer = Announcer::register(
            Arc::clone(&daemon),
            &identity,
            iface::primary_ipv4(),
            config.control_port,
        )?;

        let (event_tx, event_rx) = unbounded();
        let shared = Arc::new(MasterShared {
            device_name: config.device_name.clone(),
            registry: Registry::new(),
            socket,
            running: AtomicBool::new(true),
            events: event_tx,
        });

        let (discovery_tx, discovery_rx) = unbounded();
        let browser = Browser::spawn(Arc::clone(&daemon), config.device_name, discovery_tx)?;

        let driver_shared = Arc::clone(&shared);
        let driver_thread = thread::spawn(move || discovery_driver(&driver_shared, &discovery_rx));
        let listener_shared = Arc::clone(&shared);
        let listener_thread = thread::spawn(move || listener_loop(&listener_shared));

        Ok(Self {
            shared,
            daemon,
            announcer: Some(announcer),
            browser: Some(browser),
            driver_thread: Some(driver_thread),
            listener_thread: Some(listener_thread),
            events: event_rx,
        })
    }

    /// Event stream for the application driver.
    #[must_use]
    pub fn events(&self) -> Receiver<MasterEvent> {
        self.events.clone()
    }

    /// Snapshot of every known device.
    #[must_use]
    pub fn list_devices(&self) -> Vec<DeviceRecord> {
        self.shared.registry.list()
    }

    #[must_use]
    pub fn device(&self, device_name: &str) -> Option<DeviceRecord> {
        self.shared.registry.get(device_name)
    }

    /// Multicast groups currently joined (one per subscribed channel).
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Ipv4Addr> {
        self.shared.socket.joined_groups()
    }

    /// Seed the registry without discovery (embedded deployments, tests,
    /// networks without multicast mDNS). Slave peers get the same full
    /// parameter request a discovered peer would.
    pub fn add_static_device(&self, identity: &ServiceIdentity, ip: Ipv4Addr) -> Result<()> {
        if identity.device_name.is_empty() {
            return Err(Error::InvalidConfig("device name must not be empty".to_string()));
        }
        self.shared.registry.upsert_present(identity, Some(ip), PRESENCE_TTL_SECS);
        if identity.role.serves_parameters() {
            self.shared.send_full_request(&identity.device_name, ip);
        }
        Ok(())
    }

    /// Join the telemetry group for one channel. Idempotent; `Ok(true)`
    /// when membership actually changed.
    pub fn subscribe(&self, device_name: &str, channel_index: i32) -> Result<bool> {
        let group = self.telemetry_group(device_name, channel_index)?;
        self.shared.socket.join_group(group)
    }

    /// Leave the telemetry group for one channel. Idempotent.
    pub fn unsubscribe(&self, device_name: &str, channel_index: i32) -> Result<bool> {
        let group = self.telemetry_group(device_name, channel_index)?;
        self.shared.socket.leave_group(group)
    }

    fn telemetry_group(&self, device_name: &str, channel_index: i32) -> Result<Ipv4Addr> {
        let record = self
            .shared
            .registry
            .get(device_name)
            .ok_or_else(|| Error::UnknownDevice(device_name.to_string()))?;
        if !record.channel_indices.contains(&channel_index) {
            return Err(Error::UnknownChannel(channel_index));
        }
        let base = record.multicast_base.ok_or_else(|| {
            Error::InvalidState(format!("device '{}' has no multicast base", device_name))
        })?;
        base.group(channel_index)
            .ok_or_else(|| Error::UnknownChannel(channel_index))
    }

    /// Send a `ParameterCommand` with the nested `{param: {value}}` form.
    ///
    /// `changes` maps parameter names to their proposed raw values.
    pub fn send_command(
        &self,
        device_name: &str,
        channel_index: i32,
        changes: &Map<String, Value>,
    ) -> Result<()> {
        let ip = self.device_address(device_name)?;
        let params: Map<String, Value> = changes
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::json!({ "value": value })))
            .collect();

        let mut batch = Batch::to_device(self.shared.device_name.clone(), device_name);
        batch.push(Message::ParameterCommand { channel_index, params });
        let payload = codec::encode_batch(&batch)?;
        self.shared.socket.send_unicast(&payload, ip, self.shared.socket.port());
        Ok(())
    }

    /// Send a `ParameterRequest` for one scope.
    pub fn request_parameters(&self, device_name: &str, channel_index: i32) -> Result<()> {
        let ip = self.device_address(device_name)?;
        let mut batch = Batch::to_device(self.shared.device_name.clone(), device_name);
        batch.push(Message::ParameterRequest { channel_index });
        let payload = codec::encode_batch(&batch)?;
        self.shared.socket.send_unicast(&payload, ip, self.shared.socket.port());
        Ok(())
    }

    fn device_address(&self, device_name: &str) -> Result<Ipv4Addr> {
        let record = self
            .shared
            .registry
            .get(device_name)
            .ok_or_else(|| Error::UnknownDevice(device_name.to_string()))?;
        record.ip_address.ok_or_else(|| {
            Error::InvalidState(format!("device '{}' has no known address", device_name))
        })
    }

    /// Orderly shutdown.
    pub fn stop(mut self) {
        self.stop_impl();
    }

    fn stop_impl(&mut self) {
        if !self.shared.running.swap(false, Ordering::Relaxed) {
            return;
        }
        log::info!("[master] stopping");
        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }
        if let Some(browser) = self.browser.take() {
            browser.shutdown();
        }
        if let Some(handle) = self.driver_thread.take() {
            let _ = handle.join();
        }
        if let Some(announcer) = self.announcer.take() {
            announcer.shutdown();
        }
        if let Err(e) = self.daemon.shutdown() {
            log::debug!("[master] mDNS daemon shutdown: {}", e);
        }
        self.shared.socket.leave_all();
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.stop_impl();
    }
}

/// Discovery driver: registry transitions plus the full parameter request
/// on every transition to present of a parameter-serving peer.
///
/// Each poll round also runs the registry's own TTL inference, so a peer
/// that stops announcing goes absent within its advertised TTL plus
/// [`PRESENCE_GRACE`] even if the daemon never delivers a removal event.
fn discovery_driver(shared: &MasterShared, events: &Receiver<DiscoveryEvent>) {
    log::debug!("[master] discovery driver started");
    while shared.running.load(Ordering::Relaxed) {
        for device_name in shared.registry.mark_stale(std::time::SystemTime::now(), PRESENCE_GRACE) {
            let _ = shared.events.send(MasterEvent::DeviceLost { device_name });
        }

        let event = match events.recv_timeout(RECV_POLL_TIMEOUT) {
            Ok(event) => event,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                thread::sleep(STOP_POLL_INTERVAL);
                continue;
            }
        };
        match event {
            DiscoveryEvent::PeerPresent { identity, ip } => {
                let newly_present =
                    shared.registry.upsert_present(&identity, ip, PRESENCE_TTL_SECS);
                if !newly_present {
                    continue;
                }
                let _ = shared.events.send(MasterEvent::DeviceDiscovered {
                    device_name: identity.device_name.clone(),
                });
                if identity.role.serves_parameters() {
                    match ip {
                        Some(ip) => shared.send_full_request(&identity.device_name, ip),
                        None => log::warn!(
                            "[master] '{}' present without an IPv4 address, cannot request parameters",
                            identity.device_name
                        ),
                    }
                }
            }
            DiscoveryEvent::PeerAbsent { device_name } => {
                if shared.registry.mark_absent(&device_name) {
                    let _ = shared.events.send(MasterEvent::DeviceLost { device_name });
                }
            }
        }
    }
    log::debug!("[master] discovery driver stopped");
}

/// Response listener: unicast replies and subscribed telemetry share the
/// control socket.
fn listener_loop(shared: &MasterShared) {
    log::debug!("[master] listener started");
    while shared.running.load(Ordering::Relaxed) {
        let datagram = match shared.socket.recv(RECV_POLL_TIMEOUT) {
            Ok(Some(datagram)) => datagram,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("[master] receive error: {}", e);
                thread::sleep(STOP_POLL_INTERVAL);
                continue;
            }
        };
        let Some(source_ip) = datagram.source_ipv4() else {
            continue;
        };
        if datagram.oversize {
            log::warn!("[master] oversize datagram from {}, dropped", datagram.source);
            continue;
        }
        let batch = match codec::decode_batch(&datagram.payload) {
            Ok(batch) => batch,
            Err(fault) => {
                // Malformed inbound traffic never mutates the registry.
                log::warn!("[master] malformed batch from {}: {}", datagram.source, fault.detail);
                continue;
            }
        };
        for notice in ingest::ingest_batch(&shared.registry, &batch, source_ip) {
            let event = match notice {
                MasterNotice::ErrorReported { device_name, error_value, error_string } => {
                    MasterEvent::ErrorReported { device_name, error_value, error_string }
                }
                MasterNotice::DeviceUpdated { device_name, channel_index } => {
                    MasterEvent::DeviceUpdated { device_name, channel_index }
                }
            };
            let _ = shared.events.send(event);
        }
    }
    log::debug!("[master] listener stopped");
}
