// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Virgil - LAN control plane for multi-channel audio endpoints
//!
//! Virgil augments a device-name-addressed audio transport fabric with
//! remote parameter inspection, remote parameter control, and continuous
//! telemetry for preamps, wireless receivers, and stage boxes. Two roles
//! cooperate on one shared UDP control port (7889): a **slave** exposes a
//! typed, partially-locked parameter tree; a **master** discovers slaves,
//! subscribes to per-channel telemetry multicast groups, and issues
//! commands.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use virgil::model::profiles::wireless_receiver_channel;
//! use virgil::{DeviceType, Master, MasterConfig, Slave, SlaveConfig};
//!
//! fn main() -> virgil::Result<()> {
//!     // A four-channel wireless receiver.
//!     let mut config = SlaveConfig::new("StageLeft", "RX-4", DeviceType::WirelessReceiver);
//!     for index in 0..4 {
//!         config = config.with_channel(index, wireless_receiver_channel());
//!     }
//!     let _slave = Slave::start(config)?;
//!
//!     // A console discovering and commanding it.
//!     let master = Master::start(MasterConfig::new("Desk"))?;
//!     for record in master.list_devices() {
//!         println!("{} present={}", record.device_name, record.is_present);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     Role Orchestrators                       |
//! |        Slave (request loop + telemetry timer)                |
//! |        Master (registry + subscriptions + commands)          |
//! +--------------------------------------------------------------+
//! |                      Protocol Engine                         |
//! |   JSON batch codec | slave dispatch | master ingest          |
//! +--------------------------------------------------------------+
//! |   Parameter Model          |        Discovery                |
//! |   typed tree + validation  |  mDNS announce/browse + bases   |
//! +--------------------------------------------------------------+
//! |                    Datagram Transport                        |
//! |   control socket 7889/UDP | multicast group set              |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Slave`] | Runs a device's parameter tree, request handler, telemetry |
//! | [`Master`] | Discovery-driven registry, subscriptions, command surface |
//! | [`model::DeviceState`] | Typed parameter tree with range/enum/lock validation |
//! | [`protocol::Batch`] | One wire message batch (JSON, one per datagram) |
//! | [`identity::MulticastBase`] | Per-slave three-octet telemetry group prefix |

/// Protocol constants (ports, sizes, timers, reserved indices).
pub mod config;
/// mDNS-style presence: announcer, browser, multicast-base selection.
pub mod discovery;
/// Crate-level error type.
pub mod error;
/// Participant identity: roles, device types, multicast bases.
pub mod identity;
/// Master orchestrator and device registry.
pub mod master;
/// Typed parameter tree and validation.
pub mod model;
/// Wire protocol: taxonomy, codec, dispatch, ingest.
pub mod protocol;
/// Slave orchestrator.
pub mod slave;
/// Datagram transport: control socket and multicast membership.
pub mod transport;

pub use error::{Error, Result};
pub use identity::{DeviceType, MulticastBase, Role, ServiceIdentity};
pub use master::{DeviceRecord, Master, MasterConfig, MasterEvent};
pub use model::{Channel, DeviceState, ParamValue, Parameter};
pub use protocol::{Batch, ErrorValue, Message};
pub use slave::{Slave, SlaveConfig};
pub use transport::ControlSocket;
