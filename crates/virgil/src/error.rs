// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type for Virgil operations.

/// Errors returned by Virgil operations.
///
/// Covers configuration, transport, discovery, and protocol failures.
/// Peer-visible protocol errors travel as `ErrorResponse` messages and use
/// [`crate::protocol::ErrorValue`] instead; this enum is for the local API
/// surface only.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    /// Invalid configuration (bad channel index, empty device name, ...).
    InvalidConfig(String),
    /// Operation not valid in the current state (e.g. no known address for
    /// a device, parameter not continuous).
    InvalidState(String),

    // ========================================================================
    // Transport
    // ========================================================================
    /// Failed to bind the control socket.
    BindFailed(String),
    /// Failed to join or leave a multicast group.
    MulticastJoinFailed(String),
    /// Send operation failed.
    SendFailed(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),

    // ========================================================================
    // Discovery
    // ========================================================================
    /// mDNS daemon or registration failure.
    Mdns(String),

    // ========================================================================
    // Protocol / registry
    // ========================================================================
    /// Outgoing batch could not be encoded (oversize single message, ...).
    Encode(String),
    /// Requested device is not in the registry.
    UnknownDevice(String),
    /// Requested channel does not exist on the device.
    UnknownChannel(i32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoinFailed(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::Mdns(msg) => write!(f, "mDNS error: {}", msg),
            Error::Encode(msg) => write!(f, "Encode failed: {}", msg),
            Error::UnknownDevice(name) => write!(f, "Unknown device: {}", name),
            Error::UnknownChannel(idx) => write!(f, "Unknown channel index: {}", idx),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
