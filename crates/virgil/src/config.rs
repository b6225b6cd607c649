// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Virgil protocol constants - single source of truth.
//!
//! Centralizes ports, sizes, timers, and reserved indices.
//! **NEVER hardcode elsewhere!**

use std::time::Duration;

// =======================================================================
// Wire protocol
// =======================================================================

/// Virgil control port (UDP). Shared by unicast requests/responses and
/// per-channel multicast telemetry.
pub const VIRGIL_PORT: u16 = 7889;

/// Maximum datagram payload in bytes. One JSON message batch per datagram;
/// anything larger is reported as malformed on receive.
pub const MAX_DATAGRAM_BYTES: usize = 4096;

/// Protocol version advertised in device-level responses.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Device-level scope (reserved channel index).
pub const DEVICE_CHANNEL_INDEX: i32 = -1;

/// "All channels" scope (reserved channel index, request-only).
pub const ALL_CHANNELS_INDEX: i32 = -2;

// =======================================================================
// Discovery
// =======================================================================

/// mDNS service type for Virgil participants.
pub const SERVICE_TYPE: &str = "_virgil._udp.local.";

/// TTL advertised with discovery records, in seconds. Presence inference
/// treats a peer as absent once `now - lastSeen` exceeds this.
pub const PRESENCE_TTL_SECS: u64 = 60;

/// Slack added on top of the advertised TTL before the registry's own
/// inference marks a silent peer absent.
pub const PRESENCE_GRACE: Duration = Duration::from_secs(5);

/// How long a starting slave scans peer announcements before picking its
/// multicast base.
pub const BASE_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Fallback multicast base when the scan finds every candidate in use.
pub const FALLBACK_MULTICAST_BASE: [u8; 3] = [244, 1, 1];

// =======================================================================
// Timers
// =======================================================================

/// Period of the slave's continuous-telemetry timer.
pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(500);

/// Bounded receive timeout on control-path loops; keeps shutdown prompt.
pub const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Sleep granularity while waiting with a stop flag (teacher-style chunked
/// sleep for responsive shutdown).
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =======================================================================
// Transport
// =======================================================================

/// Default IP TTL for outgoing multicast telemetry.
pub const MULTICAST_SEND_TTL: u32 = 3;

/// Tolerance used when checking numeric values against a precision grid.
pub const PRECISION_EPSILON: f64 = 1e-9;

/// Whether `SO_REUSEPORT` is requested via `VIRGIL_REUSEPORT=1`.
///
/// Enables multiple Virgil processes on one machine to share the control
/// port (multi-process testing). Off by default.
pub fn reuseport_enabled() -> bool {
    std::env::var("VIRGIL_REUSEPORT").map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_indices_distinct() {
        assert_ne!(DEVICE_CHANNEL_INDEX, ALL_CHANNELS_INDEX);
        assert!(DEVICE_CHANNEL_INDEX < 0);
        assert!(ALL_CHANNELS_INDEX < 0);
    }

    #[test]
    fn test_timer_relationships() {
        // Stop polling must be at least as fine-grained as every timer it chunks.
        assert!(STOP_POLL_INTERVAL <= RECV_POLL_TIMEOUT);
        assert!(STOP_POLL_INTERVAL <= TELEMETRY_PERIOD);
    }
}
