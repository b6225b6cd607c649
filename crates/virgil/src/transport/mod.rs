// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram transport for the Virgil control plane.
//!
//! One UDP socket per participant, bound to the control port and shared by
//! unicast request/response traffic and multicast telemetry. Send
//! operations are fire-and-forget: per-datagram errors are logged and
//! dropped, never retried. Multicast group membership is tracked in an
//! idempotent, mutex-guarded set.

use crate::config::{reuseport_enabled, MAX_DATAGRAM_BYTES, MULTICAST_SEND_TTL, VIRGIL_PORT};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Interface discovery helpers.
pub mod iface;

/// A received control-plane datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
    /// True when the datagram exceeded [`MAX_DATAGRAM_BYTES`] and was
    /// truncated on receive; callers report it as malformed.
    pub oversize: bool,
}

impl Datagram {
    /// IPv4 source address, if the sender used IPv4 (Virgil is IPv4-only).
    #[must_use]
    pub fn source_ipv4(&self) -> Option<Ipv4Addr> {
        match self.source.ip() {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        }
    }
}

/// The per-process Virgil control socket.
///
/// Bound to `0.0.0.0:<control_port>` with `SO_REUSEADDR` (and
/// `SO_REUSEPORT` when `VIRGIL_REUSEPORT=1`), multicast loop enabled.
pub struct ControlSocket {
    socket: UdpSocket,
    port: u16,
    /// Interface used for multicast membership.
    iface: Ipv4Addr,
    /// Currently-joined multicast groups. Single writer-locked set so
    /// join/leave stay idempotent without redundant system calls.
    joined: Mutex<HashSet<Ipv4Addr>>,
}

impl ControlSocket {
    /// Bind the control socket on the standard Virgil port.
    pub fn bind() -> Result<Self> {
        Self::bind_to(VIRGIL_PORT)
    }

    /// Bind the control socket on a specific port.
    ///
    /// Non-default ports are for multi-instance testing on one host; the
    /// protocol itself runs on [`VIRGIL_PORT`].
    pub fn bind_to(port: u16) -> Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| Error::BindFailed(format!("socket creation failed: {}", e)))?;
        socket2
            .set_reuse_address(true)
            .map_err(|e| Error::BindFailed(format!("SO_REUSEADDR failed: {}", e)))?;
        #[cfg(unix)]
        if reuseport_enabled() {
            set_reuseport(&socket2)
                .map_err(|e| Error::BindFailed(format!("SO_REUSEPORT failed: {}", e)))?;
            log::info!("[UDP] SO_REUSEPORT enabled via VIRGIL_REUSEPORT=1 (multi-process mode)");
        }

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket2
            .bind(&bind_addr.into())
            .map_err(|e| Error::BindFailed(format!("bind {} failed: {}", bind_addr, e)))?;

        let socket: UdpSocket = socket2.into();
        socket.set_multicast_loop_v4(true)?;
        if let Err(e) = socket.set_multicast_ttl_v4(MULTICAST_SEND_TTL) {
            log::debug!("[UDP] set_multicast_ttl_v4({}) failed: {}", MULTICAST_SEND_TTL, e);
        }

        let iface = iface::multicast_interface();
        log::debug!("[UDP] control socket bound port={} iface={}", port, iface);

        Ok(Self {
            socket,
            port,
            iface,
            joined: Mutex::new(HashSet::new()),
        })
    }

    /// Port this socket is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a unicast datagram. Fire-and-forget: failures are logged and
    /// dropped, never retried.
    pub fn send_unicast(&self, payload: &[u8], ip: Ipv4Addr, port: u16) {
        let dest = SocketAddr::from((ip, port));
        match self.socket.send_to(payload, dest) {
            Ok(sent) => {
                log::debug!("[UDP] sent unicast {} bytes -> {}", sent, dest);
            }
            Err(e) => {
                log::warn!("[UDP] unicast send to {} failed: {}", dest, e);
            }
        }
    }

    /// Send a multicast datagram to `group:port`. Fire-and-forget.
    pub fn send_multicast(&self, payload: &[u8], group: Ipv4Addr, port: u16) {
        let dest = SocketAddr::from((group, port));
        match self.socket.send_to(payload, dest) {
            Ok(sent) => {
                log::debug!("[UDP] sent multicast {} bytes -> {}", sent, dest);
            }
            Err(e) => {
                log::warn!("[UDP] multicast send to {} failed: {}", dest, e);
            }
        }
    }

    /// Join a multicast group. Idempotent: returns `Ok(true)` when
    /// membership actually changed, `Ok(false)` when already joined.
    pub fn join_group(&self, group: Ipv4Addr) -> Result<bool> {
        let mut joined = self.joined.lock();
        if joined.contains(&group) {
            log::debug!("[UDP] join_group({}) - already joined", group);
            return Ok(false);
        }

        match self.socket.join_multicast_v4(&group, &self.iface) {
            Ok(()) => {}
            // EADDRINUSE (98) Linux: already joined on same physical NIC
            Err(e) if e.raw_os_error() == Some(98) => {
                log::debug!("[UDP] join_group({}) on {} - kernel reports joined", group, self.iface);
            }
            Err(e) => {
                return Err(Error::MulticastJoinFailed(format!(
                    "join {} on {}: {}",
                    group, self.iface, e
                )));
            }
        }

        joined.insert(group);
        log::debug!("[UDP] joined multicast group {} on iface {}", group, self.iface);
        Ok(true)
    }

    /// Leave a multicast group. Idempotent: returns `Ok(true)` when
    /// membership actually changed, `Ok(false)` for an un-joined group.
    pub fn leave_group(&self, group: Ipv4Addr) -> Result<bool> {
        let mut joined = self.joined.lock();
        if !joined.remove(&group) {
            log::debug!("[UDP] leave_group({}) - not joined", group);
            return Ok(false);
        }

        if let Err(e) = self.socket.leave_multicast_v4(&group, &self.iface) {
            // Membership bookkeeping already updated; the kernel state is
            // torn down with the socket either way.
            log::warn!("[UDP] leave {} on {} failed: {}", group, self.iface, e);
        }
        log::debug!("[UDP] left multicast group {}", group);
        Ok(true)
    }

    /// Snapshot of the currently-joined groups.
    #[must_use]
    pub fn joined_groups(&self) -> Vec<Ipv4Addr> {
        let mut groups: Vec<Ipv4Addr> = self.joined.lock().iter().copied().collect();
        groups.sort();
        groups
    }

    /// Leave every joined group (orderly shutdown).
    pub fn leave_all(&self) {
        for group in self.joined_groups() {
            let _ = self.leave_group(group);
        }
    }

    /// Receive one datagram with a bounded timeout.
    ///
    /// Returns `Ok(None)` on timeout so control loops can poll their stop
    /// flag. Oversize datagrams come back truncated with
    /// [`Datagram::oversize`] set.
    pub fn recv(&self, timeout: Duration) -> Result<Option<Datagram>> {
        self.socket.set_read_timeout(Some(timeout))?;

        let mut buf = [0u8; MAX_DATAGRAM_BYTES + 1];
        match self.socket.recv_from(&mut buf) {
            Ok((len, source)) => {
                let oversize = len > MAX_DATAGRAM_BYTES;
                if oversize {
                    log::warn!(
                        "[UDP] datagram from {} exceeds {} bytes, truncated",
                        source,
                        MAX_DATAGRAM_BYTES
                    );
                }
                let payload = buf[..len.min(MAX_DATAGRAM_BYTES)].to_vec();
                Ok(Some(Datagram { payload, source, oversize }))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(Error::IoError(e)),
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        // Kernel drops memberships with the socket; keep the set honest for
        // anything still holding a snapshot.
        self.joined.lock().clear();
    }
}

/// Set `SO_REUSEPORT` on a socket for multi-process port sharing.
///
/// Required for several Virgil participants on one machine, since every
/// role binds the same control port. Unix only.
#[cfg(unix)]
fn set_reuseport(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: setsockopt FFI with valid fd, standard socket option, and correctly sized optval pointer
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn test_socket(port: u16) -> ControlSocket {
        ControlSocket::bind_to(port).expect("control socket should bind")
    }

    #[test]
    fn test_bind_and_port() {
        let sock = test_socket(18890);
        assert_eq!(sock.port(), 18890);
    }

    #[test]
    fn test_join_leave_idempotent() {
        let sock = test_socket(18891);
        let group = Ipv4Addr::new(239, 77, 1, 0);

        assert!(sock.join_group(group).expect("join should succeed"));
        assert!(!sock.join_group(group).expect("second join is a no-op"));
        assert_eq!(sock.joined_groups(), vec![group]);

        assert!(sock.leave_group(group).expect("leave should succeed"));
        assert!(!sock.leave_group(group).expect("second leave is a no-op"));
        assert!(sock.joined_groups().is_empty());
    }

    #[test]
    fn test_leave_all() {
        let sock = test_socket(18892);
        sock.join_group(Ipv4Addr::new(239, 77, 2, 0)).expect("join");
        sock.join_group(Ipv4Addr::new(239, 77, 2, 1)).expect("join");
        assert_eq!(sock.joined_groups().len(), 2);

        sock.leave_all();
        assert!(sock.joined_groups().is_empty());
    }

    #[test]
    fn test_unicast_loopback_round_trip() {
        let rx = test_socket(18893);
        let tx = test_socket(18894);

        tx.send_unicast(b"hello virgil", Ipv4Addr::LOCALHOST, 18893);

        let dgram = rx
            .recv(Duration::from_secs(2))
            .expect("recv should not error")
            .expect("datagram should arrive on loopback");
        assert_eq!(dgram.payload, b"hello virgil");
        assert!(!dgram.oversize);
        assert_eq!(dgram.source_ipv4(), Some(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_recv_timeout_yields_none() {
        let sock = test_socket(18895);
        let got = sock.recv(Duration::from_millis(50)).expect("recv should not error");
        assert!(got.is_none());
    }

    #[test]
    fn test_oversize_datagram_flagged() {
        let rx = test_socket(18896);
        let tx = test_socket(18897);

        let big = vec![b'x'; MAX_DATAGRAM_BYTES + 100];
        tx.send_unicast(&big, Ipv4Addr::LOCALHOST, 18896);

        let dgram = rx
            .recv(Duration::from_secs(2))
            .expect("recv should not error")
            .expect("datagram should arrive on loopback");
        assert!(dgram.oversize);
        assert_eq!(dgram.payload.len(), MAX_DATAGRAM_BYTES);
    }

    #[test]
    fn test_multicast_send_does_not_block() {
        let sock = test_socket(18898);
        // Send succeeds (or is logged-and-dropped) without blocking.
        sock.send_multicast(b"telemetry", Ipv4Addr::new(239, 77, 3, 0), 18898);
    }
}
