// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection instance naming.
//!
//! Accepted connections are identified by the monotonically increasing accept
//! counter plus both connection endpoints, so instance names stay unique and
//! self-describing in `systemctl`-style listings.

use std::net::SocketAddr;

/// Endpoint information of one accepted connection, as resolved from the
/// accepted descriptor by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPeer {
    Inet { local: SocketAddr, remote: SocketAddr },
    /// AF_UNIX with peer credentials.
    Unix { pid: u32, uid: u32 },
}

/// Format the instance name for connection number `nr`.
///
/// - IPv4: `{nr}-{laddr}:{lport}-{raddr}:{rport}`
/// - IPv6 with both endpoints IPv4-mapped: the IPv4 form above
/// - IPv6 otherwise: RFC 5952 textual addresses in the same shape
/// - AF_UNIX: `{nr}-{peer pid}-{peer uid}`
pub fn instance_name(nr: u32, peer: &ConnectionPeer) -> String {
    match peer {
        ConnectionPeer::Inet { local, remote } => {
            format!("{nr}-{}-{}", endpoint(local, remote.ip()), endpoint(remote, local.ip()))
        }
        ConnectionPeer::Unix { pid, uid } => format!("{nr}-{pid}-{uid}"),
    }
}

/// One side of the connection. IPv6 addresses collapse to dotted-quad form
/// only when *both* sides are IPv4-mapped, mirroring the kernel's dual-stack
/// representation.
fn endpoint(side: &SocketAddr, other_ip: std::net::IpAddr) -> String {
    match side {
        SocketAddr::V4(v4) => format!("{}:{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => {
            let mapped = v6.ip().to_ipv4_mapped();
            let other_mapped = match other_ip {
                std::net::IpAddr::V4(_) => true,
                std::net::IpAddr::V6(o) => o.to_ipv4_mapped().is_some(),
            };
            match mapped {
                Some(v4) if other_mapped => format!("{}:{}", v4, v6.port()),
                _ => format!("{}:{}", v6.ip(), v6.port()),
            }
        }
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
