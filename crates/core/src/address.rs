// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listen addresses: the tagged address forms a socket endpoint can bind,
//! their canonical textual rendering (shared by the property dump and the
//! persisted state format), and the accept-capability rules.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Socket type, with the numeric values used on the wire by the persisted
/// state format (`SOCK_STREAM`/`SOCK_DGRAM`/`SOCK_RAW`/`SOCK_SEQPACKET`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocketType {
    Stream,
    Datagram,
    Raw,
    SequentialPacket,
}

impl SocketType {
    pub fn number(self) -> i32 {
        match self {
            SocketType::Stream => 1,
            SocketType::Datagram => 2,
            SocketType::Raw => 3,
            SocketType::SequentialPacket => 5,
        }
    }

    pub fn from_number(n: i32) -> Option<Self> {
        match n {
            1 => Some(SocketType::Stream),
            2 => Some(SocketType::Datagram),
            3 => Some(SocketType::Raw),
            5 => Some(SocketType::SequentialPacket),
            _ => None,
        }
    }

    /// Connection-oriented types get a `listen(2)` and can `accept(2)`.
    pub fn is_connection_oriented(self) -> bool {
        matches!(self, SocketType::Stream | SocketType::SequentialPacket)
    }
}

/// Netlink protocol family, by kernel protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetlinkFamily {
    Route,
    SelinuxEvents,
    Iscsi,
    Audit,
    FibLookup,
    Netfilter,
    KobjectUevent,
    Generic,
    Scsitransport,
    Rdma,
}

crate::string_enum! {
    NetlinkFamily {
        Route => "route",
        SelinuxEvents => "selinux",
        Iscsi => "iscsi",
        Audit => "audit",
        FibLookup => "fib-lookup",
        Netfilter => "netfilter",
        KobjectUevent => "kobject-uevent",
        Generic => "generic",
        Scsitransport => "scsitransport",
        Rdma => "rdma",
    }
}

impl NetlinkFamily {
    pub fn protocol(self) -> i32 {
        match self {
            NetlinkFamily::Route => 0,
            NetlinkFamily::SelinuxEvents => 7,
            NetlinkFamily::Iscsi => 8,
            NetlinkFamily::Audit => 9,
            NetlinkFamily::FibLookup => 10,
            NetlinkFamily::Netfilter => 12,
            NetlinkFamily::KobjectUevent => 15,
            NetlinkFamily::Generic => 16,
            NetlinkFamily::Scsitransport => 18,
            NetlinkFamily::Rdma => 20,
        }
    }

    pub fn from_protocol(n: i32) -> Option<Self> {
        match n {
            0 => Some(NetlinkFamily::Route),
            7 => Some(NetlinkFamily::SelinuxEvents),
            8 => Some(NetlinkFamily::Iscsi),
            9 => Some(NetlinkFamily::Audit),
            10 => Some(NetlinkFamily::FibLookup),
            12 => Some(NetlinkFamily::Netfilter),
            15 => Some(NetlinkFamily::KobjectUevent),
            16 => Some(NetlinkFamily::Generic),
            18 => Some(NetlinkFamily::Scsitransport),
            20 => Some(NetlinkFamily::Rdma),
            _ => None,
        }
    }
}

/// A bindable listen address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketAddress {
    Inet { addr: SocketAddr, ty: SocketType },
    /// A path beginning with `@` denotes an abstract-namespace socket.
    Unix { path: PathBuf, ty: SocketType },
    Netlink { family: NetlinkFamily, groups: u32 },
}

impl SocketAddress {
    pub fn stream(addr: SocketAddr) -> Self {
        SocketAddress::Inet { addr, ty: SocketType::Stream }
    }

    pub fn datagram(addr: SocketAddr) -> Self {
        SocketAddress::Inet { addr, ty: SocketType::Datagram }
    }

    pub fn unix_stream(path: impl Into<PathBuf>) -> Self {
        SocketAddress::Unix { path: path.into(), ty: SocketType::Stream }
    }

    pub fn ty(&self) -> SocketType {
        match self {
            SocketAddress::Inet { ty, .. } | SocketAddress::Unix { ty, .. } => *ty,
            SocketAddress::Netlink { .. } => SocketType::Raw,
        }
    }

    /// Whether `accept(2)` applies to a socket bound to this address.
    pub fn can_accept(&self) -> bool {
        match self {
            SocketAddress::Inet { ty, .. } | SocketAddress::Unix { ty, .. } => {
                ty.is_connection_oriented()
            }
            SocketAddress::Netlink { .. } => false,
        }
    }

    /// The filesystem path this address occupies, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SocketAddress::Unix { path, .. } if !is_abstract(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, SocketAddress::Unix { path, .. } if is_abstract(path))
    }

    /// Canonical textual form, used by the property dump and the persisted
    /// state format: `1.2.3.4:80`, `[::1]:80`, `/run/x.sock`, `@abstract`,
    /// `route 1`.
    pub fn print(&self) -> String {
        match self {
            SocketAddress::Inet { addr, .. } => addr.to_string(),
            SocketAddress::Unix { path, .. } => path.display().to_string(),
            SocketAddress::Netlink { family, groups } => format!("{family} {groups}"),
        }
    }

    /// Equality against a serialized `print()` form plus numeric socket type.
    pub fn is(&self, text: &str, ty: i32) -> bool {
        !matches!(self, SocketAddress::Netlink { .. })
            && self.ty().number() == ty
            && self.print() == text
    }

    /// Equality against a serialized netlink `print()` form. A missing group
    /// count means zero.
    pub fn is_netlink(&self, text: &str) -> bool {
        let SocketAddress::Netlink { family, groups } = self else {
            return false;
        };
        let mut parts = text.split_whitespace();
        let Some(name) = parts.next() else {
            return false;
        };
        let parsed_groups = parts.next().and_then(|g| g.parse::<u32>().ok()).unwrap_or(0);
        NetlinkFamily::from_name(name) == Some(*family) && parsed_groups == *groups
    }

    /// The `Listen*` keyword this address answers to in configuration and in
    /// the property dump.
    pub fn listen_keyword(&self) -> &'static str {
        match self {
            SocketAddress::Netlink { .. } => "ListenNetlink",
            _ => match self.ty() {
                SocketType::Stream => "ListenStream",
                SocketType::Datagram => "ListenDatagram",
                SocketType::SequentialPacket => "ListenSequentialPacket",
                SocketType::Raw => "ListenStream",
            },
        }
    }
}

impl std::fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.print())
    }
}

fn is_abstract(path: &Path) -> bool {
    path.to_str().is_some_and(|p| p.starts_with('@'))
}

#[cfg(test)]
#[path = "address_tests.rs"]
mod tests;
