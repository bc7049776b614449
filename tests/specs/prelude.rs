// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared builders for the socket unit specs.

use sockd_core::{ManualClock, SocketAddress, SocketConfig, UnitName};
use sockd_unit::test_support::FakeManager;
use sockd_unit::{PortKind, SocketUnit};
use std::net::SocketAddr;
use std::path::Path;

pub type Unit = SocketUnit<FakeManager, ManualClock>;

pub fn socket_unit(config: SocketConfig, ports: Vec<PortKind>) -> Unit {
    init_tracing();
    SocketUnit::new(
        UnitName::new("x.socket"),
        config,
        ports,
        FakeManager::new(),
        ManualClock::new(),
    )
}

/// Route unit logs through `RUST_LOG` for spec debugging.
fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn fifo_kind(path: &Path) -> PortKind {
    PortKind::Fifo { path: path.to_path_buf() }
}

pub fn stream_kind(addr: &str) -> PortKind {
    PortKind::Socket { address: SocketAddress::stream(addr.parse().unwrap()) }
}

pub fn unix_stream_kind(path: &Path) -> PortKind {
    PortKind::Socket { address: SocketAddress::unix_stream(path) }
}

/// The concrete address a started unit's first endpoint is bound to.
pub fn bound_addr(unit: &Unit) -> SocketAddr {
    let fd = unit.collect_fds()[0];
    let addr = nix::sys::socket::getsockname::<nix::sys::socket::SockaddrStorage>(fd)
        .expect("getsockname");
    let v4 = addr.as_sockaddr_in().expect("ipv4 listener");
    SocketAddr::from((v4.ip(), v4.port()))
}
