// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared builders and invariant checks for the unit tests.

use super::SocketUnit;
use crate::manager::ServiceRef;
use crate::port::PortKind;
use crate::test_support::FakeManager;
use sockd_core::{ExecCommand, ManualClock, SocketAddress, SocketConfig, UnitName};
use tempfile::TempDir;

pub(super) type TestUnit = SocketUnit<FakeManager, ManualClock>;

pub(super) fn fifo_unit(dir: &TempDir, config: SocketConfig) -> TestUnit {
    let kind = PortKind::Fifo { path: dir.path().join("x.pipe") };
    SocketUnit::new(
        UnitName::new("x.socket"),
        config,
        vec![kind],
        FakeManager::new(),
        ManualClock::new(),
    )
}

pub(super) fn tcp_unit(config: SocketConfig) -> TestUnit {
    let kind = PortKind::Socket {
        address: SocketAddress::stream("127.0.0.1:0".parse().unwrap()),
    };
    SocketUnit::new(
        UnitName::new("x.socket"),
        config,
        vec![kind],
        FakeManager::new(),
        ManualClock::new(),
    )
}

pub(super) fn unix_unit(dir: &TempDir, config: SocketConfig) -> TestUnit {
    let kind = PortKind::Socket {
        address: SocketAddress::unix_stream(dir.path().join("x.sock")),
    };
    SocketUnit::new(
        UnitName::new("x.socket"),
        config,
        vec![kind],
        FakeManager::new(),
        ManualClock::new(),
    )
}

pub(super) fn paired_service() -> ServiceRef {
    ServiceRef::new(UnitName::new("x.service"))
}

pub(super) fn cmd(path: &str) -> ExecCommand {
    ExecCommand::new(path, vec![path.to_string()])
}

/// The universally-quantified invariants: fds open per state, watches only
/// in `Listening`, the timer armed exactly in transient states, and the
/// notification trail ending at the current projection.
pub(super) fn assert_invariants(unit: &TestUnit) {
    let state = unit.state();
    let open = unit.collect_fds().len();

    // a state outside the open set never holds descriptors; inside the set
    // the count depends on how far the start got, so tests assert it directly
    if !state.keeps_fds_open() {
        assert_eq!(open, 0, "state {state} should hold no open endpoints");
    }

    let watched = unit.manager().fd_watches.len();
    if state == sockd_core::SocketState::Listening {
        assert_eq!(watched, open, "every open endpoint watched in Listening");
    } else {
        assert_eq!(watched, 0, "no endpoint watches outside Listening");
    }

    let armed = unit.manager().armed_timers();
    if state.is_transient() {
        assert_eq!(armed, 1, "state {state} should have the timeout armed");
        assert!(unit.get_timeout().is_some());
    } else {
        assert_eq!(armed, 0, "state {state} should have no timer");
        assert!(unit.get_timeout().is_none());
    }

    if let Some((_, new)) = unit.manager().last_notification() {
        assert_eq!(new, state.active_state(), "last notification matches projection");
    }
}
