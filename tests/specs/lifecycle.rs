// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle specs: the timeout escalation ladder and all-or-nothing opening.

use super::prelude::*;
use serial_test::serial;
use sockd_core::{CommandId, CommandSet, ExecCommand, SocketConfig, SocketResult, SocketState};
use sockd_unit::KillOutcome;
use std::time::Duration;

#[test]
#[serial]
fn start_timeout_walks_the_final_signal_ladder() {
    let dir = tempfile::tempdir().unwrap();
    let commands = CommandSet::default().with(
        CommandId::StartPre,
        ExecCommand::new("/bin/sleep", vec!["sleep".into(), "10".into()]),
    );
    let config = SocketConfig::default()
        .commands(commands)
        .timeout(Duration::from_secs(1));
    let mut unit = socket_unit(config, vec![fifo_kind(&dir.path().join("x.pipe"))]);
    unit.manager_mut().kill_outcome = KillOutcome::ProcessesSignalled;

    assert_eq!(unit.state(), SocketState::Dead);
    unit.start().unwrap();
    assert_eq!(unit.state(), SocketState::StartPre);

    unit.timer_event();
    assert_eq!(unit.state(), SocketState::FinalSigterm);
    unit.timer_event();
    assert_eq!(unit.state(), SocketState::FinalSigkill);
    unit.timer_event();

    assert_eq!(unit.state(), SocketState::Failed);
    assert_eq!(unit.result(), SocketResult::FailureTimeout);
    assert!(unit.collect_fds().is_empty());
}

#[test]
#[serial]
fn open_failure_rolls_back_the_whole_batch() {
    // a foreign listener occupies the second address
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = blocker.local_addr().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("x.sock");
    let mut unit = socket_unit(
        SocketConfig::default(),
        vec![unix_stream_kind(&sock), stream_kind(&taken.to_string())],
    );
    unit.load().unwrap();

    unit.start().unwrap();

    assert_eq!(unit.result(), SocketResult::FailureResources);
    assert_eq!(unit.state(), SocketState::Failed);
    // the first endpoint was closed again during rollback
    assert!(unit.collect_fds().is_empty());
    // no watches or timers leak either
    assert!(unit.manager().fd_watches.is_empty());
    assert_eq!(unit.manager().armed_timers(), 0);
}

#[test]
#[serial]
fn a_full_stop_cycle_reaches_dead_with_endpoints_closed() {
    let dir = tempfile::tempdir().unwrap();
    let pipe = dir.path().join("x.pipe");
    let mut unit = socket_unit(SocketConfig::default(), vec![fifo_kind(&pipe)]);
    unit.load().unwrap();
    unit.start().unwrap();
    assert_eq!(unit.state(), SocketState::Listening);
    assert_eq!(unit.collect_fds().len(), 1);

    unit.stop().unwrap();

    assert_eq!(unit.state(), SocketState::Dead);
    assert_eq!(unit.result(), SocketResult::Success);
    assert!(unit.collect_fds().is_empty());
    assert!(unit.manager().fd_watches.is_empty());
    assert!(pipe.exists(), "filesystem objects survive the unit");
}
