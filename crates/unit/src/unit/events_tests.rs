// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::unit::test_helpers::*;
use super::FdEventKind;
use crate::kill::KillOutcome;
use crate::manager::ServiceNotice;
use serial_test::serial;
use sockd_core::{CommandId, CommandSet, SocketConfig, SocketResult, SocketState};
use std::io::Write;
use std::net::TcpStream;

fn bound_addr(unit: &TestUnit) -> std::net::SocketAddr {
    let fd = unit.collect_fds()[0];
    let addr = nix::sys::socket::getsockname::<nix::sys::socket::SockaddrStorage>(fd).unwrap();
    let v4 = addr.as_sockaddr_in().unwrap();
    std::net::SocketAddr::from((v4.ip(), v4.port()))
}

#[test]
#[serial]
fn non_accepting_activation_schedules_the_shared_service_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut unit = fifo_unit(&dir, SocketConfig::default());
    unit.set_service(paired_service());
    unit.start().unwrap();

    // one byte of external traffic
    let mut writer = std::fs::OpenOptions::new()
        .write(true)
        .open(dir.path().join("x.pipe"))
        .unwrap();
    writer.write_all(b"x").unwrap();

    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);

    assert_eq!(unit.state(), SocketState::Running);
    assert_eq!(unit.manager().start_jobs.len(), 1);
    assert_eq!(unit.manager().start_jobs[0].as_str(), "x.service");
    assert_invariants(&unit);
    // endpoints stay open in Running but are no longer watched
    assert_eq!(unit.collect_fds().len(), 1);
    assert!(unit.manager().fd_watches.is_empty());
}

#[test]
#[serial]
fn activation_skips_the_job_when_a_trigger_is_already_pending() {
    let dir = tempfile::tempdir().unwrap();
    let mut unit = fifo_unit(&dir, SocketConfig::default());
    unit.set_service(paired_service());
    unit.manager_mut().trigger_active = true;
    unit.start().unwrap();

    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);

    assert_eq!(unit.state(), SocketState::Running);
    assert!(unit.manager().start_jobs.is_empty());
}

#[test]
#[serial]
fn accepting_socket_mints_one_instance_per_connection() {
    let mut unit = tcp_unit(SocketConfig::default().accept(true).max_connections(2));
    unit.start().unwrap();
    assert_eq!(unit.state(), SocketState::Listening);
    // the template instance was pre-loaded for label resolution
    assert_eq!(unit.manager().loaded, vec!["x@0.service".into()]);

    let addr = bound_addr(&unit);
    let fd = unit.collect_fds()[0];

    let client = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);

    assert_eq!(unit.state(), SocketState::Listening, "accept mode stays in Listening");
    assert_eq!(unit.n_accepted(), 1);
    assert_eq!(unit.n_connections(), 1);
    assert_eq!(unit.manager().handoffs.len(), 1);
    assert_eq!(unit.manager().start_jobs.len(), 1);

    let expected = format!(
        "x@0-{}:{}-{}:{}.service",
        addr.ip(),
        addr.port(),
        client.local_addr().unwrap().ip(),
        client.local_addr().unwrap().port()
    );
    let (_, alias) = &unit.manager().aliases[0];
    assert_eq!(alias.as_str(), expected);

    // second connection mints the next counter value
    let client2 = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.n_accepted(), 2);
    assert_eq!(unit.n_connections(), 2);
    assert!(unit.manager().loaded.contains(&"x@1.service".into()));
    drop(client2);
    assert_invariants(&unit);
}

#[test]
#[serial]
fn connections_beyond_the_budget_are_refused_not_queued() {
    let mut unit = tcp_unit(SocketConfig::default().accept(true).max_connections(1));
    unit.start().unwrap();
    let addr = bound_addr(&unit);
    let fd = unit.collect_fds()[0];

    let _live = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.n_connections(), 1);

    // second arrival while the first is alive: accepted by the kernel, then
    // closed by the unit
    let _refused = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);

    assert_eq!(unit.state(), SocketState::Listening);
    assert_eq!(unit.n_accepted(), 1, "refused connections do not consume the counter");
    assert_eq!(unit.n_connections(), 1);
    assert_eq!(unit.manager().handoffs.len(), 1);

    // once the live service dies, the next connection is admitted
    unit.connection_unref();
    let _third = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.n_connections(), 1);
    assert_eq!(unit.manager().handoffs.len(), 2);
}

#[test]
#[serial]
fn handoff_failure_keeps_counters_and_closes_the_connection() {
    let mut unit = tcp_unit(SocketConfig::default().accept(true));
    unit.start().unwrap();
    let addr = bound_addr(&unit);
    let fd = unit.collect_fds()[0];
    unit.manager_mut().fail_handoff = true;

    let _client = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);

    assert_eq!(unit.n_connections(), 0);
    assert!(unit.manager().handoffs.is_empty());
    // the failure takes the unit down the stop path
    assert_eq!(unit.state(), SocketState::Failed);
    assert_eq!(unit.result(), SocketResult::FailureResources);
}

#[test]
#[serial]
fn pending_stop_suppresses_activation() {
    let dir = tempfile::tempdir().unwrap();
    let mut unit = fifo_unit(&dir, SocketConfig::default());
    unit.set_service(paired_service());
    unit.start().unwrap();
    unit.manager_mut().stop_pending = true;

    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);

    // drained and re-armed, no job enqueued
    assert_eq!(unit.state(), SocketState::Listening);
    assert!(unit.manager().start_jobs.is_empty());
    assert_eq!(unit.collect_fds().len(), 1);
    assert_invariants(&unit);
}

#[test]
#[serial]
fn unexpected_poll_events_abort_to_the_stop_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut unit = fifo_unit(&dir, SocketConfig::default());
    unit.start().unwrap();

    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Error);

    assert_eq!(unit.state(), SocketState::Failed);
    assert_eq!(unit.result(), SocketResult::FailureResources);
}

#[test]
#[serial]
fn fd_events_outside_listening_are_stale_and_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut unit = fifo_unit(&dir, SocketConfig::default());
    unit.fd_event(3, FdEventKind::Readable);
    assert_eq!(unit.state(), SocketState::Dead);

    unit.set_service(paired_service());
    unit.start().unwrap();
    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.state(), SocketState::Running);

    // Running does not accept fd events
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.manager().start_jobs.len(), 1);
}

#[test]
#[serial]
fn start_timeout_escalates_through_the_final_signal_states() {
    let dir = tempfile::tempdir().unwrap();
    let commands = CommandSet::default().with(CommandId::StartPre, cmd("/bin/sleep"));
    let mut unit = fifo_unit(&dir, SocketConfig::default().commands(commands));
    unit.manager_mut().kill_outcome = KillOutcome::ProcessesSignalled;

    unit.start().unwrap();
    assert_eq!(unit.state(), SocketState::StartPre);

    unit.timer_event();
    assert_eq!(unit.state(), SocketState::FinalSigterm);
    assert_eq!(unit.manager().kills.last(), Some(&(unit.control_pid(), false)));
    assert_invariants(&unit);

    unit.timer_event();
    assert_eq!(unit.state(), SocketState::FinalSigkill);
    assert!(unit.manager().kills.last().unwrap().1, "escalation is lethal");
    assert_invariants(&unit);

    unit.timer_event();
    assert_eq!(unit.state(), SocketState::Failed);
    assert_eq!(unit.result(), SocketResult::FailureTimeout);
    assert_invariants(&unit);
}

#[test]
#[serial]
fn stop_timeout_without_sigkill_skips_the_kill_stage() {
    let dir = tempfile::tempdir().unwrap();
    let commands = CommandSet::default().with(CommandId::StopPre, cmd("/bin/stop-pre"));
    let mut config = SocketConfig::default().commands(commands);
    config.kill_context.send_sigkill = false;
    let mut unit = fifo_unit(&dir, config);
    unit.manager_mut().kill_outcome = KillOutcome::ProcessesSignalled;

    unit.start().unwrap();
    unit.stop().unwrap();
    assert_eq!(unit.state(), SocketState::StopPre);

    unit.timer_event();
    assert_eq!(unit.state(), SocketState::StopPreSigterm);

    // without send_sigkill the machine skips the kill state entirely
    unit.manager_mut().kill_outcome = KillOutcome::NoProcesses;
    unit.timer_event();
    assert_eq!(unit.state(), SocketState::Failed);
    assert_eq!(unit.result(), SocketResult::FailureTimeout);
}

#[test]
#[serial]
fn service_death_returns_a_running_unit_to_listening() {
    let dir = tempfile::tempdir().unwrap();
    let mut unit = fifo_unit(&dir, SocketConfig::default());
    unit.set_service(paired_service());
    unit.start().unwrap();
    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.state(), SocketState::Running);

    unit.trigger_notify(ServiceNotice::Stopped);
    assert_eq!(unit.state(), SocketState::Listening);
    assert_invariants(&unit);
}

#[test]
#[serial]
fn permanent_service_failure_takes_the_socket_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut unit = fifo_unit(&dir, SocketConfig::default());
    unit.set_service(paired_service());
    unit.start().unwrap();
    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);

    unit.trigger_notify(ServiceNotice::Failed { start_limit_hit: true });
    assert_eq!(unit.state(), SocketState::Failed);
    assert_eq!(unit.result(), SocketResult::FailureServicePermanent);
}

#[test]
#[serial]
fn trigger_notify_is_ignored_for_accepting_units() {
    let mut unit = tcp_unit(SocketConfig::default().accept(true));
    unit.start().unwrap();

    unit.trigger_notify(ServiceNotice::Running);
    assert_eq!(unit.state(), SocketState::Listening, "accept mode never enters Running");
}

#[test]
#[serial]
fn sigchld_from_unknown_pids_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let commands = CommandSet::default().with(CommandId::StartPre, cmd("/bin/pre"));
    let mut unit = fifo_unit(&dir, SocketConfig::default().commands(commands));
    unit.start().unwrap();

    let stranger = nix::unistd::Pid::from_raw(1);
    unit.sigchld_event(stranger, nix::sys::wait::WaitStatus::Exited(stranger, 0));
    assert_eq!(unit.state(), SocketState::StartPre, "unknown pid does not advance the fsm");
}

#[test]
fn fresh_unit_has_no_connections() {
    let unit = tcp_unit(SocketConfig::default().accept(true));
    assert_eq!(unit.n_connections(), 0);
    assert!(!unit.check_gc());
}

#[test]
#[serial]
fn gc_is_blocked_while_connections_live() {
    let mut unit = tcp_unit(SocketConfig::default().accept(true));
    unit.start().unwrap();
    let addr = bound_addr(&unit);
    let fd = unit.collect_fds()[0];

    let _client = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);
    assert!(unit.check_gc());
    unit.connection_unref();
    assert!(!unit.check_gc());
}

#[test]
#[serial]
fn datagram_sockets_activate_without_accepting() {
    // a datagram endpoint in accept-less mode uses readiness only
    let kind = crate::port::PortKind::Socket {
        address: sockd_core::SocketAddress::datagram("127.0.0.1:0".parse().unwrap()),
    };
    let mut unit = crate::unit::SocketUnit::new(
        sockd_core::UnitName::new("x.socket"),
        SocketConfig::default(),
        vec![kind],
        crate::test_support::FakeManager::new(),
        sockd_core::ManualClock::new(),
    );
    unit.set_service(paired_service());
    unit.start().unwrap();

    let addr = bound_addr(&unit);
    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b"ping", addr).unwrap();

    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.state(), SocketState::Running);
    // the datagram itself was left in the socket for the service
    assert_eq!(unit.manager().start_jobs.len(), 1);
}
