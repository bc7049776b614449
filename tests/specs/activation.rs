// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Activation specs: non-accepting FIFO units, per-connection instancing,
//! connection budgets, and the TCP reset race.

use super::prelude::*;
use serial_test::serial;
use sockd_core::{SocketConfig, SocketState};
use sockd_unit::FdEventKind;
use std::io::Write;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};

#[test]
#[serial]
fn non_accepting_fifo_activates_its_service_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let pipe = dir.path().join("x.pipe");
    let mut unit = socket_unit(SocketConfig::default(), vec![fifo_kind(&pipe)]);

    unit.load().unwrap();
    assert_eq!(unit.manager().loaded, vec!["x.service".into()]);

    unit.start().unwrap();
    assert_eq!(unit.state(), SocketState::Listening);

    // the fifo exists with the configured mode
    let meta = std::fs::metadata(&pipe).unwrap();
    assert!(std::os::unix::fs::FileTypeExt::is_fifo(&meta.file_type()));
    assert_eq!(meta.mode() & 0o777, 0o666 & !current_umask());

    // one byte of external traffic
    let mut writer = std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&pipe)
        .unwrap();
    writer.write_all(b"!").unwrap();

    let fd = unit.collect_fds()[0];
    unit.fd_event(fd, FdEventKind::Readable);

    assert_eq!(unit.state(), SocketState::Running);
    assert_eq!(unit.manager().start_jobs, vec!["x.service".into()]);

    // further readiness in Running does not re-trigger
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.manager().start_jobs.len(), 1);

    unit.stop().unwrap();
    assert_eq!(unit.state(), SocketState::Dead);
    // stopping never deletes the fifo
    assert!(pipe.exists());
}

#[test]
#[serial]
fn accepting_tcp_mints_numbered_instances_and_caps_connections() {
    let mut unit = socket_unit(
        SocketConfig::default().accept(true).max_connections(2),
        vec![stream_kind("127.0.0.1:0")],
    );
    unit.load().unwrap();
    unit.start().unwrap();
    assert_eq!(unit.state(), SocketState::Listening);

    let addr = bound_addr(&unit);
    let fd = unit.collect_fds()[0];

    let first = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);
    let second = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);

    assert_eq!(unit.n_accepted(), 2);
    assert_eq!(unit.n_connections(), 2);
    assert_eq!(unit.manager().handoffs.len(), 2);
    assert_eq!(unit.manager().start_jobs.len(), 2);

    let aliases: Vec<String> =
        unit.manager().aliases.iter().map(|(_, alias)| alias.to_string()).collect();
    assert_eq!(
        aliases[0],
        format!(
            "x@0-{}:{}-{}:{}.service",
            addr.ip(),
            addr.port(),
            first.local_addr().unwrap().ip(),
            first.local_addr().unwrap().port()
        )
    );
    assert!(aliases[1].starts_with("x@1-"));
    assert!(
        aliases[1].contains(&format!("{}:{}", second.local_addr().unwrap().ip(), second.local_addr().unwrap().port())),
        "second instance is keyed by the second connection"
    );

    // a third arrival while both are alive is accepted by the kernel, then
    // closed by the unit; nothing is queued
    let _third = TcpStream::connect(addr).unwrap();
    unit.fd_event(fd, FdEventKind::Readable);
    assert_eq!(unit.state(), SocketState::Listening);
    assert_eq!(unit.n_connections(), 2);
    assert_eq!(unit.manager().handoffs.len(), 2);
}

#[test]
#[serial]
fn reset_before_dispatch_is_dropped_silently() {
    let mut unit = socket_unit(
        SocketConfig::default().accept(true),
        vec![stream_kind("127.0.0.1:0")],
    );
    unit.load().unwrap();
    unit.start().unwrap();
    let addr = bound_addr(&unit);
    let fd = unit.collect_fds()[0];

    // connect, then reset: SO_LINGER with a zero timeout turns close() into RST
    let client = TcpStream::connect(addr).unwrap();
    let client_fd: std::os::fd::OwnedFd = client.into();
    let linger = libc::linger { l_onoff: 1, l_linger: 0 };
    nix::sys::socket::setsockopt(&client_fd, nix::sys::socket::sockopt::Linger, &linger)
        .unwrap();
    drop(client_fd);
    std::thread::sleep(std::time::Duration::from_millis(50));

    unit.fd_event(fd, FdEventKind::Readable);

    // dropped without a trace: no counters moved, no job queued, still up
    assert_eq!(unit.state(), SocketState::Listening);
    assert_eq!(unit.n_accepted(), 0);
    assert_eq!(unit.n_connections(), 0);
    assert!(unit.manager().handoffs.is_empty());
    assert!(unit.manager().start_jobs.is_empty());
    let _ = unit.collect_fds()[0];
}

#[test]
#[serial]
fn accepted_descriptors_carry_the_peer_connection() {
    let mut unit = socket_unit(
        SocketConfig::default().accept(true),
        vec![stream_kind("127.0.0.1:0")],
    );
    unit.load().unwrap();
    unit.start().unwrap();
    let addr = bound_addr(&unit);
    let fd = unit.collect_fds()[0];

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"payload").unwrap();
    unit.fd_event(fd, FdEventKind::Readable);

    // the handed-off descriptor is the live connection: the payload is
    // readable from it once delivery settles
    let (_, handed) = &unit.manager().handoffs[0];
    let mut buf = [0u8; 7];
    for attempt in 0.. {
        match nix::unistd::read(handed.as_raw_fd(), &mut buf) {
            Ok(7) => break,
            Ok(n) => panic!("short read: {n}"),
            Err(nix::errno::Errno::EAGAIN) if attempt < 100 => {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(e) => panic!("read failed: {e}"),
        }
    }
    assert_eq!(&buf, b"payload");
}

fn current_umask() -> u32 {
    let mode = nix::sys::stat::umask(nix::sys::stat::Mode::empty());
    nix::sys::stat::umask(mode);
    mode.bits()
}
