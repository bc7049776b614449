// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Re-execution specs: a listening unit's descriptors and counters survive
//! into a fresh unit object through serialize, the fd store, and coldplug.

use super::prelude::*;
use serial_test::serial;
use sockd_core::{SerialReader, SerialWriter, SocketConfig, SocketState};
use sockd_unit::{FdEventKind, FdStore};
use std::net::SocketAddr;
use std::os::unix::net::UnixStream;

fn rebuild(
    dir: &std::path::Path,
    lines: &[(String, String)],
    fds: &mut FdStore,
    accept: bool,
) -> Unit {
    let mut unit = socket_unit(
        SocketConfig::default().accept(accept),
        vec![unix_stream_kind(&dir.join("x.sock"))],
    );
    for (key, value) in lines {
        unit.deserialize_item(key, value, fds);
    }
    unit.distribute_fds(fds);
    unit.coldplug().unwrap();
    unit
}

#[test]
#[serial]
fn listening_state_counter_and_descriptor_survive() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("x.sock");
    let mut old = socket_unit(
        SocketConfig::default().accept(true),
        vec![unix_stream_kind(&sock)],
    );
    old.load().unwrap();
    old.start().unwrap();

    // bump the accept counter with one real connection
    let _client = UnixStream::connect(&sock).unwrap();
    let fd = old.collect_fds()[0];
    old.fd_event(fd, FdEventKind::Readable);
    assert_eq!(old.n_accepted(), 1);

    // serialize; the descriptor is duplicated into the shared store
    let mut fds = FdStore::new();
    let mut writer = SerialWriter::new(Vec::new());
    old.serialize(&mut writer, &mut fds).unwrap();
    let bytes = writer.into_inner();
    assert_eq!(fds.len(), 1);
    let key = fds.keys()[0];
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.contains(&format!("socket={key} 1 {}", sock.display())));

    // the old process image goes away entirely
    drop(old);

    let lines: Vec<(String, String)> =
        SerialReader::new(bytes.as_slice()).collect::<Result<_, _>>().unwrap();
    let new = rebuild(dir.path(), &lines, &mut fds, true);

    assert_eq!(new.state(), SocketState::Listening);
    assert_eq!(new.n_accepted(), 1, "accept counter survives the re-exec");
    assert_eq!(new.collect_fds(), vec![key], "the very descriptor was transplanted");
    assert_eq!(new.manager().fd_watches.len(), 1, "readiness watch re-armed");
    assert!(fds.is_empty());
}

#[test]
#[serial]
fn the_transplanted_listener_still_accepts() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("x.sock");
    let mut old = socket_unit(
        SocketConfig::default().accept(true),
        vec![unix_stream_kind(&sock)],
    );
    old.load().unwrap();
    old.start().unwrap();

    let mut fds = FdStore::new();
    let mut writer = SerialWriter::new(Vec::new());
    old.serialize(&mut writer, &mut fds).unwrap();
    let bytes = writer.into_inner();
    drop(old);

    let lines: Vec<(String, String)> =
        SerialReader::new(bytes.as_slice()).collect::<Result<_, _>>().unwrap();
    let mut new = rebuild(dir.path(), &lines, &mut fds, true);

    // a client connecting to the inherited socket is dispatched normally
    let _client = UnixStream::connect(&sock).unwrap();
    let fd = new.collect_fds()[0];
    new.fd_event(fd, FdEventKind::Readable);
    assert_eq!(new.n_connections(), 1);
    assert_eq!(new.manager().handoffs.len(), 1);
}

#[test]
#[serial]
fn distribute_alone_restores_listening_from_a_swept_store() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("x.sock");
    let mut old =
        socket_unit(SocketConfig::default(), vec![unix_stream_kind(&sock)]);
    old.load().unwrap();
    old.start().unwrap();

    // only the descriptor store survives; no key/value state at all
    let mut fds = FdStore::new();
    let mut writer = SerialWriter::new(Vec::new());
    old.serialize(&mut writer, &mut fds).unwrap();
    drop(old);

    let new = rebuild(dir.path(), &[], &mut fds, false);
    assert_eq!(new.state(), SocketState::Listening);
    assert!(fds.is_empty());
}

#[test]
#[serial]
fn tcp_descriptors_match_by_concrete_address() {
    let mut old = socket_unit(
        SocketConfig::default().accept(true),
        vec![stream_kind("127.0.0.1:0")],
    );
    old.load().unwrap();
    old.start().unwrap();
    let addr: SocketAddr = bound_addr(&old);

    let mut fds = FdStore::new();
    let mut writer = SerialWriter::new(Vec::new());
    old.serialize(&mut writer, &mut fds).unwrap();
    drop(old);

    // the reloaded configuration names the concrete bound address
    let mut new = socket_unit(
        SocketConfig::default().accept(true),
        vec![stream_kind(&addr.to_string())],
    );
    new.distribute_fds(&mut fds);
    new.coldplug().unwrap();
    assert_eq!(new.state(), SocketState::Listening);
    assert!(fds.is_empty());
}
