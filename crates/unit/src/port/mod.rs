// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listen endpoints: the polymorphic port type and the ordered endpoint set.
//!
//! A port owns its descriptor; the watch token is bound 1-to-1 with the open
//! descriptor and both only ever change on state transitions.

mod factory;
mod options;

pub(crate) use factory::query_peer;
pub use factory::OpenError;

use crate::mac::MacPolicy;
use crate::manager::{FdWatch, Manager, ManagerError};
use sockd_core::{SocketAddress, SocketConfig, UnitName};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

/// Apply the configured socket options to an accepted connection.
pub(crate) fn options_for_accepted(unit: &UnitName, config: &SocketConfig, fd: BorrowedFd<'_>) {
    options::apply_socket_options(unit, config, fd);
}

/// The four endpoint kinds a socket unit can listen on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    Socket { address: SocketAddress },
    Fifo { path: PathBuf },
    Special { path: PathBuf },
    MessageQueue { path: PathBuf },
}

impl PortKind {
    /// The `Listen*` keyword used in configuration and the property dump.
    pub fn dump_tag(&self) -> &'static str {
        match self {
            PortKind::Socket { address } => address.listen_keyword(),
            PortKind::Fifo { .. } => "ListenFIFO",
            PortKind::Special { .. } => "ListenSpecial",
            PortKind::MessageQueue { .. } => "ListenMessageQueue",
        }
    }

    /// Textual form of the bound object, for dump output.
    pub fn print(&self) -> String {
        match self {
            PortKind::Socket { address } => address.print(),
            PortKind::Fifo { path }
            | PortKind::Special { path }
            | PortKind::MessageQueue { path } => path.display().to_string(),
        }
    }

    /// The filesystem path whose ownership the chown helper fixes up.
    /// Special files and message queues are left alone.
    pub fn chown_path(&self) -> Option<&Path> {
        match self {
            PortKind::Socket { address } => address.path(),
            PortKind::Fifo { path } => Some(path),
            PortKind::Special { .. } | PortKind::MessageQueue { .. } => None,
        }
    }

    /// The filesystem path this endpoint occupies, for mount dependencies.
    pub fn mount_path(&self) -> Option<&Path> {
        match self {
            PortKind::Socket { address } => address.path(),
            PortKind::Fifo { path } | PortKind::Special { path } => Some(path),
            PortKind::MessageQueue { .. } => None,
        }
    }

    /// Whether `accept(2)` applies.
    pub fn can_accept(&self) -> bool {
        match self {
            PortKind::Socket { address } => address.can_accept(),
            _ => false,
        }
    }
}

/// One listen endpoint plus its runtime descriptor state.
#[derive(Debug)]
pub struct SocketPort {
    kind: PortKind,
    fd: Option<OwnedFd>,
    watch: Option<FdWatch>,
}

impl SocketPort {
    pub fn new(kind: PortKind) -> Self {
        SocketPort { kind, fd: None, watch: None }
    }

    pub fn kind(&self) -> &PortKind {
        &self.kind
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub(crate) fn fd_ref(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    pub(crate) fn transplant_fd(&mut self, fd: OwnedFd) {
        // drops (closes) any descriptor held from before the re-exec
        self.fd = Some(fd);
    }
}

/// The ordered endpoint list of one unit.
#[derive(Debug, Default)]
pub struct Ports {
    entries: Vec<SocketPort>,
}

impl Ports {
    pub fn new(kinds: Vec<PortKind>) -> Self {
        Ports { entries: kinds.into_iter().map(SocketPort::new).collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketPort> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SocketPort> {
        self.entries.iter_mut()
    }

    pub(crate) fn by_fd(&self, fd: RawFd) -> Option<&SocketPort> {
        self.entries.iter().find(|p| p.fd() == Some(fd))
    }

    /// Open every not-yet-open endpoint in order. On the first failure every
    /// endpoint opened by *this call* is closed again and the error returned.
    pub(crate) fn open_all(
        &mut self,
        unit: &UnitName,
        config: &SocketConfig,
        mac: &dyn MacPolicy,
        socket_label: Option<&str>,
    ) -> Result<(), OpenError> {
        let mut opened = Vec::new();
        for index in 0..self.entries.len() {
            if self.entries[index].is_open() {
                continue;
            }
            match factory::open_port(unit, &self.entries[index].kind, config, mac, socket_label) {
                Ok(fd) => {
                    self.entries[index].fd = Some(fd);
                    opened.push(index);
                }
                Err(e) => {
                    for index in opened {
                        self.entries[index].fd = None;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Close every endpoint. Never deletes filesystem objects: some consumer
    /// may still hold a reference; stale objects are replaced by the next
    /// open instead.
    pub(crate) fn close_all<M: Manager>(&mut self, manager: &mut M, unit: &UnitName) {
        for port in &mut self.entries {
            if let Some(watch) = port.watch.take() {
                manager.unwatch_fd(unit, watch);
            }
            port.fd = None;
        }
    }

    /// Install readiness watches on every open endpoint; on failure every
    /// watch installed so far is removed again.
    pub(crate) fn watch_all<M: Manager>(
        &mut self,
        manager: &mut M,
        unit: &UnitName,
    ) -> Result<(), ManagerError> {
        for index in 0..self.entries.len() {
            let Some(fd) = self.entries[index].fd() else {
                continue;
            };
            if self.entries[index].watch.is_some() {
                continue;
            }
            match manager.watch_fd(unit, fd) {
                Ok(watch) => self.entries[index].watch = Some(watch),
                Err(e) => {
                    self.unwatch_all(manager, unit);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn unwatch_all<M: Manager>(&mut self, manager: &mut M, unit: &UnitName) {
        for port in &mut self.entries {
            if let Some(watch) = port.watch.take() {
                manager.unwatch_fd(unit, watch);
            }
        }
    }

    /// Snapshot of all currently-open descriptors, in endpoint order.
    pub fn collect_fds(&self) -> Vec<RawFd> {
        self.entries.iter().filter_map(|p| p.fd()).collect()
    }

    /// Attach descriptors left in the store to address-matching socket
    /// endpoints. Returns whether anything matched.
    pub(crate) fn distribute_fds(&mut self, fds: &mut crate::fdstore::FdStore) -> bool {
        let mut matched = false;
        for port in &mut self.entries {
            let PortKind::Socket { address } = &port.kind else {
                continue;
            };
            if port.is_open() {
                continue;
            }
            let found = fds.keys().into_iter().find(|&key| {
                fds.get(key).is_some_and(|fd| factory::address_matches_fd(address, fd))
            });
            if let Some(key) = found {
                port.fd = fds.remove(key);
                matched = true;
            }
        }
        matched
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
