// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State transfer across a supervisor re-execution.
//!
//! Serialization writes `key=value` lines and duplicates every live endpoint
//! descriptor into the shared [`FdStore`]. Deserialization restores fields
//! one line at a time, transplanting descriptors back into the reloaded
//! endpoint list; `distribute_fds` sweeps whatever is left by address match.
//! Coldplug then re-establishes watches and timers for the restored state.
//! The supervisor completes all deserialization before coldplugging any unit.

use super::SocketUnit;
use crate::fdstore::FdStore;
use crate::manager::Manager;
use crate::port::PortKind;
use nix::unistd::Pid;
use sockd_core::{
    Clock, CommandId, SerialError, SerialWriter, SocketResult, SocketState, SocketType,
};
use std::io::Write;
use std::os::fd::RawFd;

impl<M: Manager, C: Clock> SocketUnit<M, C> {
    /// Emit this unit's runtime state. Every open descriptor is duplicated
    /// into `fds` so the next process image can find it by number.
    pub fn serialize<W: Write>(
        &self,
        writer: &mut SerialWriter<W>,
        fds: &mut FdStore,
    ) -> Result<(), SerialError> {
        writer.item("state", self.state)?;
        if self.result != SocketResult::Success {
            writer.item("result", self.result)?;
        }
        writer.item("n-accepted", self.n_accepted)?;
        if let Some(pid) = self.control_pid {
            writer.item("control-pid", pid)?;
        }
        if let Some(cursor) = self.control_command {
            writer.item("control-command", cursor.id)?;
        }

        for port in self.ports.iter() {
            let Some(borrowed) = port.fd_ref() else {
                continue;
            };
            let copy = fds.put_dup(borrowed)?;
            match port.kind() {
                PortKind::Socket { address } => {
                    if matches!(address, sockd_core::SocketAddress::Netlink { .. }) {
                        writer.item("netlink", format_args!("{copy} {}", address.print()))?;
                    } else {
                        writer.item(
                            "socket",
                            format_args!("{copy} {} {}", address.ty().number(), address.print()),
                        )?;
                    }
                }
                PortKind::Fifo { path } => {
                    writer.item("fifo", format_args!("{copy} {}", path.display()))?;
                }
                PortKind::Special { path } => {
                    writer.item("special", format_args!("{copy} {}", path.display()))?;
                }
                PortKind::MessageQueue { path } => {
                    writer.item("mqueue", format_args!("{copy} {}", path.display()))?;
                }
            }
        }

        Ok(())
    }

    /// Restore one serialized entry. Unknown keys and unparsable values are
    /// logged and skipped so newer state loads on older code.
    pub fn deserialize_item(&mut self, key: &str, value: &str, fds: &mut FdStore) {
        match key {
            "state" => match SocketState::from_name(value) {
                Some(state) => self.deserialized_state = Some(state),
                None => tracing::debug!(unit = %self.id, value, "failed to parse state value"),
            },
            "result" => match SocketResult::from_name(value) {
                Some(SocketResult::Success) => {}
                Some(result) => self.result = result,
                None => tracing::debug!(unit = %self.id, value, "failed to parse result value"),
            },
            "n-accepted" => match value.parse::<u32>() {
                // additive, preserving counts merged over several passes
                Ok(n) => self.n_accepted += n,
                Err(_) => {
                    tracing::debug!(unit = %self.id, value, "failed to parse n-accepted value")
                }
            },
            "control-pid" => match value.parse::<i32>() {
                Ok(pid) if pid > 0 => self.control_pid = Some(Pid::from_raw(pid)),
                _ => tracing::debug!(unit = %self.id, value, "failed to parse control-pid value"),
            },
            "control-command" => match CommandId::from_name(value) {
                Some(id) => {
                    self.control_command = Some(super::ControlCursor { id, index: 0 });
                }
                None => {
                    tracing::debug!(unit = %self.id, value, "failed to parse control-command value")
                }
            },
            "fifo" => self.transplant_path_fd(value, fds, |kind, path| {
                matches!(kind, PortKind::Fifo { path: p } if p.as_path() == path)
            }),
            "special" => self.transplant_path_fd(value, fds, |kind, path| {
                matches!(kind, PortKind::Special { path: p } if p.as_path() == path)
            }),
            "mqueue" => self.transplant_path_fd(value, fds, |kind, path| {
                matches!(kind, PortKind::MessageQueue { path: p } if p.as_path() == path)
            }),
            "socket" => {
                let Some((fd, rest)) = split_fd(value, fds) else {
                    tracing::debug!(unit = %self.id, value, "failed to parse socket value");
                    return;
                };
                let Some((ty, address)) = rest.split_once(' ') else {
                    tracing::debug!(unit = %self.id, value, "failed to parse socket value");
                    return;
                };
                let Ok(ty) = ty.parse::<i32>() else {
                    tracing::debug!(unit = %self.id, value, "failed to parse socket value");
                    return;
                };
                if SocketType::from_number(ty).is_none() {
                    tracing::debug!(unit = %self.id, value, "failed to parse socket value");
                    return;
                }
                self.transplant(fds, fd, |kind| {
                    matches!(kind, PortKind::Socket { address: a } if a.is(address, ty))
                });
            }
            "netlink" => {
                let Some((fd, rest)) = split_fd(value, fds) else {
                    tracing::debug!(unit = %self.id, value, "failed to parse netlink value");
                    return;
                };
                self.transplant(fds, fd, |kind| {
                    matches!(kind, PortKind::Socket { address } if address.is_netlink(rest))
                });
            }
            _ => {
                tracing::debug!(unit = %self.id, key, "unknown serialization key");
            }
        }
    }

    /// Sweep descriptors nobody claimed by key, matching them against socket
    /// endpoint addresses. Any match forces the deserialized state to
    /// `Listening` — the descriptors prove we were listening before.
    pub fn distribute_fds(&mut self, fds: &mut FdStore) {
        if self.ports.distribute_fds(fds) {
            self.deserialized_state = Some(SocketState::Listening);
        }
    }

    /// Re-establish runtime state for the deserialized state: control-pid
    /// watch and timer for transient states, endpoints reopened where the
    /// state needs them (idempotent — transplanted ones are kept), readiness
    /// watches for `Listening`.
    pub fn coldplug(&mut self) -> Result<(), super::UnitError> {
        debug_assert_eq!(self.state, SocketState::Dead);
        let Some(target) = self.deserialized_state.take() else {
            return Ok(());
        };
        if target == self.state {
            return Ok(());
        }

        if target.is_transient() {
            let Some(pid) = self.control_pid else {
                return Err(super::UnitError::MissingControlPid);
            };
            self.manager.watch_pid(&self.id, pid);
            // set_state arms the state timeout below
        }

        if target.keeps_fds_open() {
            self.open_ports().map_err(|e| {
                crate::manager::ManagerError::Io(std::io::Error::other(e.to_string()))
            })?;
        }

        if target == SocketState::Listening {
            self.ports.watch_all(&mut self.manager, &self.id)?;
        }

        self.set_state(target);
        Ok(())
    }

    fn transplant_path_fd(
        &mut self,
        value: &str,
        fds: &mut FdStore,
        matches: impl Fn(&PortKind, &std::path::Path) -> bool,
    ) {
        let Some((fd, path)) = split_fd(value, fds) else {
            tracing::debug!(unit = %self.id, value, "failed to parse fd value");
            return;
        };
        let path = std::path::PathBuf::from(path);
        self.transplant(fds, fd, |kind| matches(kind, &path));
    }

    fn transplant(&mut self, fds: &mut FdStore, fd: RawFd, matches: impl Fn(&PortKind) -> bool) {
        if let Some(port) = self.ports.iter_mut().find(|p| matches(p.kind())) {
            if let Some(owned) = fds.remove(fd) {
                port.transplant_fd(owned);
            }
        }
    }
}

/// Split a serialized `"{fd} {rest}"` value, validating the fd against the
/// store.
fn split_fd<'a>(value: &'a str, fds: &FdStore) -> Option<(RawFd, &'a str)> {
    let (fd, rest) = value.split_once(' ')?;
    let fd = fd.parse::<RawFd>().ok()?;
    if fd < 0 || !fds.contains(fd) {
        return None;
    }
    Some((fd, rest))
}

#[cfg(test)]
#[path = "serialize_tests.rs"]
mod tests;
