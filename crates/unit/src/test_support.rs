// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test double for the supervisor side of the [`Manager`] contract.
//!
//! Records every call so tests can assert on watches, timers, spawned
//! commands, jobs and dependency edges; individual operations can be
//! scripted to fail.

use crate::kill::KillOutcome;
use crate::manager::{
    DependencyKind, FdWatch, Manager, ManagerError, ServiceRef, ServiceStartability, TimerTicket,
};
use nix::unistd::Pid;
use sockd_core::{ActiveState, ExecCommand, ExecContext, KillContext, UnitName};
use std::collections::HashMap;
use std::os::fd::{OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A control-command spawn request the fake recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub path: PathBuf,
    pub argv: Vec<String>,
}

/// Recording fake for the supervisor singleton.
#[derive(Default)]
pub struct FakeManager {
    next_token: u64,
    next_pid: i32,

    /// Active fd watches, token -> fd.
    pub fd_watches: HashMap<u64, RawFd>,
    /// Pids currently watched.
    pub pid_watches: Vec<Pid>,
    /// Active timers, token -> duration.
    pub timers: HashMap<u64, Duration>,
    /// Every notification, oldest first.
    pub notifications: Vec<(ActiveState, ActiveState)>,
    /// Every spawn request, oldest first.
    pub spawns: Vec<SpawnRecord>,
    /// Every service name loaded.
    pub loaded: Vec<UnitName>,
    /// Trigger registrations.
    pub triggers: Vec<UnitName>,
    /// Aliases given to minted instances.
    pub aliases: Vec<(UnitName, UnitName)>,
    /// Descriptors handed off, with the receiving service name.
    pub handoffs: Vec<(UnitName, OwnedFd)>,
    /// Start jobs enqueued.
    pub start_jobs: Vec<UnitName>,
    /// Dependency edges recorded.
    pub dependencies: Vec<(DependencyKind, UnitName)>,
    /// RequiresMountsFor paths.
    pub mount_paths: Vec<PathBuf>,
    /// Device node links.
    pub node_links: Vec<PathBuf>,

    /// Kill passes requested, as `(control pid, lethal)`.
    pub kills: Vec<(Option<Pid>, bool)>,

    // --- scripted behavior ---
    pub kill_outcome: KillOutcome,
    pub fail_next_spawn: bool,
    pub fail_watch_fd: bool,
    pub fail_load_service: bool,
    pub fail_handoff: bool,
    pub fail_enqueue_start: bool,
    pub stop_pending: bool,
    pub trigger_active: bool,
    pub system_mode: bool,
    pub startability: Option<ServiceStartability>,
    pub exec_paths: HashMap<UnitName, PathBuf>,
}

impl FakeManager {
    pub fn new() -> Self {
        FakeManager { next_pid: 5000, ..FakeManager::default() }
    }

    pub fn watched_fds(&self) -> Vec<RawFd> {
        let mut fds: Vec<RawFd> = self.fd_watches.values().copied().collect();
        fds.sort_unstable();
        fds
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn last_notification(&self) -> Option<(ActiveState, ActiveState)> {
        self.notifications.last().copied()
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

impl Manager for FakeManager {
    fn watch_pid(&mut self, _unit: &UnitName, pid: Pid) {
        self.pid_watches.push(pid);
    }

    fn unwatch_pid(&mut self, _unit: &UnitName, pid: Pid) {
        self.pid_watches.retain(|p| *p != pid);
    }

    fn watch_fd(&mut self, _unit: &UnitName, fd: RawFd) -> Result<FdWatch, ManagerError> {
        if self.fail_watch_fd {
            return Err(ManagerError::Refused("watch_fd scripted to fail".into()));
        }
        let token = self.token();
        self.fd_watches.insert(token, fd);
        Ok(FdWatch::new(token))
    }

    fn unwatch_fd(&mut self, _unit: &UnitName, watch: FdWatch) {
        self.fd_watches.remove(&watch.id());
    }

    fn arm_timer(&mut self, _unit: &UnitName, after: Duration) -> TimerTicket {
        let token = self.token();
        self.timers.insert(token, after);
        TimerTicket::new(token)
    }

    fn disarm_timer(&mut self, _unit: &UnitName, ticket: TimerTicket) {
        self.timers.remove(&ticket.id());
    }

    fn notify_active_state(&mut self, _unit: &UnitName, old: ActiveState, new: ActiveState) {
        self.notifications.push((old, new));
    }

    fn spawn(
        &mut self,
        _unit: &UnitName,
        command: &ExecCommand,
        _context: &ExecContext,
    ) -> Result<Pid, ManagerError> {
        if self.fail_next_spawn {
            self.fail_next_spawn = false;
            return Err(ManagerError::Refused("spawn scripted to fail".into()));
        }
        self.spawns.push(SpawnRecord { path: command.path.clone(), argv: command.argv.clone() });
        self.next_pid += 1;
        Ok(Pid::from_raw(self.next_pid))
    }

    fn kill_context(
        &mut self,
        _unit: &UnitName,
        _context: &KillContext,
        control_pid: Option<Pid>,
        lethal: bool,
    ) -> Result<KillOutcome, ManagerError> {
        self.kills.push((control_pid, lethal));
        Ok(self.kill_outcome)
    }

    fn load_service(&mut self, name: &UnitName) -> Result<ServiceRef, ManagerError> {
        if self.fail_load_service {
            return Err(ManagerError::UnitNotFound(name.clone()));
        }
        self.loaded.push(name.clone());
        Ok(ServiceRef::new(name.clone()))
    }

    fn register_trigger(
        &mut self,
        _unit: &UnitName,
        service: &ServiceRef,
    ) -> Result<(), ManagerError> {
        self.triggers.push(service.name().clone());
        Ok(())
    }

    fn add_service_alias(
        &mut self,
        service: &ServiceRef,
        name: &UnitName,
    ) -> Result<(), ManagerError> {
        self.aliases.push((service.name().clone(), name.clone()));
        Ok(())
    }

    fn service_startability(&self, _service: &ServiceRef) -> ServiceStartability {
        self.startability.unwrap_or(ServiceStartability::Startable)
    }

    fn service_exec_path(&self, service: &ServiceRef) -> Option<PathBuf> {
        self.exec_paths.get(service.name()).cloned()
    }

    fn set_service_socket_fd(
        &mut self,
        service: &ServiceRef,
        fd: OwnedFd,
        _socket: &UnitName,
    ) -> Result<(), ManagerError> {
        if self.fail_handoff {
            // the manager owns the fd even on failure; dropping closes it
            return Err(ManagerError::Refused("handoff scripted to fail".into()));
        }
        self.handoffs.push((service.name().clone(), fd));
        Ok(())
    }

    fn enqueue_start(&mut self, service: &ServiceRef) -> Result<(), ManagerError> {
        if self.fail_enqueue_start {
            return Err(ManagerError::Refused("enqueue scripted to fail".into()));
        }
        self.start_jobs.push(service.name().clone());
        Ok(())
    }

    fn stop_pending(&self, _unit: &UnitName) -> bool {
        self.stop_pending
    }

    fn trigger_active_or_pending(&self, _unit: &UnitName) -> bool {
        self.trigger_active
    }

    fn add_dependency(
        &mut self,
        _unit: &UnitName,
        kind: DependencyKind,
        target: &UnitName,
    ) -> Result<(), ManagerError> {
        self.dependencies.push((kind, target.clone()));
        Ok(())
    }

    fn require_mounts_for(&mut self, _unit: &UnitName, path: &Path) -> Result<(), ManagerError> {
        self.mount_paths.push(path.to_path_buf());
        Ok(())
    }

    fn add_node_link(&mut self, _unit: &UnitName, path: &Path) -> Result<(), ManagerError> {
        self.node_links.push(path.to_path_buf());
        Ok(())
    }

    fn system_mode(&self) -> bool {
        self.system_mode
    }
}
