// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Contracts consumed from the surrounding supervisor.
//!
//! The supervisor singleton (event loop, unit table, job queue, fd set) is
//! handed to each unit as a `Manager` implementation; nothing here reaches for
//! ambient global state. All calls happen on the supervisor's single event
//! loop thread.
//!
//! Re-execution contract: the supervisor feeds every serialized entry through
//! [`crate::SocketUnit::deserialize_item`] and then sweeps leftovers with
//! [`crate::SocketUnit::distribute_fds`] *before* it calls
//! [`crate::SocketUnit::coldplug`]. Deserializers may therefore close a
//! previously-held descriptor before transplanting the restored one; coldplug
//! is the only other opener and it skips endpoints that already hold one.

use crate::kill::KillOutcome;
use nix::unistd::Pid;
use sockd_core::{ActiveState, ExecCommand, ExecContext, KillContext, UnitName};
use std::os::fd::{OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("unit not found: {0}")]
    UnitNotFound(UnitName),

    #[error("refused: {0}")]
    Refused(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Opaque handle to a loaded service unit, resolved through the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    name: UnitName,
}

impl ServiceRef {
    pub fn new(name: UnitName) -> Self {
        ServiceRef { name }
    }

    pub fn name(&self) -> &UnitName {
        &self.name
    }
}

/// Token for one installed fd readiness watch. One token per open endpoint.
#[derive(Debug, PartialEq, Eq)]
pub struct FdWatch(u64);

impl FdWatch {
    pub fn new(id: u64) -> Self {
        FdWatch(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Token for one armed timer.
#[derive(Debug, PartialEq, Eq)]
pub struct TimerTicket(u64);

impl TimerTicket {
    pub fn new(id: u64) -> Self {
        TimerTicket(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Whether the paired service may be started right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStartability {
    Startable,
    NotLoaded,
    AlreadyActive,
}

/// Dependency edges a socket unit asks the manager to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Before,
    After,
    Requires,
    Conflicts,
}

/// A paired-service state change, pre-digested by the manager for
/// [`crate::SocketUnit::trigger_notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceNotice {
    /// The service failed; `start_limit_hit` marks a permanent give-up.
    Failed { start_limit_hit: bool },
    /// The service is dead or on its way down.
    Stopped,
    /// The service reported running.
    Running,
}

/// The supervisor-side contracts a socket unit drives.
pub trait Manager {
    // --- event loop ---
    fn watch_pid(&mut self, unit: &UnitName, pid: Pid);
    fn unwatch_pid(&mut self, unit: &UnitName, pid: Pid);
    fn watch_fd(&mut self, unit: &UnitName, fd: RawFd) -> Result<FdWatch, ManagerError>;
    fn unwatch_fd(&mut self, unit: &UnitName, watch: FdWatch);
    fn arm_timer(&mut self, unit: &UnitName, after: Duration) -> TimerTicket;
    fn disarm_timer(&mut self, unit: &UnitName, ticket: TimerTicket);

    /// Invoked after every state change (spec: a state change is always
    /// followed by an active-state notification).
    fn notify_active_state(&mut self, unit: &UnitName, old: ActiveState, new: ActiveState);

    // --- processes ---
    /// The external child-execution primitive.
    fn spawn(
        &mut self,
        unit: &UnitName,
        command: &ExecCommand,
        context: &ExecContext,
    ) -> Result<Pid, ManagerError>;

    /// Apply a kill context to the unit's processes (the tracked control pid
    /// and, where the supervisor keeps one, the unit's resource container).
    /// `lethal` selects SIGKILL over the configured kill signal.
    /// [`crate::kill::apply`] is the plain-process reference implementation.
    fn kill_context(
        &mut self,
        unit: &UnitName,
        context: &KillContext,
        control_pid: Option<Pid>,
        lethal: bool,
    ) -> Result<KillOutcome, ManagerError>;

    // --- services and jobs ---
    fn load_service(&mut self, name: &UnitName) -> Result<ServiceRef, ManagerError>;

    /// Record `Before=` + `Triggers=` edges from `unit` to `service`.
    fn register_trigger(
        &mut self,
        unit: &UnitName,
        service: &ServiceRef,
    ) -> Result<(), ManagerError>;

    /// Give a minted per-connection instance its final name.
    fn add_service_alias(
        &mut self,
        service: &ServiceRef,
        name: &UnitName,
    ) -> Result<(), ManagerError>;

    fn service_startability(&self, service: &ServiceRef) -> ServiceStartability;

    /// Path of the service's start executable, for MAC label derivation.
    fn service_exec_path(&self, service: &ServiceRef) -> Option<PathBuf>;

    /// Transfer ownership of an accepted descriptor to the service. The
    /// manager owns the fd from this point even on failure (it closes it if
    /// the handoff cannot complete).
    fn set_service_socket_fd(
        &mut self,
        service: &ServiceRef,
        fd: OwnedFd,
        socket: &UnitName,
    ) -> Result<(), ManagerError>;

    /// Enqueue a start job for the service.
    fn enqueue_start(&mut self, service: &ServiceRef) -> Result<(), ManagerError>;

    // --- unit graph ---
    /// Whether a stop job is queued against this unit.
    fn stop_pending(&self, unit: &UnitName) -> bool;

    /// Whether any unit this one triggers is already active or queued to
    /// start.
    fn trigger_active_or_pending(&self, unit: &UnitName) -> bool;

    fn add_dependency(
        &mut self,
        unit: &UnitName,
        kind: DependencyKind,
        target: &UnitName,
    ) -> Result<(), ManagerError>;

    fn require_mounts_for(&mut self, unit: &UnitName, path: &Path) -> Result<(), ManagerError>;

    fn add_node_link(&mut self, unit: &UnitName, path: &Path) -> Result<(), ManagerError>;

    /// True when the supervisor runs as the system instance (adds sysinit
    /// ordering).
    fn system_mode(&self) -> bool;
}
