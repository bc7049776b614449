// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The socket unit: a supervisor of listen endpoints, helper children and
//! timers that triggers a paired service when traffic arrives.
//!
//! Every resource edge — which descriptors are open, which are watched,
//! whether the control child and the state timeout are tracked — is owned by
//! [`SocketUnit::set_state`]; transitions are the only place those change.

mod chown;
mod events;
mod serialize;
mod transitions;
mod verify;

#[cfg(test)]
mod test_helpers;

pub use events::FdEventKind;
pub use verify::VerifyError;

use crate::mac::{MacPolicy, NullMacPolicy};
use crate::manager::{Manager, ManagerError, ServiceRef, TimerTicket};
use crate::port::{PortKind, Ports};
use nix::unistd::Pid;
use sockd_core::{
    ActiveState, Clock, CommandId, ExecCommand, SocketConfig, SocketResult, SocketState, UnitName,
};
use std::os::fd::RawFd;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnitError {
    /// A stop sequence is still running; retry once it completes.
    #[error("operation already in progress, retry later")]
    Again,

    #[error("paired service {0} is not loaded")]
    ServiceNotLoaded(UnitName),

    #[error("paired service {0} is already active")]
    ServiceActive(UnitName),

    #[error("request not valid in state {0}")]
    BadState(SocketState),

    /// Deserialized state claims a control step but carried no control pid.
    #[error("deserialized state requires a control process")]
    MissingControlPid,

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// How a start/stop job for this unit ended, for the supervisor's job layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    Failed,
    Dependency,
    Timeout,
}

/// Job completion messages, `%s` being the unit description.
pub fn start_job_message(outcome: JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Done => "Listening on %s.",
        JobOutcome::Failed => "Failed to listen on %s.",
        JobOutcome::Dependency => "Dependency failed for %s.",
        JobOutcome::Timeout => "Timed out starting %s.",
    }
}

pub fn stop_job_message(outcome: JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Done => "Closed %s.",
        JobOutcome::Failed => "Failed stopping %s.",
        JobOutcome::Dependency => "Failed stopping %s.",
        JobOutcome::Timeout => "Timed out stopping %s.",
    }
}

/// Cursor into the configured command list of the running control step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ControlCursor {
    id: CommandId,
    index: usize,
}

#[derive(Debug)]
struct ArmedTimer {
    ticket: TimerTicket,
    deadline: Instant,
}

/// One socket unit.
pub struct SocketUnit<M: Manager, C: Clock> {
    id: UnitName,
    config: SocketConfig,
    manager: M,
    clock: C,
    mac: Box<dyn MacPolicy>,

    ports: Ports,
    state: SocketState,
    deserialized_state: Option<SocketState>,
    result: SocketResult,
    n_accepted: u32,
    n_connections: u32,
    control_pid: Option<Pid>,
    control_command: Option<ControlCursor>,
    timer: Option<ArmedTimer>,
    service: Option<ServiceRef>,
    explicit_service: bool,
}

impl<M: Manager, C: Clock> SocketUnit<M, C> {
    pub fn new(
        id: UnitName,
        config: SocketConfig,
        ports: Vec<PortKind>,
        manager: M,
        clock: C,
    ) -> Self {
        SocketUnit {
            id,
            config,
            manager,
            clock,
            mac: Box::new(NullMacPolicy),
            ports: Ports::new(ports),
            state: SocketState::Dead,
            deserialized_state: None,
            result: SocketResult::Success,
            n_accepted: 0,
            n_connections: 0,
            control_pid: None,
            control_command: None,
            timer: None,
            service: None,
            explicit_service: false,
        }
    }

    /// Install a MAC labelling backend (defaults to no labelling).
    pub fn with_mac_policy(mut self, mac: Box<dyn MacPolicy>) -> Self {
        self.mac = mac;
        self
    }

    /// Pair an explicitly configured service instead of the `.service`
    /// implied by the unit name. Rejected for accept-mode units at load.
    pub fn set_service(&mut self, service: ServiceRef) {
        self.service = Some(service);
        self.explicit_service = true;
    }

    // --- accessors ---

    pub fn id(&self) -> &UnitName {
        &self.id
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn active_state(&self) -> ActiveState {
        self.state.active_state()
    }

    pub fn sub_state(&self) -> &'static str {
        self.state.name()
    }

    pub fn result(&self) -> SocketResult {
        self.result
    }

    pub fn n_accepted(&self) -> u32 {
        self.n_accepted
    }

    pub fn n_connections(&self) -> u32 {
        self.n_connections
    }

    pub fn control_pid(&self) -> Option<Pid> {
        self.control_pid
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut M {
        &mut self.manager
    }

    // --- requests from the supervisor ---

    /// Begin the start path. Fails with [`UnitError::Again`] while a stop
    /// sequence is still draining; is a no-op when already starting.
    pub fn start(&mut self) -> Result<(), UnitError> {
        if self.state.is_stopping() {
            return Err(UnitError::Again);
        }
        if self.state.is_starting() {
            return Ok(());
        }

        // cannot run without the paired service being startable
        if let Some(service) = &self.service {
            match self.manager.service_startability(service) {
                crate::manager::ServiceStartability::NotLoaded => {
                    return Err(UnitError::ServiceNotLoaded(service.name().clone()));
                }
                crate::manager::ServiceStartability::AlreadyActive => {
                    return Err(UnitError::ServiceActive(service.name().clone()));
                }
                crate::manager::ServiceStartability::Startable => {}
            }
        }

        if !matches!(self.state, SocketState::Dead | SocketState::Failed) {
            return Err(UnitError::BadState(self.state));
        }

        self.result = SocketResult::Success;
        self.enter_start_pre();
        Ok(())
    }

    /// Begin the stop path. Preempts an in-flight start by jumping straight
    /// to the stop-pre kill stage.
    pub fn stop(&mut self) -> Result<(), UnitError> {
        if self.state.is_stopping() {
            return Ok(());
        }

        if self.state.is_starting() {
            self.enter_signal(SocketState::StopPreSigterm, SocketResult::Success);
            return Err(UnitError::Again);
        }

        if matches!(self.state, SocketState::Dead | SocketState::Failed) {
            return Ok(());
        }

        self.enter_stop_pre(SocketResult::Success);
        Ok(())
    }

    /// Clear a terminal `Failed` state back to `Dead`.
    pub fn reset_failed(&mut self) {
        if self.state == SocketState::Failed {
            self.set_state(SocketState::Dead);
        }
        self.result = SocketResult::Success;
    }

    /// Deliver a signal to the control child, for the supervisor's kill verb.
    pub fn kill(&mut self, signal: nix::sys::signal::Signal) -> Result<(), UnitError> {
        if let Some(pid) = self.control_pid {
            nix::sys::signal::kill(pid, signal)
                .map_err(|e| ManagerError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
        }
        Ok(())
    }

    /// The unit must not be garbage-collected while accepted connections are
    /// still alive.
    pub fn check_gc(&self) -> bool {
        self.n_connections > 0
    }

    /// Deadline of the armed state timeout, if any.
    pub fn get_timeout(&self) -> Option<Instant> {
        self.timer.as_ref().map(|t| t.deadline)
    }

    /// Snapshot of all currently-open endpoint descriptors, in endpoint
    /// order. Called from the service side when it collects its fds.
    pub fn collect_fds(&self) -> Vec<RawFd> {
        self.ports.collect_fds()
    }

    /// One accepted connection's service died; its slot frees up.
    pub fn connection_unref(&mut self) {
        debug_assert!(self.n_connections >= 1);
        self.n_connections = self.n_connections.saturating_sub(1);
        tracing::debug!(
            unit = %self.id,
            left = self.n_connections,
            "one connection closed"
        );
    }

    // --- state bookkeeping ---

    /// The single place resource state changes: timers, control watches, fd
    /// watches and open descriptors all follow the target state here, and
    /// every change ends in an active-state notification.
    fn set_state(&mut self, state: SocketState) {
        let old = self.state;
        self.state = state;

        if state.is_transient() {
            self.arm_timer();
        } else {
            self.disarm_timer();
            self.unwatch_control();
            self.control_command = None;
        }

        if state != SocketState::Listening {
            self.ports.unwatch_all(&mut self.manager, &self.id);
        }

        if !state.keeps_fds_open() {
            self.ports.close_all(&mut self.manager, &self.id);
        }

        if state != old {
            tracing::debug!(unit = %self.id, "changed {old} -> {state}");
        }

        self.manager
            .notify_active_state(&self.id, old.active_state(), state.active_state());
    }

    fn arm_timer(&mut self) {
        self.disarm_timer();
        let ticket = self.manager.arm_timer(&self.id, self.config.timeout);
        let deadline = self.clock.now() + self.config.timeout;
        self.timer = Some(ArmedTimer { ticket, deadline });
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.manager.disarm_timer(&self.id, timer.ticket);
        }
    }

    fn unwatch_control(&mut self) {
        if let Some(pid) = self.control_pid.take() {
            self.manager.unwatch_pid(&self.id, pid);
        }
    }

    fn latch_result(&mut self, result: SocketResult) {
        // first failing result wins
        if result != SocketResult::Success && self.result == SocketResult::Success {
            self.result = result;
        }
    }

    fn current_command(&self) -> Option<&ExecCommand> {
        let cursor = self.control_command?;
        self.config.commands.commands(cursor.id).get(cursor.index)
    }

    /// Load the per-connection service template instance (accept mode) if no
    /// service is currently referenced. A no-op otherwise.
    fn ensure_service(&mut self) -> Result<(), ManagerError> {
        if self.service.is_some() {
            return Ok(());
        }
        debug_assert!(self.config.accept);
        let name = UnitName::service_instance(self.id.prefix(), &self.n_accepted.to_string());
        let service = self.manager.load_service(&name)?;
        self.manager.register_trigger(&self.id, &service)?;
        self.service = Some(service);
        Ok(())
    }

    // --- property dump ---

    /// Write the property dump, stable field order.
    pub fn dump(&self, out: &mut dyn std::fmt::Write, prefix: &str) -> std::fmt::Result {
        let c = &self.config;
        writeln!(out, "{prefix}Socket State: {}", self.state)?;
        writeln!(out, "{prefix}Result: {}", self.result)?;
        writeln!(out, "{prefix}BindIPv6Only: {}", c.bind_ipv6_only)?;
        match c.backlog {
            Some(n) => writeln!(out, "{prefix}Backlog: {n}")?,
            None => writeln!(out, "{prefix}Backlog: os-default")?,
        }
        writeln!(out, "{prefix}SocketMode: {:04o}", c.socket_mode)?;
        writeln!(out, "{prefix}DirectoryMode: {:04o}", c.directory_mode)?;
        writeln!(out, "{prefix}KeepAlive: {}", yes_no(c.keep_alive))?;
        writeln!(out, "{prefix}FreeBind: {}", yes_no(c.free_bind))?;
        writeln!(out, "{prefix}Transparent: {}", yes_no(c.transparent))?;
        writeln!(out, "{prefix}Broadcast: {}", yes_no(c.broadcast))?;
        writeln!(out, "{prefix}PassCredentials: {}", yes_no(c.pass_credentials))?;
        writeln!(out, "{prefix}PassSecurity: {}", yes_no(c.pass_security))?;
        writeln!(out, "{prefix}TCPCongestion: {}", c.tcp_congestion.as_deref().unwrap_or("n/a"))?;

        if let Some(pid) = self.control_pid {
            writeln!(out, "{prefix}Control PID: {pid}")?;
        }
        if let Some(device) = &c.bind_to_device {
            writeln!(out, "{prefix}BindToDevice: {device}")?;
        }
        if c.accept {
            writeln!(out, "{prefix}Accepted: {}", self.n_accepted)?;
            writeln!(out, "{prefix}NConnections: {}", self.n_connections)?;
            writeln!(out, "{prefix}MaxConnections: {}", c.max_connections)?;
        }
        if let Some(priority) = c.priority {
            writeln!(out, "{prefix}Priority: {priority}")?;
        }
        if let Some(size) = c.receive_buffer {
            writeln!(out, "{prefix}ReceiveBuffer: {size}")?;
        }
        if let Some(size) = c.send_buffer {
            writeln!(out, "{prefix}SendBuffer: {size}")?;
        }
        if let Some(tos) = c.ip_tos {
            writeln!(out, "{prefix}IPTOS: {tos}")?;
        }
        if let Some(ttl) = c.ip_ttl {
            writeln!(out, "{prefix}IPTTL: {ttl}")?;
        }
        if let Some(size) = c.pipe_size {
            writeln!(out, "{prefix}PipeSize: {size}")?;
        }
        if let Some(mark) = c.mark {
            writeln!(out, "{prefix}Mark: {mark}")?;
        }
        if let Some(maxmsg) = c.mq_maxmsg {
            writeln!(out, "{prefix}MessageQueueMaxMessages: {maxmsg}")?;
        }
        if let Some(msgsize) = c.mq_msgsize {
            writeln!(out, "{prefix}MessageQueueMessageSize: {msgsize}")?;
        }
        if c.reuse_port {
            writeln!(out, "{prefix}ReusePort: yes")?;
        }
        if let Some(label) = &c.mac_label {
            writeln!(out, "{prefix}MACLabel: {label}")?;
        }
        if let Some(label) = &c.mac_label_ip_in {
            writeln!(out, "{prefix}MACLabelIPIn: {label}")?;
        }
        if let Some(label) = &c.mac_label_ip_out {
            writeln!(out, "{prefix}MACLabelIPOut: {label}")?;
        }
        if c.owner_user.is_some() || c.owner_group.is_some() {
            writeln!(out, "{prefix}OwnerUser: {}", c.owner_user.as_deref().unwrap_or("n/a"))?;
            writeln!(out, "{prefix}OwnerGroup: {}", c.owner_group.as_deref().unwrap_or("n/a"))?;
        }

        for port in self.ports.iter() {
            writeln!(out, "{prefix}{}: {}", port.kind().dump_tag(), port.kind().print())?;
        }

        Ok(())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
