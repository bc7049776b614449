// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event entry points: readable listen fds, SIGCHLD for the control child,
//! timer fires, and paired-service state notifications. All are invoked from
//! the supervisor's event loop; none of them block.

use super::SocketUnit;
use crate::manager::{Manager, ManagerError, ServiceNotice};
use crate::port;
use nix::errno::Errno;
use nix::sys::socket::{accept4, SockFlag};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use sockd_core::{instance_name, Clock, SocketResult, SocketState, UnitName};
use std::os::fd::{AsFd, FromRawFd, OwnedFd, RawFd};

/// What the event loop observed on a watched descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdEventKind {
    Readable,
    /// Hangup, error, or any readiness we did not ask for.
    Error,
}

impl<M: Manager, C: Clock> SocketUnit<M, C> {
    /// A watched listen descriptor became ready. Only observable in
    /// `Listening`; anything else is a stale event and ignored.
    pub fn fd_event(&mut self, fd: RawFd, kind: FdEventKind) {
        if self.state != SocketState::Listening {
            return;
        }

        tracing::debug!(unit = %self.id, "incoming traffic");

        if kind != FdEventKind::Readable {
            tracing::error!(unit = %self.id, "unexpected poll event on listen socket");
            self.enter_stop_pre(SocketResult::FailureResources);
            return;
        }

        let accepting =
            self.config.accept && self.ports.by_fd(fd).is_some_and(|p| p.kind().can_accept());
        if !accepting {
            self.enter_running(None);
            return;
        }

        // one accept per readable event
        let connection = loop {
            match accept4(fd, SockFlag::SOCK_NONBLOCK) {
                Ok(cfd) => break unsafe { OwnedFd::from_raw_fd(cfd) },
                Err(Errno::EINTR) => continue,
                Err(Errno::ECONNABORTED) | Err(Errno::EAGAIN) | Err(Errno::ENOTCONN) => {
                    // the connection died between readiness and accept
                    return;
                }
                Err(e) => {
                    tracing::error!(unit = %self.id, error = %e, "failed to accept socket");
                    self.enter_stop_pre(SocketResult::FailureResources);
                    return;
                }
            }
        };

        port::options_for_accepted(&self.id, &self.config, connection.as_fd());
        self.enter_running(Some(connection));
    }

    /// Activation: either schedule the single shared service (non-accepting)
    /// or mint a per-connection instance and hand the descriptor off.
    pub(super) fn enter_running(&mut self, connection: Option<OwnedFd>) {
        // we don't take connections anymore if we are supposed to shut down
        if self.manager.stop_pending(&self.id) {
            tracing::debug!(unit = %self.id, "suppressing connection request, stop is scheduled");
            match connection {
                Some(fd) => drop(fd),
                None => self.flush_ports(),
            }
            return;
        }

        let Some(connection) = connection else {
            if !self.manager.trigger_active_or_pending(&self.id) {
                let Some(service) = self.service.clone() else {
                    tracing::error!(unit = %self.id, "service to activate vanished");
                    self.enter_stop_pre(SocketResult::FailureResources);
                    return;
                };
                if let Err(e) = self.manager.enqueue_start(&service) {
                    tracing::warn!(unit = %self.id, error = %e, "failed to queue service startup job");
                    self.enter_stop_pre(SocketResult::FailureResources);
                    return;
                }
            }
            self.set_state(SocketState::Running);
            return;
        };

        if self.n_connections >= self.config.max_connections {
            tracing::warn!(
                unit = %self.id,
                connections = self.n_connections,
                "too many incoming connections, refusing"
            );
            drop(connection);
            return;
        }

        match self.accept_connection(connection) {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(
                    unit = %self.id,
                    error = %e,
                    "failed to queue service startup job (is the template unit missing?)"
                );
                self.enter_stop_pre(SocketResult::FailureResources);
            }
        }
    }

    /// Mint the instance, transfer the descriptor, enqueue the start job.
    /// `n_connections` moves iff the handoff happened; a dead peer
    /// (`ENOTCONN`) discards the connection with no counter change.
    fn accept_connection(&mut self, connection: OwnedFd) -> Result<(), ManagerError> {
        self.ensure_service()?;

        let peer = match port::query_peer(connection.as_fd()) {
            Ok(peer) => peer,
            Err(Errno::ENOTCONN) => {
                // TCP RST between accept and here; the unit lives on
                return Ok(());
            }
            Err(e) => {
                return Err(ManagerError::Io(std::io::Error::from_raw_os_error(e as i32)));
            }
        };

        let instance = instance_name(self.n_accepted, &peer);
        let name = UnitName::service_instance(self.id.prefix(), &instance);

        // the reference is dropped on minting so the next connection gets a
        // fresh service object
        let Some(service) = self.service.take() else {
            return Err(ManagerError::Refused("service reference vanished".into()));
        };

        self.manager.add_service_alias(&service, &name)?;
        self.n_accepted += 1;

        self.manager.set_service_socket_fd(&service, connection, &self.id)?;
        self.n_connections += 1;

        self.manager.enqueue_start(&service)?;
        Ok(())
    }

    /// Drain pending traffic by closing and reopening every endpoint.
    fn flush_ports(&mut self) {
        self.ports.close_all(&mut self.manager, &self.id);
        if self.open_ports().is_err() {
            self.enter_stop_pre(SocketResult::FailureResources);
            return;
        }
        if self.ports.watch_all(&mut self.manager, &self.id).is_err() {
            tracing::warn!(unit = %self.id, "failed to watch sockets");
            self.enter_stop_pre(SocketResult::FailureResources);
        }
    }

    /// The control child exited. Classify the exit, advance to the next
    /// queued command, or pick the follow-up state.
    pub fn sigchld_event(&mut self, pid: Pid, status: WaitStatus) {
        if self.control_pid != Some(pid) {
            return;
        }
        self.control_pid = None;
        self.manager.unwatch_pid(&self.id, pid);

        use nix::sys::signal::Signal;
        let mut result = match status {
            WaitStatus::Exited(_, 0) => SocketResult::Success,
            WaitStatus::Exited(_, code) => {
                if self.state == SocketState::StartChown {
                    if let Some(step) = super::chown::describe_exit(code) {
                        tracing::error!(unit = %self.id, step, "socket ownership helper failed");
                    }
                }
                SocketResult::FailureExitCode
            }
            WaitStatus::Signaled(_, _, true) => SocketResult::FailureCoreDump,
            // a daemon not handling these is not an unclean shutdown
            WaitStatus::Signaled(
                _,
                Signal::SIGHUP | Signal::SIGINT | Signal::SIGTERM | Signal::SIGPIPE,
                _,
            ) => SocketResult::Success,
            WaitStatus::Signaled(_, _, _) => SocketResult::FailureSignal,
            _ => return,
        };

        if self.current_command().is_some_and(|c| c.ignore_failure) {
            result = SocketResult::Success;
        }

        tracing::debug!(
            unit = %self.id,
            state = %self.state,
            ?status,
            "control process exited"
        );

        self.latch_result(result);

        let has_next = self
            .control_command
            .is_some_and(|cursor| {
                self.config.commands.commands(cursor.id).len() > cursor.index + 1
            });
        if result == SocketResult::Success && has_next {
            self.run_next();
            return;
        }

        // no further commands for this step; figure out what is next
        self.control_command = None;

        match self.state {
            SocketState::StartPre => {
                if result == SocketResult::Success {
                    self.enter_start_chown();
                } else {
                    self.enter_signal(SocketState::FinalSigterm, result);
                }
            }
            SocketState::StartChown => {
                if result == SocketResult::Success {
                    self.enter_start_post();
                } else {
                    self.enter_stop_pre(result);
                }
            }
            SocketState::StartPost => {
                if result == SocketResult::Success {
                    self.enter_listening();
                } else {
                    self.enter_stop_pre(result);
                }
            }
            SocketState::StopPre
            | SocketState::StopPreSigterm
            | SocketState::StopPreSigkill => self.enter_stop_post(result),
            SocketState::StopPost | SocketState::FinalSigterm | SocketState::FinalSigkill => {
                self.enter_dead(result)
            }
            state => {
                tracing::warn!(unit = %self.id, %state, "control process died at wrong time");
            }
        }
    }

    /// The state timeout fired. The machine always advances; no state loops.
    pub fn timer_event(&mut self) {
        // the firing consumed the armed timer
        self.timer = None;

        match self.state {
            SocketState::StartPre => {
                tracing::warn!(unit = %self.id, "starting timed out, terminating");
                self.enter_signal(SocketState::FinalSigterm, SocketResult::FailureTimeout);
            }
            SocketState::StartChown | SocketState::StartPost => {
                tracing::warn!(unit = %self.id, "starting timed out, stopping");
                self.enter_stop_pre(SocketResult::FailureTimeout);
            }
            SocketState::StopPre => {
                tracing::warn!(unit = %self.id, "stopping timed out, terminating");
                self.enter_signal(SocketState::StopPreSigterm, SocketResult::FailureTimeout);
            }
            SocketState::StopPreSigterm => {
                if self.config.kill_context.send_sigkill {
                    tracing::warn!(unit = %self.id, "stopping timed out, killing");
                    self.enter_signal(SocketState::StopPreSigkill, SocketResult::FailureTimeout);
                } else {
                    tracing::warn!(unit = %self.id, "stopping timed out, skipping SIGKILL");
                    self.enter_stop_post(SocketResult::FailureTimeout);
                }
            }
            SocketState::StopPreSigkill => {
                tracing::warn!(unit = %self.id, "still around after SIGKILL, ignoring");
                self.enter_stop_post(SocketResult::FailureTimeout);
            }
            SocketState::StopPost => {
                tracing::warn!(unit = %self.id, "stopping timed out (2), terminating");
                self.enter_signal(SocketState::FinalSigterm, SocketResult::FailureTimeout);
            }
            SocketState::FinalSigterm => {
                if self.config.kill_context.send_sigkill {
                    tracing::warn!(unit = %self.id, "stopping timed out (2), killing");
                    self.enter_signal(SocketState::FinalSigkill, SocketResult::FailureTimeout);
                } else {
                    tracing::warn!(unit = %self.id, "stopping timed out (2), skipping SIGKILL");
                    self.enter_dead(SocketResult::FailureTimeout);
                }
            }
            SocketState::FinalSigkill => {
                tracing::warn!(unit = %self.id, "still around after SIGKILL (2), entering failed mode");
                self.enter_dead(SocketResult::FailureTimeout);
            }
            state => {
                tracing::warn!(unit = %self.id, %state, "timeout at wrong time");
            }
        }
    }

    /// The paired service changed state. Only meaningful for non-accepting
    /// units that are currently up.
    pub fn trigger_notify(&mut self, notice: ServiceNotice) {
        if self.config.accept
            || !matches!(self.state, SocketState::Listening | SocketState::Running)
        {
            return;
        }

        match notice {
            ServiceNotice::Failed { start_limit_hit } => {
                self.notify_service_dead(start_limit_hit);
            }
            ServiceNotice::Stopped => self.notify_service_dead(false),
            ServiceNotice::Running => self.set_state(SocketState::Running),
        }
    }

    /// The shared service died. Go back to listening, unless it gave up
    /// permanently — then take the socket down with it.
    pub fn notify_service_dead(&mut self, failed_permanent: bool) {
        if self.state != SocketState::Running {
            return;
        }
        tracing::debug!(
            unit = %self.id,
            failed_permanent,
            "got notified about service death"
        );
        if failed_permanent {
            self.enter_stop_pre(SocketResult::FailureServicePermanent);
        } else {
            self.enter_listening();
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
