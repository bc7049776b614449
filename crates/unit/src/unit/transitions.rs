// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `enter_*` transition family. Each function latches the incoming
//! result, performs the step's work, and either settles in the new state or
//! falls through toward `Dead` — a stop sequence always reaches a terminal
//! state even when individual steps fail.

use super::{chown as chown_helper, ControlCursor, SocketUnit};
use crate::kill::KillOutcome;
use crate::manager::Manager;
use crate::port::OpenError;
use sockd_core::{Clock, CommandId, SocketResult, SocketState};

impl<M: Manager, C: Clock> SocketUnit<M, C> {
    pub(super) fn enter_dead(&mut self, result: SocketResult) {
        self.latch_result(result);
        self.set_state(if self.result != SocketResult::Success {
            SocketState::Failed
        } else {
            SocketState::Dead
        });
    }

    pub(super) fn enter_stop_post(&mut self, result: SocketResult) {
        self.latch_result(result);
        match self.begin_control_step(CommandId::StopPost) {
            Ok(true) => self.set_state(SocketState::StopPost),
            Ok(false) => self.enter_signal(SocketState::FinalSigterm, SocketResult::Success),
            Err(()) => {
                self.enter_signal(SocketState::FinalSigterm, SocketResult::FailureResources)
            }
        }
    }

    /// Kill whatever is left, then wait in `state` — or skip ahead when
    /// nothing was signalled.
    pub(super) fn enter_signal(&mut self, state: SocketState, result: SocketResult) {
        self.latch_result(result);

        let lethal =
            matches!(state, SocketState::StopPreSigkill | SocketState::FinalSigkill);
        let outcome = self.manager.kill_context(
            &self.id,
            &self.config.kill_context,
            self.control_pid,
            lethal,
        );
        match outcome {
            Ok(KillOutcome::ProcessesSignalled) => self.set_state(state),
            Ok(KillOutcome::NoProcesses) => {
                if matches!(state, SocketState::StopPreSigterm | SocketState::StopPreSigkill) {
                    self.enter_stop_post(SocketResult::Success);
                } else {
                    self.enter_dead(SocketResult::Success);
                }
            }
            Err(e) => {
                tracing::warn!(unit = %self.id, error = %e, "failed to kill processes");
                if matches!(state, SocketState::StopPreSigterm | SocketState::StopPreSigkill) {
                    self.enter_stop_post(SocketResult::FailureResources);
                } else {
                    self.enter_dead(SocketResult::FailureResources);
                }
            }
        }
    }

    pub(super) fn enter_stop_pre(&mut self, result: SocketResult) {
        self.latch_result(result);
        match self.begin_control_step(CommandId::StopPre) {
            Ok(true) => self.set_state(SocketState::StopPre),
            Ok(false) => self.enter_stop_post(SocketResult::Success),
            Err(()) => self.enter_stop_post(SocketResult::FailureResources),
        }
    }

    pub(super) fn enter_listening(&mut self) {
        if let Err(e) = self.ports.watch_all(&mut self.manager, &self.id) {
            tracing::warn!(unit = %self.id, error = %e, "failed to watch sockets");
            self.enter_stop_pre(SocketResult::FailureResources);
            return;
        }
        self.set_state(SocketState::Listening);
    }

    pub(super) fn enter_start_post(&mut self) {
        match self.begin_control_step(CommandId::StartPost) {
            Ok(true) => self.set_state(SocketState::StartPost),
            Ok(false) => self.enter_listening(),
            Err(()) => self.enter_stop_pre(SocketResult::FailureResources),
        }
    }

    pub(super) fn enter_start_chown(&mut self) {
        if let Err(e) = self.open_ports() {
            tracing::warn!(unit = %self.id, error = %e, "failed to listen on sockets");
            self.enter_stop_pre(SocketResult::FailureResources);
            return;
        }

        if !self.config.wants_ownership_fixup() {
            self.enter_start_post();
            return;
        }

        self.unwatch_control();
        self.control_command = Some(ControlCursor { id: CommandId::StartChown, index: 0 });

        let paths = self
            .ports
            .iter()
            .filter_map(|p| p.kind().chown_path().map(|path| path.to_path_buf()))
            .collect();
        match chown_helper::spawn(
            self.config.owner_user.clone(),
            self.config.owner_group.clone(),
            paths,
        ) {
            Ok(pid) => {
                self.manager.watch_pid(&self.id, pid);
                self.control_pid = Some(pid);
                self.set_state(SocketState::StartChown);
            }
            Err(e) => {
                tracing::warn!(unit = %self.id, error = %e, "failed to fork 'start-chown' task");
                self.enter_stop_pre(SocketResult::FailureResources);
            }
        }
    }

    pub(super) fn enter_start_pre(&mut self) {
        match self.begin_control_step(CommandId::StartPre) {
            Ok(true) => self.set_state(SocketState::StartPre),
            Ok(false) => self.enter_start_chown(),
            Err(()) => self.enter_dead(SocketResult::FailureResources),
        }
    }

    /// The current command exited cleanly and another one is queued behind
    /// it: spawn the next command without leaving the state.
    pub(super) fn run_next(&mut self) {
        self.unwatch_control();
        let Some(cursor) = self.control_command.as_mut() else {
            return;
        };
        cursor.index += 1;

        if self.spawn_current().is_ok() {
            return;
        }

        tracing::warn!(unit = %self.id, "failed to run next task");
        match self.state {
            SocketState::StartPost => self.enter_stop_pre(SocketResult::FailureResources),
            SocketState::StopPost => self.enter_dead(SocketResult::FailureResources),
            _ => self.enter_signal(SocketState::FinalSigterm, SocketResult::FailureResources),
        }
    }

    /// Point the control cursor at `id` and spawn its first command.
    /// `Ok(true)` means a child is running, `Ok(false)` that the step has no
    /// commands, `Err` that the spawn failed (already logged).
    fn begin_control_step(&mut self, id: CommandId) -> Result<bool, ()> {
        self.unwatch_control();
        self.control_command = Some(ControlCursor { id, index: 0 });

        if self.config.commands.commands(id).is_empty() {
            self.control_command = None;
            return Ok(false);
        }

        match self.spawn_current() {
            Ok(()) => Ok(true),
            Err(()) => Err(()),
        }
    }

    /// Spawn the command under the cursor and track it as the control child.
    fn spawn_current(&mut self) -> Result<(), ()> {
        let Some(command) = self.current_command().cloned() else {
            return Err(());
        };
        let Some(cursor) = self.control_command else {
            return Err(());
        };
        match self.manager.spawn(&self.id, &command, &self.config.exec_context) {
            Ok(pid) => {
                self.manager.watch_pid(&self.id, pid);
                self.control_pid = Some(pid);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    unit = %self.id,
                    step = %cursor.id,
                    error = %e,
                    "failed to run control task"
                );
                Err(())
            }
        }
    }

    /// Open every endpoint, resolving the socket-creation label from the
    /// paired service's executable the first time a socket endpoint needs it.
    pub(super) fn open_ports(&mut self) -> Result<(), OpenError> {
        let needs_socket = self
            .ports
            .iter()
            .any(|p| !p.is_open() && matches!(p.kind(), crate::port::PortKind::Socket { .. }));

        let mut label = None;
        if needs_socket {
            if self.config.accept {
                self.ensure_service()
                    .map_err(|e| OpenError::Io(std::io::Error::other(e.to_string())))?;
            }
            label = self
                .service
                .as_ref()
                .and_then(|service| self.manager.service_exec_path(service))
                .and_then(|exe| self.mac.create_label_for_exe(&exe));
        }

        self.ports
            .open_all(&self.id, &self.config, self.mac.as_ref(), label.as_deref())
    }
}

#[cfg(test)]
#[path = "transitions_tests.rs"]
mod tests;
