// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stop-path signalling.
//!
//! Applies a [`KillContext`] to whatever the unit still tracks. Resource
//! containers are the supervisor's business; with the control pid as the only
//! tracked process, `control-group` and `process` modes behave alike here.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sockd_core::{KillContext, KillMode};

/// What a kill pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KillOutcome {
    /// Nothing left to signal; the stage can be skipped.
    #[default]
    NoProcesses,
    /// At least one process was signalled; wait for it to die.
    ProcessesSignalled,
}

/// Signal the tracked control process per `context`. `lethal` selects SIGKILL
/// over the configured kill signal (the `*Sigkill` stages).
///
/// This is the plain-process reference implementation of
/// [`crate::manager::Manager::kill_context`] for supervisors without a
/// resource-container backend.
pub fn apply(
    context: &KillContext,
    control_pid: Option<Pid>,
    lethal: bool,
) -> Result<KillOutcome, Errno> {
    if context.kill_mode == KillMode::None {
        return Ok(KillOutcome::NoProcesses);
    }

    let signal = if lethal {
        Signal::SIGKILL
    } else {
        Signal::try_from(context.kill_signal).unwrap_or(Signal::SIGTERM)
    };

    match control_pid {
        Some(pid) => match kill(pid, signal) {
            Ok(()) => Ok(KillOutcome::ProcessesSignalled),
            // already gone
            Err(Errno::ESRCH) => Ok(KillOutcome::NoProcesses),
            Err(e) => Err(e),
        },
        None => Ok(KillOutcome::NoProcesses),
    }
}

#[cfg(test)]
#[path = "kill_tests.rs"]
mod tests;
