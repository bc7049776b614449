// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket unit lifecycle states, results, and the active-state projection.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a socket unit.
///
/// `Running` is only reachable in non-accepting mode, where a single service
/// is shared across all traffic; accepting sockets stay in `Listening` while
/// per-connection instances come and go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocketState {
    Dead,
    StartPre,
    StartChown,
    StartPost,
    Listening,
    Running,
    StopPre,
    StopPreSigterm,
    StopPreSigkill,
    StopPost,
    FinalSigterm,
    FinalSigkill,
    Failed,
}

crate::string_enum! {
    SocketState {
        Dead => "dead",
        StartPre => "start-pre",
        StartChown => "start-chown",
        StartPost => "start-post",
        Listening => "listening",
        Running => "running",
        StopPre => "stop-pre",
        StopPreSigterm => "stop-pre-sigterm",
        StopPreSigkill => "stop-pre-sigkill",
        StopPost => "stop-post",
        FinalSigterm => "final-sigterm",
        FinalSigkill => "final-sigkill",
        Failed => "failed",
    }
}

impl SocketState {
    /// Projection shown to the surrounding supervisor.
    pub fn active_state(self) -> ActiveState {
        match self {
            SocketState::Dead => ActiveState::Inactive,
            SocketState::StartPre | SocketState::StartChown | SocketState::StartPost => {
                ActiveState::Activating
            }
            SocketState::Listening | SocketState::Running => ActiveState::Active,
            SocketState::StopPre
            | SocketState::StopPreSigterm
            | SocketState::StopPreSigkill
            | SocketState::StopPost
            | SocketState::FinalSigterm
            | SocketState::FinalSigkill => ActiveState::Deactivating,
            SocketState::Failed => ActiveState::Failed,
        }
    }

    /// States driven by a control step: a helper child may be running and the
    /// state timeout is armed. Everything else is quiescent.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            SocketState::StartPre
                | SocketState::StartChown
                | SocketState::StartPost
                | SocketState::StopPre
                | SocketState::StopPreSigterm
                | SocketState::StopPreSigkill
                | SocketState::StopPost
                | SocketState::FinalSigterm
                | SocketState::FinalSigkill
        )
    }

    /// States in which the endpoints hold open file descriptors.
    ///
    /// Descriptors survive into the stop-pre signal states so the unit can
    /// still drain or abort cleanly; they are gone by `StopPost`.
    pub fn keeps_fds_open(self) -> bool {
        matches!(
            self,
            SocketState::StartChown
                | SocketState::StartPost
                | SocketState::Listening
                | SocketState::Running
                | SocketState::StopPre
                | SocketState::StopPreSigterm
                | SocketState::StopPreSigkill
        )
    }

    /// The start path, before the unit reaches `Listening`.
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            SocketState::StartPre | SocketState::StartChown | SocketState::StartPost
        )
    }

    /// Any state on the stop path.
    pub fn is_stopping(self) -> bool {
        matches!(
            self,
            SocketState::StopPre
                | SocketState::StopPreSigterm
                | SocketState::StopPreSigkill
                | SocketState::StopPost
                | SocketState::FinalSigterm
                | SocketState::FinalSigkill
        )
    }
}

/// Unit activity as seen by the surrounding supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveState {
    Inactive,
    Activating,
    Active,
    Deactivating,
    Failed,
}

crate::string_enum! {
    ActiveState {
        Inactive => "inactive",
        Activating => "activating",
        Active => "active",
        Deactivating => "deactivating",
        Failed => "failed",
    }
}

/// Terminal disposition of a unit run.
///
/// The first non-`Success` result latches; later failures do not overwrite it
/// and later successes never clear it short of an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocketResult {
    Success,
    FailureResources,
    FailureTimeout,
    FailureExitCode,
    FailureSignal,
    FailureCoreDump,
    FailureServicePermanent,
}

crate::string_enum! {
    SocketResult {
        Success => "success",
        FailureResources => "resources",
        FailureTimeout => "timeout",
        FailureExitCode => "exit-code",
        FailureSignal => "signal",
        FailureCoreDump => "core-dump",
        FailureServicePermanent => "service-failed-permanent",
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
