// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-step commands: the per-phase argv lists a socket unit runs in
//! helper children, plus the execution context handed to the spawn primitive.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifies which control step a command (or the running control child)
/// belongs to. `StartChown` is synthetic: it never carries user-supplied
/// commands, only the internal ownership helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandId {
    StartPre,
    StartChown,
    StartPost,
    StopPre,
    StopPost,
}

crate::string_enum! {
    CommandId {
        StartPre => "StartPre",
        StartChown => "StartChown",
        StartPost => "StartPost",
        StopPre => "StopPre",
        StopPost => "StopPost",
    }
}

impl CommandId {
    pub const ALL: [CommandId; 5] = [
        CommandId::StartPre,
        CommandId::StartChown,
        CommandId::StartPost,
        CommandId::StopPre,
        CommandId::StopPost,
    ];

    fn slot(self) -> usize {
        match self {
            CommandId::StartPre => 0,
            CommandId::StartChown => 1,
            CommandId::StartPost => 2,
            CommandId::StopPre => 3,
            CommandId::StopPost => 4,
        }
    }
}

/// One executable command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommand {
    pub path: PathBuf,
    pub argv: Vec<String>,
    /// A nonzero exit from this command does not fail the step.
    #[serde(default)]
    pub ignore_failure: bool,
}

impl ExecCommand {
    pub fn new(path: impl Into<PathBuf>, argv: Vec<String>) -> Self {
        ExecCommand { path: path.into(), argv, ignore_failure: false }
    }

    pub fn ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }
}

/// Execution environment for control children, a narrow slice of the
/// supervisor-wide exec context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecContext {
    pub environment: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
    pub pam_name: Option<String>,
}

/// Ordered command lists per control step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSet {
    slots: [Vec<ExecCommand>; 5],
}

impl CommandSet {
    pub fn commands(&self, id: CommandId) -> &[ExecCommand] {
        &self.slots[id.slot()]
    }

    pub fn push(&mut self, id: CommandId, command: ExecCommand) {
        self.slots[id.slot()].push(command);
    }

    pub fn with(mut self, id: CommandId, command: ExecCommand) -> Self {
        self.push(id, command);
        self
    }

    /// Whether any step has user-supplied commands at all.
    pub fn any(&self) -> bool {
        self.slots.iter().any(|list| !list.is_empty())
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
