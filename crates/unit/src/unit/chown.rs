// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ownership-fixup helper child.
//!
//! User and group names resolve in the child, never in the parent: name
//! service lookups can block, and the parent must not. The child exits with a
//! tagged status so the parent can log which step failed.

use nix::unistd::{chown, fork, ForkResult, Gid, Group, Pid, Uid, User};
use std::path::PathBuf;

pub(super) const EXIT_GROUP_LOOKUP: i32 = 216;
pub(super) const EXIT_USER_LOOKUP: i32 = 217;
pub(super) const EXIT_CHOWN: i32 = 235;

/// Fork the helper. The child resolves credentials, chowns every
/// path-bearing endpoint, and exits with 0 or a tagged status.
pub(super) fn spawn(
    user: Option<String>,
    group: Option<String>,
    paths: Vec<PathBuf>,
) -> Result<Pid, nix::Error> {
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            let code = fixup_ownership(user.as_deref(), group.as_deref(), &paths);
            unsafe { libc::_exit(code) }
        }
    }
}

fn fixup_ownership(user: Option<&str>, group: Option<&str>, paths: &[PathBuf]) -> i32 {
    let mut uid: Option<Uid> = None;
    let mut gid: Option<Gid> = None;

    if let Some(name) = user {
        match User::from_name(name) {
            Ok(Some(user)) => {
                uid = Some(user.uid);
                gid = Some(user.gid);
            }
            _ => return EXIT_USER_LOOKUP,
        }
    }

    if let Some(name) = group {
        match Group::from_name(name) {
            Ok(Some(group)) => gid = Some(group.gid),
            _ => return EXIT_GROUP_LOOKUP,
        }
    }

    for path in paths {
        if chown(path, uid, gid).is_err() {
            return EXIT_CHOWN;
        }
    }

    0
}

/// Name of the failed helper step, from its tagged exit status.
pub(super) fn describe_exit(code: i32) -> Option<&'static str> {
    match code {
        EXIT_USER_LOOKUP => Some("user lookup"),
        EXIT_GROUP_LOOKUP => Some("group lookup"),
        EXIT_CHOWN => Some("chown"),
        _ => None,
    }
}

#[cfg(test)]
#[path = "chown_tests.rs"]
mod tests;
