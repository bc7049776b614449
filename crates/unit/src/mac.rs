// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mandatory-access-control hooks.
//!
//! The label subsystem itself lives in the surrounding supervisor; units see
//! it through [`MacPolicy`]. Config-supplied per-fd labels are applied here
//! directly via `fsetxattr(2)`.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;

/// Kind of filesystem object about to be created under a label context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatedKind {
    Directory,
    Fifo,
    Socket,
}

/// Labelling hooks around filesystem-object and socket creation.
///
/// The default implementations do nothing; a supervisor with a MAC backend
/// overrides them.
pub trait MacPolicy {
    /// Install the file-creation context for `path` before creating `kind`.
    fn context_set(&self, _path: &Path, _kind: CreatedKind) {}

    /// Clear any installed creation context.
    fn context_clear(&self) {}

    /// Label to create sockets with, derived from the executable that will
    /// consume them.
    fn create_label_for_exe(&self, _exe: &Path) -> Option<String> {
        None
    }

    /// Install a socket-creation label previously obtained from
    /// [`MacPolicy::create_label_for_exe`].
    fn socket_context_set(&self, _label: &str) {}
}

/// No-op policy for supervisors without a MAC backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMacPolicy;

impl MacPolicy for NullMacPolicy {}

/// Set an extended attribute on an open descriptor.
pub(crate) fn fsetxattr(fd: BorrowedFd<'_>, name: &str, value: &str) -> io::Result<()> {
    let name = CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let res = unsafe {
        libc::fsetxattr(
            fd.as_raw_fd(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
