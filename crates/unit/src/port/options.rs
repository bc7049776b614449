// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Option application for open endpoints.
//!
//! Failures here are warnings, not errors: the endpoint still enters service
//! without the tuning the option would have provided.

use crate::mac;
use nix::sys::socket::{setsockopt, sockopt};
use sockd_core::{SocketConfig, UnitName};
use std::os::fd::{AsRawFd, BorrowedFd};

macro_rules! warn_on_err {
    ($unit:expr, $what:expr, $result:expr) => {
        if let Err(e) = $result {
            tracing::warn!(unit = %$unit, error = %e, "{} failed", $what);
        }
    };
}

/// Apply the configured socket options. Called after bind and before listen
/// for listeners, and again on every accepted connection.
pub(crate) fn apply_socket_options(unit: &UnitName, config: &SocketConfig, fd: BorrowedFd<'_>) {
    if config.keep_alive {
        warn_on_err!(unit, "SO_KEEPALIVE", setsockopt(&fd, sockopt::KeepAlive, &true));
    }

    if config.broadcast {
        warn_on_err!(unit, "SO_BROADCAST", setsockopt(&fd, sockopt::Broadcast, &true));
    }

    if config.pass_credentials {
        warn_on_err!(unit, "SO_PASSCRED", setsockopt(&fd, sockopt::PassCred, &true));
    }

    if config.pass_security {
        warn_on_err!(unit, "SO_PASSSEC", set_passsec(fd));
    }

    if let Some(priority) = config.priority {
        warn_on_err!(unit, "SO_PRIORITY", setsockopt(&fd, sockopt::Priority, &priority));
    }

    if let Some(size) = config.receive_buffer {
        // try the privileged variant first, in case we have the perms for it
        if setsockopt(&fd, sockopt::RcvBufForce, &size).is_err() {
            warn_on_err!(unit, "SO_RCVBUF", setsockopt(&fd, sockopt::RcvBuf, &size));
        }
    }

    if let Some(size) = config.send_buffer {
        if setsockopt(&fd, sockopt::SndBufForce, &size).is_err() {
            warn_on_err!(unit, "SO_SNDBUF", setsockopt(&fd, sockopt::SndBuf, &size));
        }
    }

    if let Some(mark) = config.mark {
        warn_on_err!(unit, "SO_MARK", setsockopt(&fd, sockopt::Mark, &(mark as u32)));
    }

    if let Some(tos) = config.ip_tos {
        warn_on_err!(unit, "IP_TOS", setsockopt(&fd, sockopt::IpTos, &tos));
    }

    if let Some(ttl) = config.ip_ttl {
        // applied to both stacks; one succeeding is enough
        let v4 = setsockopt(&fd, sockopt::Ipv4Ttl, &ttl);
        let v6 = setsockopt(&fd, sockopt::Ipv6Ttl, &ttl);
        if v4.is_err() && v6.is_err() {
            tracing::warn!(unit = %unit, "IP_TTL/IPV6_UNICAST_HOPS failed");
        }
    }

    if let Some(congestion) = &config.tcp_congestion {
        let value = std::ffi::OsString::from(congestion);
        warn_on_err!(unit, "TCP_CONGESTION", setsockopt(&fd, sockopt::TcpCongestion, &value));
    }

    if config.reuse_port {
        warn_on_err!(unit, "SO_REUSEPORT", setsockopt(&fd, sockopt::ReusePort, &true));
    }

    if let Some(label) = &config.mac_label_ip_in {
        warn_on_err!(
            unit,
            "security.MAC64IPIN",
            mac::fsetxattr(fd, "security.MAC64IPIN", label)
        );
    }

    if let Some(label) = &config.mac_label_ip_out {
        warn_on_err!(
            unit,
            "security.MAC64IPOUT",
            mac::fsetxattr(fd, "security.MAC64IPOUT", label)
        );
    }
}

/// Apply FIFO tuning: pipe buffer size and the generic MAC label.
pub(crate) fn apply_fifo_options(unit: &UnitName, config: &SocketConfig, fd: BorrowedFd<'_>) {
    if let Some(size) = config.pipe_size {
        warn_on_err!(unit, "F_SETPIPE_SZ", set_pipe_size(fd, size));
    }

    if let Some(label) = &config.mac_label {
        warn_on_err!(unit, "security.MAC64", mac::fsetxattr(fd, "security.MAC64", label));
    }
}

/// SO_PASSSEC has no nix wrapper.
fn set_passsec(fd: BorrowedFd<'_>) -> std::io::Result<()> {
    let one: libc::c_int = 1;
    let res = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PASSSEC,
            (&one as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn set_pipe_size(fd: BorrowedFd<'_>, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETPIPE_SZ, size as libc::c_int) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
