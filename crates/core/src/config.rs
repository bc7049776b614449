// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket unit configuration. Immutable after load; built by the fragment
//! loader (out of tree) via `Default` plus the setter methods.

use crate::command::{CommandSet, ExecContext};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// IPV6_V6ONLY handling for IPv6 listen addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindIpv6Only {
    /// Leave the kernel default in place.
    #[default]
    Default,
    /// Accept both IPv4-mapped and IPv6 traffic.
    Both,
    /// IPv6 traffic only.
    Ipv6Only,
}

crate::string_enum! {
    BindIpv6Only {
        Default => "default",
        Both => "both",
        Ipv6Only => "ipv6-only",
    }
}

/// How the stop path signals lingering processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KillMode {
    /// Signal every process in the unit's resource container.
    #[default]
    ControlGroup,
    /// Signal only the tracked control process.
    Process,
    /// Signal nothing.
    None,
}

crate::string_enum! {
    KillMode {
        ControlGroup => "control-group",
        Process => "process",
        None => "none",
    }
}

/// Signalling policy for the `*Sigterm`/`*Sigkill` stop stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillContext {
    pub kill_mode: KillMode,
    /// Signal number sent in the Sigterm stages (SIGTERM unless overridden).
    pub kill_signal: i32,
    /// Escalate to SIGKILL when a Sigterm stage times out.
    pub send_sigkill: bool,
}

impl Default for KillContext {
    fn default() -> Self {
        KillContext { kill_mode: KillMode::default(), kill_signal: 15, send_sigkill: true }
    }
}

/// Configuration of one socket unit.
///
/// Numeric fields the kernel treats as "unset below zero" are `Option` here;
/// `None` means the option is never applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Per-connection service instantiation.
    pub accept: bool,
    /// Cap on concurrently live accepted services (accept mode only).
    pub max_connections: u32,
    /// listen(2) backlog; `None` means the OS maximum.
    pub backlog: Option<i32>,
    /// Timeout applied to every transient state.
    pub timeout: Duration,
    /// Mode for directories created above socket/FIFO paths.
    pub directory_mode: u32,
    /// Mode enforced on created sockets, FIFOs and message queues.
    pub socket_mode: u32,

    pub owner_user: Option<String>,
    pub owner_group: Option<String>,

    pub keep_alive: bool,
    pub broadcast: bool,
    pub pass_credentials: bool,
    pub pass_security: bool,
    pub reuse_port: bool,
    pub free_bind: bool,
    pub transparent: bool,

    pub priority: Option<i32>,
    pub mark: Option<i32>,
    pub ip_tos: Option<i32>,
    pub ip_ttl: Option<i32>,
    pub receive_buffer: Option<usize>,
    pub send_buffer: Option<usize>,
    pub pipe_size: Option<usize>,

    pub bind_ipv6_only: BindIpv6Only,
    pub bind_to_device: Option<String>,
    pub tcp_congestion: Option<String>,

    /// Mandatory-access-control labels: generic (FIFOs), and per-direction
    /// for IP traffic.
    pub mac_label: Option<String>,
    pub mac_label_ip_in: Option<String>,
    pub mac_label_ip_out: Option<String>,

    pub mq_maxmsg: Option<i64>,
    pub mq_msgsize: Option<i64>,

    pub exec_context: ExecContext,
    pub kill_context: KillContext,
    pub commands: CommandSet,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            accept: false,
            max_connections: 64,
            backlog: None,
            timeout: Duration::from_secs(90),
            directory_mode: 0o755,
            socket_mode: 0o666,
            owner_user: None,
            owner_group: None,
            keep_alive: false,
            broadcast: false,
            pass_credentials: false,
            pass_security: false,
            reuse_port: false,
            free_bind: false,
            transparent: false,
            priority: None,
            mark: None,
            ip_tos: None,
            ip_ttl: None,
            receive_buffer: None,
            send_buffer: None,
            pipe_size: None,
            bind_ipv6_only: BindIpv6Only::Default,
            bind_to_device: None,
            tcp_congestion: None,
            mac_label: None,
            mac_label_ip_in: None,
            mac_label_ip_out: None,
            mq_maxmsg: None,
            mq_msgsize: None,
            exec_context: ExecContext::default(),
            kill_context: KillContext::default(),
            commands: CommandSet::default(),
        }
    }
}

impl SocketConfig {
    crate::setters! {
        set {
            accept: bool,
            max_connections: u32,
            timeout: Duration,
            directory_mode: u32,
            socket_mode: u32,
            keep_alive: bool,
            reuse_port: bool,
            bind_ipv6_only: BindIpv6Only,
            kill_context: KillContext,
            commands: CommandSet,
        }
        option {
            backlog: i32,
            owner_user: String,
            owner_group: String,
            priority: i32,
            pipe_size: usize,
            bind_to_device: String,
            tcp_congestion: String,
            mac_label: String,
            mq_maxmsg: i64,
            mq_msgsize: i64,
        }
    }

    /// Whether the chown helper step is needed at all.
    pub fn wants_ownership_fixup(&self) -> bool {
        self.owner_user.is_some() || self.owner_group.is_some()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
