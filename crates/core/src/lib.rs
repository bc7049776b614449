// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sockd-core: domain types for the sockd socket-activation unit

pub mod macros;

pub mod address;
pub mod clock;
pub mod command;
pub mod config;
pub mod instance;
pub mod name;
pub mod serial;
pub mod state;

pub use address::{NetlinkFamily, SocketAddress, SocketType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandId, CommandSet, ExecCommand, ExecContext};
pub use config::{BindIpv6Only, KillContext, KillMode, SocketConfig};
pub use instance::{instance_name, ConnectionPeer};
pub use name::UnitName;
pub use serial::{SerialError, SerialReader, SerialWriter};
pub use state::{ActiveState, SocketResult, SocketState};
