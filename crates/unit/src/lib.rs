// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sockd-unit: the socket-activation unit of the sockd supervisor.
//!
//! A [`SocketUnit`] owns a set of listen endpoints, drives them through a
//! supervised lifecycle, and triggers a paired service when traffic arrives.
//! The surrounding supervisor is reached exclusively through the
//! [`manager::Manager`] trait handle passed in at construction.

pub mod fdstore;
pub mod kill;
pub mod mac;
pub mod manager;
pub mod port;
pub mod unit;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use fdstore::FdStore;
pub use kill::KillOutcome;
pub use mac::{CreatedKind, MacPolicy, NullMacPolicy};
pub use manager::{
    DependencyKind, FdWatch, Manager, ManagerError, ServiceNotice, ServiceRef,
    ServiceStartability, TimerTicket,
};
pub use port::{OpenError, PortKind, Ports, SocketPort};
pub use unit::{
    start_job_message, stop_job_message, FdEventKind, JobOutcome, SocketUnit, UnitError,
    VerifyError,
};
