// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Load-time validation and implicit dependency wiring.

use super::SocketUnit;
use crate::manager::{DependencyKind, Manager, ManagerError};
use sockd_core::{Clock, KillMode, UnitName};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("unit has no listen endpoints")]
    NoListen,

    #[error("accept mode set, but endpoints are non-accepting")]
    NonAcceptingEndpoint,

    #[error("accept mode requires a connection budget of at least 1")]
    NoConnectionBudget,

    #[error("accept mode cannot be combined with an explicitly configured service")]
    ExplicitServiceWithAccept,

    #[error("PAM name set, but kill mode is not control-group")]
    PamWithoutControlGroupKill,

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

impl<M: Manager, C: Clock> SocketUnit<M, C> {
    /// Validate the configuration, resolve the durable paired service for
    /// non-accepting units, and wire the implicit dependency edges.
    pub fn load(&mut self) -> Result<(), VerifyError> {
        self.verify()?;

        if self.has_non_accepting_endpoint() {
            if self.service.is_none() {
                let name = self.id.related_service();
                let service = self.manager.load_service(&name)?;
                self.service = Some(service);
            }
            if let Some(service) = self.service.clone() {
                self.manager.register_trigger(&self.id, &service)?;
            }
        }

        self.add_mount_links()?;
        self.add_device_link()?;
        self.add_default_dependencies()?;

        Ok(())
    }

    fn verify(&self) -> Result<(), VerifyError> {
        if self.ports.is_empty() {
            return Err(VerifyError::NoListen);
        }

        if self.config.accept && self.has_non_accepting_endpoint() {
            return Err(VerifyError::NonAcceptingEndpoint);
        }

        if self.config.accept && self.config.max_connections == 0 {
            return Err(VerifyError::NoConnectionBudget);
        }

        if self.config.accept && self.explicit_service {
            return Err(VerifyError::ExplicitServiceWithAccept);
        }

        if self.config.exec_context.pam_name.is_some()
            && self.config.kill_context.kill_mode != KillMode::ControlGroup
        {
            return Err(VerifyError::PamWithoutControlGroupKill);
        }

        Ok(())
    }

    /// Whether any endpoint cannot accept — which forces single-service
    /// (non-accepting) semantics for the unit as a whole.
    fn has_non_accepting_endpoint(&self) -> bool {
        if !self.config.accept {
            return true;
        }
        self.ports.iter().any(|p| !p.kind().can_accept())
    }

    fn add_mount_links(&mut self) -> Result<(), ManagerError> {
        let paths: Vec<PathBuf> = self
            .ports
            .iter()
            .filter_map(|p| p.kind().mount_path().map(|path| path.to_path_buf()))
            .collect();
        for path in paths {
            self.manager.require_mounts_for(&self.id, &path)?;
        }
        Ok(())
    }

    fn add_device_link(&mut self) -> Result<(), ManagerError> {
        let Some(device) = &self.config.bind_to_device else {
            return Ok(());
        };
        if device == "lo" {
            return Ok(());
        }
        let node = PathBuf::from(format!("/sys/subsystem/net/devices/{device}"));
        self.manager.add_node_link(&self.id, &node)
    }

    fn add_default_dependencies(&mut self) -> Result<(), ManagerError> {
        let sockets_target = UnitName::new("sockets.target");
        self.manager.add_dependency(&self.id, DependencyKind::Before, &sockets_target)?;

        if self.manager.system_mode() {
            let sysinit = UnitName::new("sysinit.target");
            self.manager.add_dependency(&self.id, DependencyKind::After, &sysinit)?;
            self.manager.add_dependency(&self.id, DependencyKind::Requires, &sysinit)?;
        }

        let shutdown = UnitName::new("shutdown.target");
        self.manager.add_dependency(&self.id, DependencyKind::Before, &shutdown)?;
        self.manager.add_dependency(&self.id, DependencyKind::Conflicts, &shutdown)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
