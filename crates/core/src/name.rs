// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit names and template instance minting.
//!
//! A unit name is `<prefix>.<suffix>` or, for template instances,
//! `<prefix>@<instance>.<suffix>`. Socket units mint per-connection service
//! names of the form `<prefix>@<instance>.service`.

use serde::{Deserialize, Serialize};

/// Name of a unit, e.g. `proxy.socket` or `proxy@3.service`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    pub fn new(name: impl Into<String>) -> Self {
        UnitName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name prefix: everything before `@`, or before the type suffix if
    /// the name is not a template instance.
    pub fn prefix(&self) -> &str {
        if let Some((prefix, _)) = self.0.split_once('@') {
            return prefix;
        }
        match self.0.rsplit_once('.') {
            Some((prefix, _)) => prefix,
            None => &self.0,
        }
    }

    /// The instance part of a template name, if any.
    pub fn instance(&self) -> Option<&str> {
        let (_, rest) = self.0.split_once('@')?;
        match rest.rsplit_once('.') {
            Some((instance, _)) => Some(instance),
            None => Some(rest),
        }
    }

    /// Build `<prefix>@<instance>.service`.
    pub fn service_instance(prefix: &str, instance: &str) -> UnitName {
        UnitName(format!("{prefix}@{instance}.service"))
    }

    /// The non-template service paired with this unit: `<prefix>.service`.
    pub fn related_service(&self) -> UnitName {
        UnitName(format!("{}.service", self.prefix()))
    }
}

impl std::fmt::Display for UnitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitName {
    fn from(s: &str) -> Self {
        UnitName(s.to_string())
    }
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod tests;
