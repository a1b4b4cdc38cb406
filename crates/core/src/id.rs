// SPDX-License-Identifier: MIT

//! VM identity.
//!
//! Inventory and local-mgr both key VMs by RFC 4122 UUID, so unlike most
//! identifiers in this codebase `VmUuid` wraps `uuid::Uuid` directly rather
//! than a generated nanoid.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for a VM, shared between local-mgr and Inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmUuid(pub uuid::Uuid);

impl VmUuid {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }

    /// Returns a string slice of the id truncated to at most `n` characters,
    /// for compact log lines.
    pub fn short(&self, n: usize) -> String {
        let s = self.0.to_string();
        s.chars().take(n).collect()
    }
}

impl Default for VmUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VmUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VmUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<uuid::Uuid> for VmUuid {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
