// SPDX-License-Identifier: MIT

//! Centralized environment variable access for the daemon binary, in the
//! same shape as the teacher's `env.rs`: one fixed, documented `VM_AGENT_*`
//! variable per setting, with a sensible default baked in where one exists.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use vma_core::VmUuid;

const DEFAULT_LOCALMGR_ROOT: &str = "/var/db/vm-agent/vms";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_INITIAL_RETRY_MS: u64 = 1_000;
const DEFAULT_MAX_RETRY_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{0} is set to {1:?}, which is not a valid node uuid")]
    InvalidNodeUuid(&'static str, String),

    #[error("{0} is set to {1:?}, which is not a valid integer")]
    InvalidInteger(&'static str, String),
}

/// Resolved daemon configuration. Loaded once at startup; nothing here
/// changes for the life of the process.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: VmUuid,
    pub inventory_url: String,
    pub localmgr_root: PathBuf,
    pub poll_interval: Duration,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let node_id = required_uuid("VM_AGENT_NODE_UUID")?;
        let inventory_url = required("VM_AGENT_INVENTORY_URL")?;
        let localmgr_root = optional("VM_AGENT_LOCALMGR_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCALMGR_ROOT));
        let poll_interval = duration_ms("VM_AGENT_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let initial_retry_delay = duration_ms("VM_AGENT_INITIAL_RETRY_MS", DEFAULT_INITIAL_RETRY_MS)?;
        let max_retry_delay = duration_ms("VM_AGENT_MAX_RETRY_MS", DEFAULT_MAX_RETRY_MS)?;

        Ok(Self {
            node_id,
            inventory_url,
            localmgr_root,
            poll_interval,
            initial_retry_delay,
            max_retry_delay,
        })
    }
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn required_uuid(name: &'static str) -> Result<VmUuid, ConfigError> {
    let raw = required(name)?;
    raw.parse().map_err(|_| ConfigError::InvalidNodeUuid(name, raw))
}

fn duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    match optional(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidInteger(name, raw)),
        None => Ok(Duration::from_millis(default_ms)),
    }
}
