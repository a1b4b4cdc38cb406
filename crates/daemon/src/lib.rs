// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Process wiring for the `vm-agentd` binary: configuration loading,
//! adapter/watcher construction, and the engine run loop. Kept as a library
//! target (rather than folding everything into `main.rs`) so the wiring is
//! unit-testable, matching the teacher's `lib.rs`/`main.rs` split.

pub mod config;

use std::sync::Arc;

use tracing::info;
use vma_adapters::{FsLocalMgr, HttpInventoryClient, InventoryClient, LocalMgr};
use vma_engine::{AgentConfig, ReconciliationEngine};
use vma_watchers::{EventStreamWatcher, FilesystemWatcher, PeriodicPoller};

pub use config::{Config, ConfigError};

/// Builds the engine and its watchers from a resolved [`Config`], but does
/// not start it. Split out from `main` so tests can construct an engine
/// without going through environment variables.
pub fn build_engine(config: &Config) -> Result<Arc<ReconciliationEngine>, vma_adapters::InventoryError> {
    let inventory: Arc<dyn InventoryClient> =
        Arc::new(HttpInventoryClient::new(config.inventory_url.clone(), config.node_id)?);
    let local = Arc::new(FsLocalMgr::new(config.localmgr_root.clone()));

    let agent_config = AgentConfig {
        node_id: config.node_id,
        initial_retry_delay: config.initial_retry_delay,
        max_retry_delay: config.max_retry_delay,
    };
    let engine = ReconciliationEngine::new(agent_config, inventory, local.clone() as Arc<dyn LocalMgr>);

    let sink = engine.observation_sink();
    engine.add_watcher(FilesystemWatcher::new(local.clone(), sink.clone()));
    engine.add_watcher(PeriodicPoller::new(local.clone(), sink.clone(), config.poll_interval));
    if local.supports_event_stream() {
        info!("local-mgr backend reports event stream support, enabling EventStreamWatcher");
        engine.add_watcher(EventStreamWatcher::new(local, sink));
    }

    Ok(engine)
}

/// Installs a `tracing-subscriber` filtered by `RUST_LOG`, defaulting to
/// `info` when unset.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vma_core::VmUuid;

    #[test]
    fn build_engine_wires_filesystem_and_periodic_watchers() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            node_id: VmUuid::new(),
            inventory_url: "http://127.0.0.1:0".to_string(),
            localmgr_root: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(50),
            initial_retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(100),
        };

        // HttpInventoryClient::new only builds a reqwest::Client; it does
        // not connect, so this never touches the network.
        let engine = build_engine(&config).expect("client construction should not fail");
        assert_eq!(Arc::strong_count(&engine), 1);
    }
}
