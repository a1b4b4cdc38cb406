// SPDX-License-Identifier: MIT

//! Common capability shared by every observation source.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("filesystem watch error: {0}")]
    Filesystem(#[from] notify::Error),

    #[error("local-mgr error: {0}")]
    LocalMgr(#[from] vma_adapters::LocalMgrError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A source of VM-change observations. Every implementation MUST emit
/// partials containing only fields it is confident changed, be idempotent
/// under restart, and never call the sink for hidden VMs.
///
/// `WatcherError`s never propagate past `start`/`stop`; failures are logged
/// and the watcher keeps running (self-healing is each watcher's own
/// responsibility, e.g. `EventStreamWatcher`'s restart loop).
#[async_trait]
pub trait Watcher: Send + Sync + 'static {
    async fn start(&self);
    async fn stop(&self);
}
