// SPDX-License-Identifier: MIT

//! The local-mgr adapter: the authoritative source of truth for what VMs
//! actually exist on this node, plus a filesystem-tree reference backend
//! that stands in for a proprietary zone management library.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use vma_core::{VmRecord, VmUuid};

#[derive(Debug, Error)]
pub enum LocalMgrError {
    #[error("vm {0} not found")]
    NotFound(VmUuid),

    #[error("local-mgr transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("local-mgr record is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One delta delivered by a live local-mgr event stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Create { uuid: VmUuid, vm: VmRecord },
    Modify { uuid: VmUuid, vm: VmRecord },
    Delete { uuid: VmUuid },
}

/// A live connection to local-mgr's event source, if the backend supports
/// one. Holding the handle keeps the stream alive; dropping it without
/// calling `stop` is fine but `stop` makes shutdown deterministic.
#[async_trait]
pub trait EventStream: Send {
    async fn next_event(&mut self) -> Option<StreamEvent>;
    async fn stop(&mut self);
}

/// Returned by `open_event_stream`: the full snapshot as of stream-ready,
/// plus the stream handle for deltas after that point.
pub struct EventStreamReady {
    pub vms: HashMap<VmUuid, VmRecord>,
    pub stream: Box<dyn EventStream>,
}

/// Authoritative enumerator of VMs on this node. Hidden (do-not-inventory)
/// VMs are filtered out before any caller sees them.
#[async_trait]
pub trait LocalMgr: Send + Sync + 'static {
    async fn load_one(&self, uuid: VmUuid) -> Result<VmRecord, LocalMgrError>;
    async fn list_all(&self) -> Result<Vec<VmRecord>, LocalMgrError>;

    /// `None` if this backend has no native push channel.
    async fn open_event_stream(&self) -> Option<EventStreamReady> {
        None
    }

    fn supports_event_stream(&self) -> bool {
        false
    }
}

/// Filesystem-tree reference backend: one subdirectory per VM uuid under
/// `root`, each holding `config.json` (the VM descriptor, including a
/// `hidden` boolean), `metadata.json`, `routes.json`, and `tags.json`.
/// This is the same tree `FilesystemWatcher` observes; the coupling is
/// intentional, mirroring how local-mgr and its filesystem watcher in the
/// original system observe the same on-disk truth.
pub struct FsLocalMgr {
    root: PathBuf,
}

impl FsLocalMgr {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_sidecar(dir: &Path, filename: &str) -> Result<Option<serde_json::Value>, LocalMgrError> {
        match tokio::fs::read(dir.join(filename)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_vm_dir(&self, uuid: VmUuid) -> Result<Option<VmRecord>, LocalMgrError> {
        let dir = self.root.join(uuid.to_string());
        let config = match tokio::fs::read(dir.join("config.json")).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut record: VmRecord = serde_json::from_slice(&config)?;
        record.uuid = uuid;
        if record.hidden {
            return Ok(None);
        }

        for (key, filename) in [("metadata", "metadata.json"), ("routes", "routes.json"), ("tags", "tags.json")] {
            if let Some(value) = Self::read_sidecar(&dir, filename).await? {
                record.extra.insert(key.to_string(), value);
            }
        }

        Ok(Some(record))
    }
}

#[async_trait]
impl LocalMgr for FsLocalMgr {
    async fn load_one(&self, uuid: VmUuid) -> Result<VmRecord, LocalMgrError> {
        self.read_vm_dir(uuid).await?.ok_or(LocalMgrError::NotFound(uuid))
    }

    async fn list_all(&self) -> Result<Vec<VmRecord>, LocalMgrError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(uuid) = name.parse::<VmUuid>() else {
                continue;
            };
            if let Some(vm) = self.read_vm_dir(uuid).await? {
                out.push(vm);
            }
        }

        Ok(out)
    }

    // A plain directory tree has no native push channel: `EventStreamWatcher`
    // is only constructed when `supports_event_stream` reports true.
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeLocalMgr;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use vma_core::{VmRecord, VmUuid};

    use super::{EventStreamReady, LocalMgr, LocalMgrError};

    #[derive(Default)]
    pub struct FakeLocalMgr {
        vms: Mutex<HashMap<VmUuid, VmRecord>>,
    }

    impl FakeLocalMgr {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, vm: VmRecord) {
            self.vms.lock().insert(vm.uuid, vm);
        }

        pub fn remove(&self, uuid: VmUuid) {
            self.vms.lock().remove(&uuid);
        }
    }

    #[async_trait]
    impl LocalMgr for FakeLocalMgr {
        async fn load_one(&self, uuid: VmUuid) -> Result<VmRecord, LocalMgrError> {
            self.vms.lock().get(&uuid).cloned().ok_or(LocalMgrError::NotFound(uuid))
        }

        async fn list_all(&self) -> Result<Vec<VmRecord>, LocalMgrError> {
            Ok(self.vms.lock().values().filter(|vm| !vm.hidden).cloned().collect())
        }

        async fn open_event_stream(&self) -> Option<EventStreamReady> {
            None
        }
    }
}

#[cfg(test)]
#[path = "localmgr_tests.rs"]
mod tests;
