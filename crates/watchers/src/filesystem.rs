// SPDX-License-Identifier: MIT

//! Watches the local-mgr VM-config directory tree and derives per-VM
//! create/modify/delete observations from file modification times.
//!
//! A per-VM "last_modified" is `max(mtime(config.json), mtime(metadata.json),
//! mtime(routes.json), mtime(tags.json))`. This watcher and [`FsLocalMgr`]
//! are intentionally coupled: they observe the same on-disk tree, mirroring
//! how local-mgr and its filesystem watcher observe the same zone config
//! store in the original system.
//!
//! A single recursive `notify` watch on the tree root stands in for the
//! per-VM watcher set the source installs and tears down per VM: the
//! recursive watch already covers every VM subdirectory, so there is no
//! separate bookkeeping to keep in sync with the current VM set.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use notify::{RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vma_adapters::FsLocalMgr;
use vma_core::VmUuid;

use crate::observation::{record_to_partial, Observation, ObservationSink};
use crate::watcher::Watcher;

const NAME: &str = "filesystem";
const MISSING_DIR_POLL: Duration = Duration::from_millis(500);
const MISSING_DIR_TIMEOUT: Duration = Duration::from_secs(30);

enum VmDirState {
    Present(SystemTime),
    Hidden,
    Gone,
}

#[derive(Default)]
struct State {
    last_seen: HashMap<VmUuid, SystemTime>,
    seeded: bool,
    scan_in_progress: bool,
    rerun_requested: bool,
}

pub struct FilesystemWatcher {
    local: Arc<FsLocalMgr>,
    sink: ObservationSink,
    state: Mutex<State>,
    dirty: Arc<Notify>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    notify_watcher: Mutex<Option<RecommendedWatcher>>,
    weak_self: Weak<FilesystemWatcher>,
}

impl FilesystemWatcher {
    pub fn new(local: Arc<FsLocalMgr>, sink: ObservationSink) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            local,
            sink,
            state: Mutex::new(State::default()),
            dirty: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
            notify_watcher: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    fn install_notify_watcher(&self) -> notify::Result<RecommendedWatcher> {
        let dirty = self.dirty.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                dirty.notify_one();
            }
        })?;
        watcher.watch(self.local.root(), RecursiveMode::Recursive)?;
        Ok(watcher)
    }

    async fn run_loop(self: Arc<Self>) {
        self.reconcile_pass().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.dirty.notified() => {}
            }
            self.reconcile_pass().await;
        }
    }

    /// Runs a scan, and if a change arrives while one is already in
    /// flight, re-runs exactly once more after it finishes rather than
    /// overlapping the two passes.
    async fn reconcile_pass(&self) {
        {
            let mut state = self.state.lock();
            if state.scan_in_progress {
                state.rerun_requested = true;
                return;
            }
            state.scan_in_progress = true;
        }

        loop {
            self.scan_once().await;
            let mut state = self.state.lock();
            if state.rerun_requested {
                state.rerun_requested = false;
                drop(state);
                continue;
            }
            state.scan_in_progress = false;
            break;
        }
    }

    async fn scan_once(&self) {
        let mut entries = match tokio::fs::read_dir(self.local.root()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("filesystem watcher: cannot read vm root: {e}");
                return;
            }
        };

        let mut current: HashMap<VmUuid, SystemTime> = HashMap::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("filesystem watcher: readdir error: {e}");
                    break;
                }
            };
            let Ok(file_type) = entry.file_type().await else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
            let Ok(uuid) = name.parse::<VmUuid>() else { continue };

            match Self::stat_vm_dir_with_retry(&entry.path(), &self.cancel).await {
                VmDirState::Present(t) => {
                    current.insert(uuid, t);
                }
                VmDirState::Hidden | VmDirState::Gone => {}
            }
        }

        let (seeded_already, to_create, to_modify, to_delete) = {
            let mut state = self.state.lock();
            if !state.seeded {
                state.last_seen = current;
                state.seeded = true;
                (false, Vec::new(), Vec::new(), Vec::new())
            } else {
                let mut to_delete = Vec::new();
                for uuid in state.last_seen.keys() {
                    if !current.contains_key(uuid) {
                        to_delete.push(*uuid);
                    }
                }

                let mut to_create = Vec::new();
                let mut to_modify = Vec::new();
                for (uuid, ts) in &current {
                    match state.last_seen.get(uuid) {
                        None => to_create.push(*uuid),
                        Some(prev) if ts > prev => to_modify.push(*uuid),
                        _ => {}
                    }
                }

                for uuid in &to_delete {
                    state.last_seen.remove(uuid);
                }
                for uuid in to_create.iter().chain(to_modify.iter()) {
                    state.last_seen.insert(*uuid, current[uuid]);
                }

                (true, to_create, to_modify, to_delete)
            }
        };

        if !seeded_already {
            return;
        }

        for uuid in to_delete {
            if self.sink.send(Observation::delete(NAME, uuid)).await.is_err() {
                return;
            }
        }
        for uuid in to_create {
            if let Ok(vm) = self.local.load_one(uuid).await {
                let partial = record_to_partial(&vm);
                if self.sink.send(Observation::create(NAME, uuid, partial)).await.is_err() {
                    return;
                }
            }
        }
        for uuid in to_modify {
            if let Ok(vm) = self.local.load_one(uuid).await {
                let partial = record_to_partial(&vm);
                if self.sink.send(Observation::modify(NAME, uuid, partial)).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn stat_vm_dir(dir: &Path) -> VmDirState {
        let config_path = dir.join("config.json");
        let config_bytes = match tokio::fs::read(&config_path).await {
            Ok(bytes) => bytes,
            Err(_) => return VmDirState::Gone,
        };

        let hidden = serde_json::from_slice::<serde_json::Value>(&config_bytes)
            .ok()
            .and_then(|v| v.get("hidden").and_then(|h| h.as_bool()))
            .unwrap_or(false);
        if hidden {
            return VmDirState::Hidden;
        }

        let mut latest = Self::mtime(&config_path).await;
        for name in ["metadata.json", "routes.json", "tags.json"] {
            if let Some(t) = Self::mtime(&dir.join(name)).await {
                latest = Some(latest.map_or(t, |l: SystemTime| l.max(t)));
            }
        }

        match latest {
            Some(t) => VmDirState::Present(t),
            None => VmDirState::Gone,
        }
    }

    /// If the descriptor can't be read while its parent directory is still
    /// listed (a rename mid-write, per the spec), poll briefly rather than
    /// immediately declaring the VM deleted.
    async fn stat_vm_dir_with_retry(dir: &Path, cancel: &CancellationToken) -> VmDirState {
        let deadline = tokio::time::Instant::now() + MISSING_DIR_TIMEOUT;
        loop {
            match Self::stat_vm_dir(dir).await {
                VmDirState::Gone if tokio::time::Instant::now() < deadline => {
                    tokio::select! {
                        _ = cancel.cancelled() => return VmDirState::Gone,
                        _ = tokio::time::sleep(MISSING_DIR_POLL) => continue,
                    }
                }
                other => return other,
            }
        }
    }

    async fn mtime(path: &Path) -> Option<SystemTime> {
        tokio::fs::metadata(path).await.ok().and_then(|m| m.modified().ok())
    }
}

#[async_trait::async_trait]
impl Watcher for FilesystemWatcher {
    async fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        match self.install_notify_watcher() {
            Ok(w) => *self.notify_watcher.lock() = Some(w),
            Err(e) => warn!("filesystem watcher: failed to install notify watch: {e}"),
        }

        let Some(this) = self.weak_self.upgrade() else { return };
        *handle = Some(tokio::spawn(this.run_loop()));
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.notify_watcher.lock().take();
        self.dirty.notify_one();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;
