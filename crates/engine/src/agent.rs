// SPDX-License-Identifier: MIT

//! The reconciliation engine: wires the coalescer and watchers to
//! Inventory and local-mgr, and drives startup reconciliation followed by
//! steady-state per-VM updates.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vma_adapters::{InventoryClient, LocalMgr, LocalMgrError};
use vma_core::{SystemClock, VmRecord, VmUuid};
use vma_watchers::{CoalescedEvent, Coalescer, Observation, ObservationSink, Watcher};

use crate::error::EngineError;
use crate::queue::UpdateQueue;
use crate::reconcile::diff_for_bulk_update;
use crate::retry::DelayScheduler;
use crate::state::EngineState;

/// Node identity and backoff bounds the engine needs; everything else
/// (watcher construction, adapter selection) is the caller's concern.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node_id: VmUuid,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

pub struct ReconciliationEngine {
    config: AgentConfig,
    inventory: Arc<dyn InventoryClient>,
    local: Arc<dyn LocalMgr>,
    watchers: Mutex<Vec<Arc<dyn Watcher>>>,
    coalescer: Arc<Coalescer<SystemClock>>,
    state: Mutex<EngineState>,
    last_seen: Mutex<HashMap<VmUuid, VmRecord>>,
    dirty: Mutex<HashSet<VmUuid>>,
    queue: Mutex<UpdateQueue>,
    queue_notify: Notify,
    retry: Arc<DelayScheduler>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    obs_tx: ObservationSink,
    obs_rx: Mutex<Option<mpsc::Receiver<Observation>>>,
    events_tx: mpsc::Sender<CoalescedEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<CoalescedEvent>>>,
    weak_self: Weak<ReconciliationEngine>,
}

const CHANNEL_CAPACITY: usize = 1024;

impl ReconciliationEngine {
    pub fn new(config: AgentConfig, inventory: Arc<dyn InventoryClient>, local: Arc<dyn LocalMgr>) -> Arc<Self> {
        let (obs_tx, obs_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let retry = DelayScheduler::new(config.initial_retry_delay, config.max_retry_delay);

        Arc::new_cyclic(|weak_self| Self {
            config,
            inventory,
            local,
            watchers: Mutex::new(Vec::new()),
            coalescer: Arc::new(Coalescer::new(SystemClock)),
            state: Mutex::new(EngineState::Initializing),
            last_seen: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
            queue: Mutex::new(UpdateQueue::new()),
            queue_notify: Notify::new(),
            retry,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            obs_tx,
            obs_rx: Mutex::new(Some(obs_rx)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            weak_self: weak_self.clone(),
        })
    }

    /// Clone to hand to watcher constructors before `run()` is called.
    pub fn observation_sink(&self) -> ObservationSink {
        self.obs_tx.clone()
    }

    /// Registers a watcher to be started/stopped with the engine. Must be
    /// called before `run()`.
    pub fn add_watcher(&self, watcher: Arc<dyn Watcher>) {
        self.watchers.lock().push(watcher);
    }

    #[cfg(test)]
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    #[cfg(test)]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs startup reconciliation, then the steady-state event loop and
    /// dispatcher, until `stop()` is called. Must be called at most once.
    pub async fn run(self: &Arc<Self>) {
        let (Some(obs_rx), Some(events_rx)) = (self.obs_rx.lock().take(), self.events_rx.lock().take()) else {
            error!("run() called more than once on this engine; ignoring");
            return;
        };

        let coalescer = Arc::clone(&self.coalescer);
        let events_tx = self.events_tx.clone();
        self.tasks.lock().push(tokio::spawn(async move {
            coalescer.run(obs_rx, events_tx).await;
        }));

        let this = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(this.run_event_loop(events_rx)));

        let this = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(this.run_dispatcher()));

        Arc::clone(self).startup_loop().await;
    }

    async fn startup_loop(self: Arc<Self>) {
        let mut update_delay = self.config.initial_retry_delay;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.try_startup().await {
                Ok(()) => {
                    info!(node_id = %self.config.node_id, "startup reconciliation complete, engine ready");
                    return;
                }
                Err(e) => {
                    warn!("startup reconciliation failed, retrying in {update_delay:?}: {e}");
                    self.stop_watchers().await;
                    self.dirty.lock().clear();

                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(update_delay) => {}
                    }
                    update_delay = std::cmp::min(update_delay * 2, self.config.max_retry_delay);
                }
            }
        }
    }

    async fn try_startup(&self) -> Result<(), EngineError> {
        *self.state.lock() = EngineState::Initializing;
        self.dirty.lock().clear();

        let inventory_vms = self.inventory.list_for_node(self.config.node_id).await?;
        let inventory_map: HashMap<VmUuid, VmRecord> =
            inventory_vms.into_iter().map(|v| (v.uuid, v)).collect();

        // Watchers start before the local listing so mutations racing with
        // it land in `dirty` rather than being silently missed.
        self.start_watchers().await;

        let local_vms = self.local.list_all().await?;
        let local_map: HashMap<VmUuid, VmRecord> = local_vms.into_iter().map(|v| (v.uuid, v)).collect();

        let payload = diff_for_bulk_update(&local_map, &inventory_map);
        if !payload.is_empty() {
            self.inventory.bulk_update_for_node(self.config.node_id, payload).await?;
        }

        *self.last_seen.lock() = local_map;

        let dirty: Vec<VmUuid> = {
            let mut state = self.state.lock();
            *state = EngineState::Ready;
            self.dirty.lock().drain().collect()
        };
        for uuid in dirty {
            self.queue_vm(uuid);
        }

        Ok(())
    }

    async fn start_watchers(&self) {
        let watchers: Vec<Arc<dyn Watcher>> = self.watchers.lock().clone();
        for watcher in &watchers {
            watcher.start().await;
        }
    }

    async fn stop_watchers(&self) {
        let watchers: Vec<Arc<dyn Watcher>> = self.watchers.lock().clone();
        for watcher in &watchers {
            watcher.stop().await;
        }
    }

    async fn run_event_loop(self: Arc<Self>, mut events_rx: mpsc::Receiver<CoalescedEvent>) {
        while let Some(event) = events_rx.recv().await {
            let uuid = match &event {
                CoalescedEvent::Created(vm) => vm.uuid,
                CoalescedEvent::Modified(vm, _) => vm.uuid,
                CoalescedEvent::Deleted(uuid) => *uuid,
            };

            match *self.state.lock() {
                EngineState::Ready => self.queue_vm(uuid),
                EngineState::Initializing => {
                    self.dirty.lock().insert(uuid);
                }
                EngineState::Stopped => {}
            }
        }
    }

    fn queue_vm(&self, uuid: VmUuid) {
        if matches!(*self.state.lock(), EngineState::Stopped) {
            return;
        }
        if self.queue.lock().push(uuid) {
            self.queue_notify.notify_one();
        }
    }

    async fn run_dispatcher(self: Arc<Self>) {
        loop {
            let uuid = loop {
                if self.cancel.is_cancelled() {
                    return;
                }
                if let Some(uuid) = self.queue.lock().pop() {
                    break uuid;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = self.queue_notify.notified() => {}
                }
            };

            self.process_one(uuid).await;
            self.queue.lock().complete();
        }
    }

    async fn process_one(&self, uuid: VmUuid) {
        if !matches!(*self.state.lock(), EngineState::Ready) {
            return;
        }

        let payload = match self.local.load_one(uuid).await {
            Ok(vm) => {
                self.last_seen.lock().insert(uuid, vm.clone());
                vm
            }
            Err(LocalMgrError::NotFound(_)) => {
                let prior = self.last_seen.lock().get(&uuid).cloned();
                match prior {
                    Some(prev) => prev.with_destroyed(),
                    None => {
                        error!(
                            %uuid,
                            "vm vanished from local-mgr with no prior snapshot; dropping update \
                             (see DESIGN.md for the open-question decision)"
                        );
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(%uuid, "local-mgr load failed, scheduling retry: {e}");
                self.schedule_retry(uuid);
                return;
            }
        };

        match self.inventory.update_one(&payload).await {
            Ok(()) => self.retry.clear(uuid),
            Err(e) => {
                warn!(%uuid, "inventory update failed, scheduling retry: {e}");
                self.schedule_retry(uuid);
            }
        }
    }

    fn schedule_retry(&self, uuid: VmUuid) {
        let Some(this) = self.weak_self.upgrade() else { return };
        self.retry.schedule(uuid, move || this.queue_vm(uuid));
    }

    /// Stops watchers, cancels all timers, drops the queue, and clears all
    /// in-memory state. After this returns, `run()` may not be called
    /// again on this engine.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
        }

        self.cancel.cancel();
        self.queue_notify.notify_waiters();
        self.stop_watchers().await;
        self.retry.reset();
        self.coalescer.reset();
        self.queue.lock().reset();
        self.last_seen.lock().clear();
        self.dirty.lock().clear();

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
