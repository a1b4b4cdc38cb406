// SPDX-License-Identifier: MIT

//! Polls local-mgr on a fixed cadence and diffs against the previous
//! snapshot on [`vma_core::PERIODIC_FIELDS`]. A single task owns the poll
//! loop, so a slow pass simply delays the next tick rather than racing a
//! second one — no extra in-flight flag is needed.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vma_adapters::LocalMgr;
use vma_core::{comparison_view, ComparisonView, Partial, VmRecord, VmUuid, PERIODIC_FIELDS};

use crate::observation::{Observation, ObservationSink};
use crate::watcher::Watcher;

const NAME: &str = "periodic";

pub struct PeriodicPoller<L: LocalMgr> {
    local: Arc<L>,
    sink: ObservationSink,
    interval: Duration,
    previous: Mutex<HashMap<VmUuid, ComparisonView>>,
    seeded: Mutex<bool>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<PeriodicPoller<L>>,
}

impl<L: LocalMgr> PeriodicPoller<L> {
    pub fn new(local: Arc<L>, sink: ObservationSink, interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            local,
            sink,
            interval,
            previous: Mutex::new(HashMap::new()),
            seeded: Mutex::new(false),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match self.local.list_all().await {
                Ok(vms) => self.diff_and_emit(vms).await,
                Err(e) => warn!("periodic poller: list_all failed: {e}"),
            }
        }
    }

    async fn diff_and_emit(&self, vms: Vec<VmRecord>) {
        let current: HashMap<VmUuid, VmRecord> = vms.into_iter().map(|v| (v.uuid, v)).collect();

        let events = {
            let mut seeded = self.seeded.lock();
            let mut previous = self.previous.lock();

            if !*seeded {
                *previous = current.iter().map(|(uuid, vm)| (*uuid, comparison_view(vm, PERIODIC_FIELDS))).collect();
                *seeded = true;
                Vec::new()
            } else {
                let mut events = Vec::new();

                let gone: Vec<VmUuid> = previous.keys().filter(|uuid| !current.contains_key(uuid)).copied().collect();
                for uuid in gone {
                    previous.remove(&uuid);
                    events.push(Observation::delete(NAME, uuid));
                }

                for (uuid, vm) in &current {
                    let view = comparison_view(vm, PERIODIC_FIELDS);
                    match previous.get(uuid) {
                        None => {
                            events.push(Observation::create(NAME, *uuid, vm.project(PERIODIC_FIELDS)));
                            previous.insert(*uuid, view);
                        }
                        Some(prev_view) if prev_view != &view => {
                            let changed: Partial = view
                                .iter()
                                .filter(|(field, value)| prev_view.get(field.as_str()) != Some(*value))
                                .map(|(field, value)| (field.clone(), value.clone()))
                                .collect();
                            previous.insert(*uuid, view);
                            events.push(Observation::modify(NAME, *uuid, changed));
                        }
                        _ => {}
                    }
                }

                events
            }
        };

        for event in events {
            if self.sink.send(event).await.is_err() {
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl<L: LocalMgr> Watcher for PeriodicPoller<L> {
    async fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let Some(this) = self.weak_self.upgrade() else { return };
        *handle = Some(tokio::spawn(this.run_loop()));
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[path = "periodic_tests.rs"]
mod tests;
