// SPDX-License-Identifier: MIT

//! Consumes a live local-mgr event stream when the backend supports one.
//! Self-restarts on disconnect and replays the gap between sessions as
//! synthetic create/modify/delete observations, so steady state stays
//! correct across a stream hiccup without the engine ever seeing the
//! disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vma_adapters::{EventStreamReady, LocalMgr, StreamEvent};
use vma_core::{VmRecord, VmUuid};

use crate::observation::{record_to_partial, Observation, ObservationSink};
use crate::watcher::Watcher;

const NAME: &str = "event_stream";
const RESTART_DELAY: Duration = Duration::from_secs(1);

pub struct EventStreamWatcher<L: LocalMgr> {
    local: Arc<L>,
    sink: ObservationSink,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<EventStreamWatcher<L>>,
}

impl<L: LocalMgr> EventStreamWatcher<L> {
    pub fn new(local: Arc<L>, sink: ObservationSink) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            local,
            sink,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    async fn run_loop(self: Arc<Self>) {
        let mut cached: Option<HashMap<VmUuid, VmRecord>> = None;

        while !self.cancel.is_cancelled() {
            let Some(EventStreamReady { vms: snapshot, mut stream }) = self.local.open_event_stream().await else {
                warn!("event stream watcher: local-mgr backend does not support streaming, exiting");
                return;
            };

            if let Some(prev) = cached.take() {
                if self.emit_delta(&prev, &snapshot).await.is_err() {
                    return;
                }
            }
            let mut live = snapshot;

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        stream.stop().await;
                        return;
                    }
                    event = stream.next_event() => {
                        match event {
                            Some(event) => {
                                if self.forward(event, &mut live).await.is_err() {
                                    stream.stop().await;
                                    return;
                                }
                            }
                            None => {
                                warn!("event stream watcher: stream disconnected, restarting");
                                break;
                            }
                        }
                    }
                }
            }

            stream.stop().await;
            cached = Some(live);

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(RESTART_DELAY) => {}
            }
        }
    }

    async fn forward(&self, event: StreamEvent, cached: &mut HashMap<VmUuid, VmRecord>) -> Result<(), ()> {
        let obs = match event {
            StreamEvent::Create { uuid, vm } => {
                let partial = record_to_partial(&vm);
                cached.insert(uuid, vm);
                Observation::create(NAME, uuid, partial)
            }
            StreamEvent::Modify { uuid, vm } => {
                let partial = record_to_partial(&vm);
                cached.insert(uuid, vm);
                Observation::modify(NAME, uuid, partial)
            }
            StreamEvent::Delete { uuid } => {
                cached.remove(&uuid);
                Observation::delete(NAME, uuid)
            }
        };
        self.sink.send(obs).await.map_err(|_| ())
    }

    /// Diffs the cached snapshot from before the disconnect against the
    /// fresh snapshot delivered on restart, synthesizing the create/modify/
    /// delete observations for whatever happened during the gap.
    async fn emit_delta(&self, prev: &HashMap<VmUuid, VmRecord>, current: &HashMap<VmUuid, VmRecord>) -> Result<(), ()> {
        for uuid in prev.keys() {
            if !current.contains_key(uuid) {
                self.sink.send(Observation::delete(NAME, *uuid)).await.map_err(|_| ())?;
            }
        }
        for (uuid, vm) in current {
            match prev.get(uuid) {
                None => {
                    self.sink.send(Observation::create(NAME, *uuid, record_to_partial(vm))).await.map_err(|_| ())?;
                }
                Some(old) if old != vm => {
                    self.sink.send(Observation::modify(NAME, *uuid, record_to_partial(vm))).await.map_err(|_| ())?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<L: LocalMgr> Watcher for EventStreamWatcher<L> {
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
#[path = "event_stream_tests.rs"]
mod tests;
