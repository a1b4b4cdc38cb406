// SPDX-License-Identifier: MIT

//! The optional state-change watcher: translates a running state-transition
//! stream (guest reboot, init death, operator `halt`) into `Modify`
//! observations carrying just the new `state`/`zone_state`. Unlike
//! [`crate::event_stream::EventStreamWatcher`] this stream carries no full
//! VM snapshot to recover from a gap with, so on reconnect it only resumes
//! forwarding — any transition missed during the outage is still caught by
//! [`crate::periodic::PeriodicPoller`] or the next filesystem change.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vma_core::VmUuid;

use crate::observation::{Observation, ObservationSink};
use crate::watcher::Watcher;

const NAME: &str = "state_event";
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// One running-state transition as reported by the backend's state stream.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub uuid: VmUuid,
    pub state: String,
    pub zone_state: String,
}

#[async_trait]
pub trait StateStream: Send {
    async fn next_change(&mut self) -> Option<StateChange>;
    async fn stop(&mut self);
}

/// Capability a `LocalMgr` backend may optionally implement. Kept separate
/// from the core `LocalMgr` trait since most backends (including the
/// filesystem reference backend) have no such channel.
#[async_trait]
pub trait StateStreamSource: Send + Sync + 'static {
    async fn open_state_stream(&self) -> Option<Box<dyn StateStream>>;
}

pub struct StateEventWatcher<S: StateStreamSource> {
    source: Arc<S>,
    sink: ObservationSink,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<StateEventWatcher<S>>,
}

impl<S: StateStreamSource> StateEventWatcher<S> {
    pub fn new(source: Arc<S>, sink: ObservationSink) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            source,
            sink,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    async fn run_loop(self: Arc<Self>) {
        while !self.cancel.is_cancelled() {
            let Some(mut stream) = self.source.open_state_stream().await else {
                warn!("state event watcher: backend does not support a state stream, exiting");
                return;
            };

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        stream.stop().await;
                        return;
                    }
                    change = stream.next_change() => {
                        match change {
                            Some(change) => {
                                let partial = [
                                    ("state".to_string(), json!(change.state)),
                                    ("zone_state".to_string(), json!(change.zone_state)),
                                ]
                                .into_iter()
                                .collect();
                                if self.sink.send(Observation::modify(NAME, change.uuid, partial)).await.is_err() {
                                    stream.stop().await;
                                    return;
                                }
                            }
                            None => {
                                warn!("state event watcher: stream disconnected, restarting");
                                break;
                            }
                        }
                    }
                }
            }

            stream.stop().await;
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(RESTART_DELAY) => {}
            }
        }
    }
}

#[async_trait]
impl<S: StateStreamSource> Watcher for StateEventWatcher<S> {
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
#[path = "state_event_tests.rs"]
mod tests;
