// SPDX-License-Identifier: MIT

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, mpsc::UnboundedSender};
use tokio::time::timeout;
use vma_adapters::LocalMgrError;
use vma_core::VmRecord;

use super::*;
use crate::observation::ObservationKind;

const WAIT: Duration = Duration::from_secs(3);

struct ScriptedStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>,
}

#[async_trait]
impl vma_adapters::EventStream for ScriptedStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    async fn stop(&mut self) {
        self.rx.close();
    }
}

/// A local-mgr fake that hands out one scripted stream session per call to
/// `open_event_stream`, then reports no further support once exhausted.
struct ScriptedLocalMgr {
    sessions: Mutex<VecDeque<(HashMap<VmUuid, VmRecord>, Vec<StreamEvent>)>>,
}

impl ScriptedLocalMgr {
    fn new(sessions: Vec<(HashMap<VmUuid, VmRecord>, Vec<StreamEvent>)>) -> Self {
        Self { sessions: Mutex::new(sessions.into()) }
    }

    fn push_events(tx: &UnboundedSender<StreamEvent>, events: Vec<StreamEvent>) {
        for event in events {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl LocalMgr for ScriptedLocalMgr {
    async fn load_one(&self, uuid: VmUuid) -> Result<VmRecord, LocalMgrError> {
        Err(LocalMgrError::NotFound(uuid))
    }

    async fn list_all(&self) -> Result<Vec<VmRecord>, LocalMgrError> {
        Ok(Vec::new())
    }

    async fn open_event_stream(&self) -> Option<EventStreamReady> {
        let (snapshot, events) = self.sessions.lock().pop_front()?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Self::push_events(&tx, events);
        drop(tx);
        Some(EventStreamReady { vms: snapshot, stream: Box::new(ScriptedStream { rx }) })
    }

    fn supports_event_stream(&self) -> bool {
        true
    }
}

async fn recv(rx: &mut mpsc::Receiver<Observation>) -> Observation {
    timeout(WAIT, rx.recv()).await.expect("timed out waiting for observation").expect("channel closed")
}

#[tokio::test]
async fn forwards_events_from_the_first_session_verbatim() {
    let uuid = VmUuid::new();
    let vm = VmRecord::builder(uuid).state("running").build();
    let local = Arc::new(ScriptedLocalMgr::new(vec![(HashMap::new(), vec![StreamEvent::Create { uuid, vm }])]));

    let (tx, mut rx) = mpsc::channel(16);
    let watcher = EventStreamWatcher::new(local, tx);
    watcher.start().await;

    let observed = recv(&mut rx).await;
    assert_eq!(observed.kind, ObservationKind::Create);
    assert_eq!(observed.uuid, uuid);

    watcher.stop().await;
}

#[tokio::test]
async fn restart_replays_the_gap_as_a_delta() {
    let v1 = VmUuid::new();
    let v2 = VmUuid::new();
    let vm1 = VmRecord::builder(v1).state("running").build();
    let vm2 = VmRecord::builder(v2).state("running").build();

    let local = Arc::new(ScriptedLocalMgr::new(vec![
        (HashMap::new(), vec![StreamEvent::Create { uuid: v1, vm: vm1 }]),
        (HashMap::from([(v2, vm2)]), vec![]),
    ]));

    let (tx, mut rx) = mpsc::channel(16);
    let watcher = EventStreamWatcher::new(local, tx);
    watcher.start().await;

    let first = recv(&mut rx).await;
    assert_eq!(first.kind, ObservationKind::Create);
    assert_eq!(first.uuid, v1);

    // the session disconnects, the watcher waits out RESTART_DELAY, then
    // reopens onto a snapshot where v1 is gone and v2 is new.
    let mut seen = vec![recv(&mut rx).await, recv(&mut rx).await];
    seen.sort_by_key(|o| o.kind as u8);

    let delete = seen.iter().find(|o| o.kind == ObservationKind::Delete).expect("expected a delete for v1");
    assert_eq!(delete.uuid, v1);
    let create = seen.iter().find(|o| o.kind == ObservationKind::Create).expect("expected a create for v2");
    assert_eq!(create.uuid, v2);

    watcher.stop().await;
}
