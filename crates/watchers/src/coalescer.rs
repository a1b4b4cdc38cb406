// SPDX-License-Identifier: MIT

//! Deduplicates observations from every watcher into three canonical
//! events. Single-writer: one task owns `known`, matching the teacher's
//! "single logical actor" pattern for shared mutable state.

use std::collections::HashMap;

use tokio::sync::mpsc;
use vma_core::{merge_partial, Clock, Partial, VmRecord, VmUuid};

use crate::observation::{Observation, ObservationKind};

#[derive(Debug, Clone)]
pub enum CoalescedEvent {
    Created(VmRecord),
    Modified(VmRecord, Vec<String>),
    Deleted(VmUuid),
}

#[derive(Debug, Default, Clone)]
struct KnownVm {
    fields: Partial,
    destroyed_at: Option<u64>,
}

fn record_from_fields(uuid: VmUuid, fields: &Partial) -> VmRecord {
    let mut record = VmRecord::new(uuid);
    for (field, value) in fields {
        record.set(field, value.clone());
    }
    record
}

pub struct Coalescer<C: Clock> {
    known: parking_lot::Mutex<HashMap<VmUuid, KnownVm>>,
    clock: C,
}

impl<C: Clock> Coalescer<C> {
    pub fn new(clock: C) -> Self {
        Self { known: parking_lot::Mutex::new(HashMap::new()), clock }
    }

    /// Drains `obs_rx` until the channel closes, emitting canonical events
    /// on `events_tx`. Intended to run as its own task for the lifetime of
    /// the engine.
    pub async fn run(&self, mut obs_rx: mpsc::Receiver<Observation>, events_tx: mpsc::Sender<CoalescedEvent>) {
        while let Some(obs) = obs_rx.recv().await {
            if let Some(event) = self.handle(obs) {
                if events_tx.send(event).await.is_err() {
                    tracing::warn!("coalescer event receiver dropped; stopping");
                    return;
                }
            }
        }
    }

    fn handle(&self, obs: Observation) -> Option<CoalescedEvent> {
        match obs.kind {
            ObservationKind::Create => self.handle_create(obs.uuid, obs.partial),
            ObservationKind::Modify => self.handle_modify(obs.uuid, obs.partial),
            ObservationKind::Delete => self.handle_delete(obs.uuid),
        }
    }

    fn handle_create(&self, uuid: VmUuid, partial: Partial) -> Option<CoalescedEvent> {
        let mut known = self.known.lock();
        if known.get(&uuid).map(|vm| vm.destroyed_at.is_some()).unwrap_or(false) {
            known.remove(&uuid);
        }
        let emit_created = !known.contains_key(&uuid);
        let entry = known.entry(uuid).or_default();
        merge_partial(&mut entry.fields, &partial);
        emit_created.then(|| CoalescedEvent::Created(record_from_fields(uuid, &entry.fields)))
    }

    fn handle_modify(&self, uuid: VmUuid, partial: Partial) -> Option<CoalescedEvent> {
        let mut known = self.known.lock();
        let entry = known.entry(uuid).or_default();
        if entry.destroyed_at.is_some() {
            tracing::debug!(%uuid, "modify observed for a destroyed vm, dropping");
            return None;
        }
        let changed = merge_partial(&mut entry.fields, &partial);
        if changed.is_empty() {
            return None;
        }
        Some(CoalescedEvent::Modified(record_from_fields(uuid, &entry.fields), changed))
    }

    fn handle_delete(&self, uuid: VmUuid) -> Option<CoalescedEvent> {
        let mut known = self.known.lock();
        let entry = known.entry(uuid).or_default();
        if entry.destroyed_at.is_some() {
            tracing::debug!(%uuid, "delete observed for an already-destroyed vm, dropping");
            return None;
        }
        entry.destroyed_at = Some(self.clock.epoch_ms());
        Some(CoalescedEvent::Deleted(uuid))
    }

    /// Drops all dedup state. Called when the engine stops or resets.
    pub fn reset(&self) {
        self.known.lock().clear();
    }
}

#[cfg(test)]
#[path = "coalescer_tests.rs"]
mod tests;
