// SPDX-License-Identifier: MIT

//! The raw events watchers emit before the coalescer deduplicates them.

use tokio::sync::mpsc;
use vma_core::{Partial, VmRecord, VmUuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Create,
    Modify,
    Delete,
}

/// One watcher's view of a single VM changing. `partial` contains only the
/// fields that watcher is confident changed; it is empty for `Delete`.
#[derive(Debug, Clone)]
pub struct Observation {
    pub uuid: VmUuid,
    pub kind: ObservationKind,
    pub partial: Partial,
    pub watcher: &'static str,
}

impl Observation {
    pub fn create(watcher: &'static str, uuid: VmUuid, partial: Partial) -> Self {
        Self { uuid, kind: ObservationKind::Create, partial, watcher }
    }

    pub fn modify(watcher: &'static str, uuid: VmUuid, partial: Partial) -> Self {
        Self { uuid, kind: ObservationKind::Modify, partial, watcher }
    }

    pub fn delete(watcher: &'static str, uuid: VmUuid) -> Self {
        Self { uuid, kind: ObservationKind::Delete, partial: Partial::new(), watcher }
    }
}

/// Watchers forward observations over this channel rather than through a
/// raw callback, matching the teacher's message-passing convention for
/// cross-task communication.
pub type ObservationSink = mpsc::Sender<Observation>;

/// Flatten a full [`VmRecord`] into a [`Partial`], for watchers (event
/// stream, reference local-mgr reads) that have the whole record in hand
/// and want to report every field as "confident it changed" rather than a
/// hand-picked subset.
pub fn record_to_partial(vm: &VmRecord) -> Partial {
    serde_json::to_value(vm).ok().and_then(|v| v.as_object().cloned()).unwrap_or_default()
}
