// SPDX-License-Identifier: MIT

//! Per-VM retry backoff. Each key owns at most one real
//! `tokio::task::JoinHandle`, enforcing the "at most one timer per key"
//! invariant structurally rather than by convention.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use vma_core::VmUuid;

struct RetryEntry {
    delay: Duration,
    handle: Option<JoinHandle<()>>,
}

/// Arms and tracks one backoff timer per `VmUuid`. `schedule` is a no-op if
/// a timer is already armed for that uuid; `clear` is called on the next
/// successful update and drops the accumulated delay along with the entry.
pub struct DelayScheduler {
    initial: Duration,
    max: Duration,
    entries: Mutex<HashMap<VmUuid, RetryEntry>>,
    weak_self: Weak<DelayScheduler>,
}

impl DelayScheduler {
    pub fn new(initial: Duration, max: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            initial,
            max,
            entries: Mutex::new(HashMap::new()),
            weak_self: weak_self.clone(),
        })
    }

    /// Arms a timer for `uuid` unless one is already pending. The wait
    /// duration is read before doubling the stored delay, so the sequence
    /// of waits across repeated failures is `initial, 2*initial, 4*initial,
    /// ...` clamped to `max`.
    pub fn schedule(&self, uuid: VmUuid, on_fire: impl FnOnce() + Send + 'static) {
        let wait = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(uuid).or_insert_with(|| RetryEntry { delay: self.initial, handle: None });
            if entry.handle.is_some() {
                return;
            }
            let wait = entry.delay;
            entry.delay = std::cmp::min(entry.delay.saturating_mul(2), self.max);
            wait
        };

        let Some(this) = self.weak_self.upgrade() else { return };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(entry) = this.entries.lock().get_mut(&uuid) {
                entry.handle = None;
            }
            on_fire();
        });

        if let Some(entry) = self.entries.lock().get_mut(&uuid) {
            entry.handle = Some(handle);
        }
    }

    /// Cancels and removes any pending timer/delay state for `uuid`,
    /// resetting its backoff to `initial` the next time it schedules.
    pub fn clear(&self, uuid: VmUuid) {
        if let Some(entry) = self.entries.lock().remove(&uuid) {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
    }

    /// Cancels every pending timer and forgets all accumulated delays.
    pub fn reset(&self) {
        for (_, entry) in self.entries.lock().drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
    }

    #[cfg(test)]
    pub fn current_delay(&self, uuid: VmUuid) -> Option<Duration> {
        self.entries.lock().get(&uuid).map(|e| e.delay)
    }

    #[cfg(test)]
    pub fn is_armed(&self, uuid: VmUuid) -> bool {
        self.entries.lock().get(&uuid).map(|e| e.handle.is_some()).unwrap_or(false)
    }
}
