// SPDX-License-Identifier: MIT

//! The VM attribute record exchanged between local-mgr, the watchers, and
//! Inventory.
//!
//! `VmRecord` keeps a handful of well-known fields as typed accessors —
//! every algorithm in this crate reads `uuid`, `state`, `zone_state`,
//! `last_modified`, `boot_timestamp`, or `hidden` — and flattens everything
//! else into `extra`. Inventory's schema evolves independently of this
//! agent, so unknown fields must survive a load/store round-trip untouched
//! rather than being dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::VmUuid;

/// A partial observation of VM fields, as produced by a watcher or merged by
/// the coalescer. Unlike [`VmRecord`] this never claims to be complete.
pub type Partial = serde_json::Map<String, Value>;

/// The full attribute set for one VM, as reported by local-mgr or Inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub uuid: VmUuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_timestamp: Option<String>,
    /// Flagged by local-mgr as excluded from inventory. Never leaves the
    /// LocalMgr adapter boundary; watchers and Inventory never see a hidden
    /// VM's record, so this is not expected to round-trip through Inventory.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// Everything else: datasets, disks, nics, snapshots, metadata maps,
    /// billing/quota fields, zfs_* knobs, and any field Inventory or
    /// local-mgr adds in the future.
    #[serde(flatten)]
    pub extra: Partial,
}

impl VmRecord {
    pub fn new(uuid: VmUuid) -> Self {
        Self {
            uuid,
            state: None,
            zone_state: None,
            last_modified: None,
            boot_timestamp: None,
            hidden: false,
            extra: Partial::new(),
        }
    }

    /// Read a field by name, well-known or not.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "uuid" => Some(Value::String(self.uuid.to_string())),
            "state" => self.state.clone().map(Value::String),
            "zone_state" => self.zone_state.clone().map(Value::String),
            "last_modified" => self.last_modified.clone().map(Value::String),
            "boot_timestamp" => self.boot_timestamp.clone().map(Value::String),
            _ => self.extra.get(field).cloned(),
        }
    }

    /// Set a field by name, routing to the typed slot when well-known.
    pub fn set(&mut self, field: &str, value: Value) {
        match field {
            "state" => self.state = value.as_str().map(str::to_string),
            "zone_state" => self.zone_state = value.as_str().map(str::to_string),
            "last_modified" => self.last_modified = value.as_str().map(str::to_string),
            "boot_timestamp" => self.boot_timestamp = value.as_str().map(str::to_string),
            "uuid" => {}
            _ => {
                self.extra.insert(field.to_string(), value);
            }
        }
    }

    /// Overwrite `state` and `zone_state` to `"destroyed"`, as the agent does
    /// whenever it synthesizes a destruction record for a VM that vanished
    /// from local-mgr but is still believed present by Inventory.
    pub fn mark_destroyed(&mut self) {
        self.state = Some("destroyed".to_string());
        self.zone_state = Some("destroyed".to_string());
    }

    pub fn with_destroyed(mut self) -> Self {
        self.mark_destroyed();
        self
    }

    /// Project this record to just the named fields, for deduplication or
    /// diffing. Fields absent on this record are omitted, not null-filled.
    pub fn project(&self, fields: &[&str]) -> Partial {
        let mut out = Partial::new();
        for &field in fields {
            if let Some(v) = self.get(field) {
                out.insert(field.to_string(), v);
            }
        }
        out
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn builder(uuid: VmUuid) -> VmRecordBuilder {
        VmRecordBuilder::new(uuid)
    }
}

/// A flattened, sorted view of a [`VmRecord`] used only for startup and
/// coalescer diffing. `BTreeMap` gives deterministic iteration order so
/// diffs are reproducible in tests.
pub type ComparisonView = BTreeMap<String, Value>;

/// Build a [`ComparisonView`] from the union of watcher-tracked fields plus
/// `boot_timestamp` (needed to detect an in-place reboot between snapshots).
pub fn comparison_view(vm: &VmRecord, fields: &[&str]) -> ComparisonView {
    let mut view: ComparisonView = fields.iter().filter_map(|&f| vm.get(f).map(|v| (f.to_string(), v))).collect();
    if let Some(v) = vm.get("boot_timestamp") {
        view.insert("boot_timestamp".to_string(), v);
    }
    view
}

/// Merge `incoming` into `stored`, enforcing the newer-last-modified rule:
/// if both carry `last_modified` and the stored value is strictly greater,
/// the whole partial is dropped (out-of-order delivery, ignore it).
/// Otherwise each field in `incoming` replaces the stored value if
/// structurally different. Returns the names of fields that actually
/// changed, so callers can suppress a notification when nothing did.
pub fn merge_partial(stored: &mut Partial, incoming: &Partial) -> Vec<String> {
    if let (Some(stored_lm), Some(incoming_lm)) = (stored.get("last_modified"), incoming.get("last_modified")) {
        if stored_lm > incoming_lm {
            return Vec::new();
        }
    }

    let mut changed = Vec::new();
    for (field, value) in incoming {
        if stored.get(field) != Some(value) {
            stored.insert(field.clone(), value.clone());
            changed.push(field.clone());
        }
    }
    changed
}

/// Test-only builder, written by hand since `VmRecord`'s flatten field
/// doesn't fit a generic field-group builder shape.
#[cfg(any(test, feature = "test-support"))]
pub struct VmRecordBuilder {
    record: VmRecord,
}

#[cfg(any(test, feature = "test-support"))]
impl VmRecordBuilder {
    pub fn new(uuid: VmUuid) -> Self {
        Self { record: VmRecord::new(uuid) }
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.record.state = Some(state.into());
        self
    }

    pub fn zone_state(mut self, zone_state: impl Into<String>) -> Self {
        self.record.zone_state = Some(zone_state.into());
        self
    }

    pub fn last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.record.last_modified = Some(last_modified.into());
        self
    }

    pub fn boot_timestamp(mut self, boot_timestamp: impl Into<String>) -> Self {
        self.record.boot_timestamp = Some(boot_timestamp.into());
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.record.hidden = hidden;
        self
    }

    pub fn field(mut self, field: &str, value: Value) -> Self {
        self.record.set(field, value);
        self
    }

    pub fn build(self) -> VmRecord {
        self.record
    }
}

#[cfg(test)]
#[path = "vm_record_tests.rs"]
mod tests;
