// SPDX-License-Identifier: MIT

//! Field tables shared by the startup reconciler and the coalescer.
//!
//! Inventory silently back-fills a handful of fields with zero values when a
//! VM record omits them, so a VM that local-mgr reports *without* one of
//! these fields must not be treated as different from the Inventory copy
//! just because Inventory's copy carries the zero value. [`ALWAYS_SET_DEFAULT`]
//! is the table of those zero values; [`fields_differ`] is the comparison
//! that accounts for it.

use serde_json::{json, Value};

/// Fields the watchers track closely enough to participate in dedup and
/// startup diffing. Anything not in this list is carried through updates
/// but never drives a dedup or reconciliation decision on its own.
pub const PERIODIC_FIELDS: &[&str] = &[
    "brand",
    "datasets",
    "disks",
    "indestructible_zoneroot",
    "indestructible_delegated",
    "last_modified",
    "pid",
    "quota",
    "snapshots",
    "state",
    "uuid",
    "zfs_compression",
    "zfs_recsize",
    "zone_state",
    "zoneid",
];

/// The value Inventory back-fills for a field it never received from this
/// agent, or `None` if Inventory never defaults that field. Matches
/// Inventory's actual defaulting behavior: every listed field defaults to
/// `null` except `datasets`, which defaults to an empty array.
pub fn always_set_default(field: &str) -> Option<Value> {
    Some(match field {
        "alias" | "billing_id" | "cpu_cap" | "cpu_shares" | "create_timestamp" | "destroyed" | "image_uuid"
        | "last_modified" | "limit_priv" | "max_locked_memory" | "max_lwps" | "max_physical_memory" | "max_swap"
        | "owner_uuid" | "quota" | "ram" | "zfs_filesystem" | "zfs_io_priority" | "zpool" => Value::Null,
        "datasets" => json!([]),
        _ => return None,
    })
}

/// Compare one field as seen by local-mgr against the copy Inventory holds,
/// treating "absent locally, default remotely" as equal rather than a
/// difference worth an update.
pub fn fields_differ(field: &str, local: Option<&Value>, inventory: Option<&Value>) -> bool {
    match (local, inventory) {
        (None, None) => false,
        (Some(l), Some(r)) => l != r,
        (None, Some(r)) => always_set_default(field).as_ref() != Some(r),
        (Some(l), None) => always_set_default(field).as_ref() != Some(l),
    }
}

#[cfg(test)]
#[path = "defaults_tests.rs"]
mod tests;
