// SPDX-License-Identifier: MIT

//! Startup diff: compares local-mgr's view against Inventory's and builds
//! the bulk-update payload (§4.4 steps 6-7). Pure functions, no I/O, so
//! they're exercised directly without a fake adapter pair.

use std::collections::{HashMap, HashSet};

use vma_core::{comparison_view, fields_differ, ComparisonView, VmRecord, VmUuid, PERIODIC_FIELDS};

/// `true` if `local` and `inventory` disagree on any field either side
/// tracks, applying the `AlwaysSetDefaults` equivalence so an
/// Inventory-injected default isn't mistaken for a real difference.
fn records_differ(local: &VmRecord, inventory: &VmRecord) -> bool {
    let lview = comparison_view(local, PERIODIC_FIELDS);
    let iview = comparison_view(inventory, PERIODIC_FIELDS);
    views_differ(&lview, &iview)
}

fn views_differ(local: &ComparisonView, inventory: &ComparisonView) -> bool {
    let fields: HashSet<&String> = local.keys().chain(inventory.keys()).collect();
    fields.into_iter().any(|field| fields_differ(field, local.get(field), inventory.get(field)))
}

/// Builds the bulk-update payload for initial reconciliation: the full
/// local record for every VM that's new or diverges from Inventory's copy,
/// and a synthesized destroyed record for every VM Inventory still
/// believes exists but local-mgr no longer reports.
pub fn diff_for_bulk_update(
    local: &HashMap<VmUuid, VmRecord>,
    inventory: &HashMap<VmUuid, VmRecord>,
) -> HashMap<VmUuid, VmRecord> {
    let mut payload = HashMap::new();

    for (uuid, local_vm) in local {
        let needs_update = match inventory.get(uuid) {
            Some(inventory_vm) => records_differ(local_vm, inventory_vm),
            None => true,
        };
        if needs_update {
            payload.insert(*uuid, local_vm.clone());
        }
    }

    for (uuid, inventory_vm) in inventory {
        if !local.contains_key(uuid) {
            payload.insert(*uuid, inventory_vm.clone().with_destroyed());
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(uuid: VmUuid, quota: i64) -> VmRecord {
        VmRecord::builder(uuid).state("running").field("quota", serde_json::json!(quota)).build()
    }

    #[test]
    fn missing_from_inventory_is_included_verbatim() {
        let uuid = VmUuid::new();
        let local = HashMap::from([(uuid, vm(uuid, 10))]);
        let inventory = HashMap::new();

        let payload = diff_for_bulk_update(&local, &inventory);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload[&uuid], local[&uuid]);
    }

    #[test]
    fn missing_from_local_is_marked_destroyed() {
        let uuid = VmUuid::new();
        let local = HashMap::new();
        let inventory = HashMap::from([(uuid, vm(uuid, 10))]);

        let payload = diff_for_bulk_update(&local, &inventory);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload[&uuid].state.as_deref(), Some("destroyed"));
        assert_eq!(payload[&uuid].zone_state.as_deref(), Some("destroyed"));
    }

    #[test]
    fn identical_records_produce_no_payload_entry() {
        let uuid = VmUuid::new();
        let local = HashMap::from([(uuid, vm(uuid, 10))]);
        let inventory = HashMap::from([(uuid, vm(uuid, 10))]);

        assert!(diff_for_bulk_update(&local, &inventory).is_empty());
    }

    #[test]
    fn diverging_field_triggers_an_update() {
        let uuid = VmUuid::new();
        let local = HashMap::from([(uuid, vm(uuid, 10))]);
        let inventory = HashMap::from([(uuid, vm(uuid, 20))]);

        let payload = diff_for_bulk_update(&local, &inventory);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload[&uuid], local[&uuid]);
    }

    #[test]
    fn inventory_default_for_an_absent_local_field_is_not_a_difference() {
        let uuid = VmUuid::new();
        // local never reports quota; inventory carries the default null.
        let local_vm = VmRecord::builder(uuid).state("running").build();
        let mut inventory_vm = local_vm.clone();
        inventory_vm.set("quota", serde_json::Value::Null);

        let local = HashMap::from([(uuid, local_vm)]);
        let inventory = HashMap::from([(uuid, inventory_vm)]);

        assert!(diff_for_bulk_update(&local, &inventory).is_empty());
    }
}
