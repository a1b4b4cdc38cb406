// SPDX-License-Identifier: MIT

//! Fixtures shared by this crate's tests and, via the `test-support`
//! feature, by `vma-adapters`, `vma-watchers`, and `vma-engine`.

use crate::id::VmUuid;
use crate::vm_record::VmRecord;

/// A VM record for a node that happens to host nothing interesting: just
/// enough fields set to pass through the startup diff untouched.
pub fn running_vm(uuid: VmUuid) -> VmRecord {
    VmRecord::builder(uuid)
        .state("running")
        .zone_state("running")
        .last_modified("2026-01-01T00:00:00.000Z")
        .boot_timestamp("2026-01-01T00:00:00.000Z")
        .field("brand", serde_json::json!("joyent"))
        .field("quota", serde_json::json!(25))
        .build()
}

pub fn stopped_vm(uuid: VmUuid) -> VmRecord {
    let mut vm = running_vm(uuid);
    vm.state = Some("stopped".to_string());
    vm.zone_state = Some("installed".to_string());
    vm
}

pub fn destroyed_vm(uuid: VmUuid) -> VmRecord {
    running_vm(uuid).with_destroyed()
}
