// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use vma_core::{VmRecord, VmUuid};

use super::fake::Call;
use super::*;

#[tokio::test]
async fn fake_records_list_for_node_calls() {
    let client = FakeInventoryClient::new();
    let node = VmUuid::new();
    client.list_for_node(node).await.unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], Call::ListForNode(_)));
}

#[tokio::test]
async fn fake_defaults_list_for_node_to_empty() {
    let client = FakeInventoryClient::new();
    let vms = client.list_for_node(VmUuid::new()).await.unwrap();
    assert!(vms.is_empty());
}

#[tokio::test]
async fn fake_serves_scripted_list_for_node_response() {
    let client = FakeInventoryClient::new();
    let vm = VmRecord::new(VmUuid::new());
    client.push_list_for_node(Ok(vec![vm.clone()]));

    let vms = client.list_for_node(VmUuid::new()).await.unwrap();
    assert_eq!(vms, vec![vm]);
}

#[tokio::test]
async fn fake_last_scripted_response_repeats() {
    let client = FakeInventoryClient::new();
    client.push_update_one(Err(InventoryError::Server { status: 503, body: "down".into() }));

    let vm = VmRecord::new(VmUuid::new());
    assert!(client.update_one(&vm).await.is_err());
    assert!(client.update_one(&vm).await.is_err());
}

#[tokio::test]
async fn fake_bulk_update_records_payload() {
    let client = FakeInventoryClient::new();
    let node = VmUuid::new();
    let vm = VmRecord::new(VmUuid::new());
    let mut payload = HashMap::new();
    payload.insert(vm.uuid, vm.clone());

    client.bulk_update_for_node(node, payload.clone()).await.unwrap();

    let calls = client.calls();
    match &calls[0] {
        Call::BulkUpdateForNode(got_node, got_vms) => {
            assert_eq!(*got_node, node);
            assert_eq!(got_vms, &payload);
        }
        _ => panic!("expected BulkUpdateForNode"),
    }
}
