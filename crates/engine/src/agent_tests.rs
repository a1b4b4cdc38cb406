// SPDX-License-Identifier: MIT

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use vma_adapters::{FakeLocalMgr, InventoryError};
use vma_watchers::observation::record_to_partial;
use vma_watchers::Observation;

use super::*;

/// A hand-written Inventory double local to this test file, mirroring the
/// watchers crate's own per-test-file `Scripted*` convention: full typed
/// access to recorded payloads, rather than routing through
/// `vma_adapters::FakeInventoryClient`'s opaque call log.
#[derive(Default)]
struct TestInventory {
    list_responses: Mutex<VecDeque<Result<Vec<VmRecord>, InventoryError>>>,
    bulk_payloads: Mutex<Vec<HashMap<VmUuid, VmRecord>>>,
    bulk_responses: Mutex<VecDeque<Result<(), InventoryError>>>,
    update_payloads: Mutex<Vec<VmRecord>>,
    update_responses: Mutex<VecDeque<Result<(), InventoryError>>>,
}

#[async_trait]
impl InventoryClient for TestInventory {
    async fn list_for_node(&self, _node_id: VmUuid) -> Result<Vec<VmRecord>, InventoryError> {
        match self.list_responses.lock().pop_front() {
            Some(r) => r,
            None => Ok(Vec::new()),
        }
    }

    async fn bulk_update_for_node(
        &self,
        _node_id: VmUuid,
        vms: HashMap<VmUuid, VmRecord>,
    ) -> Result<(), InventoryError> {
        self.bulk_payloads.lock().push(vms);
        match self.bulk_responses.lock().pop_front() {
            Some(r) => r,
            None => Ok(()),
        }
    }

    async fn update_one(&self, vm: &VmRecord) -> Result<(), InventoryError> {
        self.update_payloads.lock().push(vm.clone());
        match self.update_responses.lock().pop_front() {
            Some(r) => r,
            None => Ok(()),
        }
    }
}

fn server_error() -> InventoryError {
    InventoryError::Server { status: 503, body: "down".into() }
}

async fn wait_for_paused(mut cond: impl FnMut() -> bool, budget: Duration) {
    let step = Duration::from_millis(5);
    let mut waited = Duration::ZERO;
    while !cond() {
        tokio::time::advance(step).await;
        tokio::task::yield_now().await;
        waited += step;
        if waited >= budget {
            panic!("condition not satisfied within {budget:?}");
        }
    }
}

async fn wait_for_update_calls(inventory: &TestInventory, n: usize) {
    for _ in 0..400 {
        if inventory.update_payloads.lock().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {n} update_one calls, got {}", inventory.update_payloads.lock().len());
}

fn test_config() -> AgentConfig {
    AgentConfig { node_id: VmUuid::new(), initial_retry_delay: Duration::from_millis(100), max_retry_delay: Duration::from_secs(10) }
}

#[tokio::test]
async fn s1_missing_from_inventory_is_pushed_verbatim() {
    let uuid = VmUuid::new();
    let vm = VmRecord::builder(uuid).state("running").zone_state("running").build();

    let inventory = Arc::new(TestInventory::default());
    let local = Arc::new(FakeLocalMgr::new());
    local.insert(vm.clone());

    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local);
    engine.run().await;

    assert_eq!(engine.state(), EngineState::Ready);
    let payloads = inventory.bulk_payloads.lock();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].len(), 1);
    assert_eq!(payloads[0][&uuid], vm);
    assert!(inventory.update_payloads.lock().is_empty());
}

#[tokio::test]
async fn s2_missing_from_local_is_marked_destroyed() {
    let uuid = VmUuid::new();
    let vm = VmRecord::builder(uuid).state("running").zone_state("running").build();

    let inventory = Arc::new(TestInventory::default());
    inventory.list_responses.lock().push_back(Ok(vec![vm.clone()]));
    let local = Arc::new(FakeLocalMgr::new());

    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local);
    engine.run().await;

    let payloads = inventory.bulk_payloads.lock();
    assert_eq!(payloads.len(), 1);
    let got = &payloads[0][&uuid];
    assert_eq!(got.state.as_deref(), Some("destroyed"));
    assert_eq!(got.zone_state.as_deref(), Some("destroyed"));
}

#[tokio::test]
async fn identical_records_produce_no_startup_put() {
    let uuid = VmUuid::new();
    let vm = VmRecord::builder(uuid).state("running").build();

    let inventory = Arc::new(TestInventory::default());
    inventory.list_responses.lock().push_back(Ok(vec![vm.clone()]));
    let local = Arc::new(FakeLocalMgr::new());
    local.insert(vm);

    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local);
    engine.run().await;

    assert!(inventory.bulk_payloads.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn s4_flapping_list_for_node_retries_with_backoff_then_succeeds() {
    let inventory = Arc::new(TestInventory::default());
    for _ in 0..5 {
        inventory.list_responses.lock().push_back(Err(server_error()));
    }
    inventory.list_responses.lock().push_back(Ok(Vec::new()));

    let local = Arc::new(FakeLocalMgr::new());
    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local);

    let engine_for_run = Arc::clone(&engine);
    let run_handle = tokio::spawn(async move { engine_for_run.run().await });

    wait_for_paused(|| engine.state() == EngineState::Ready, Duration::from_secs(30)).await;
    run_handle.await.unwrap();

    // every queued response (five failures, one success) was consumed.
    assert!(inventory.list_responses.lock().is_empty());
}

#[tokio::test]
async fn create_modify_delete_lifecycle_produces_one_put_per_transition() {
    let uuid = VmUuid::new();
    let inventory = Arc::new(TestInventory::default());
    let local = Arc::new(FakeLocalMgr::new());

    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local.clone());
    engine.run().await;
    assert_eq!(engine.state(), EngineState::Ready);

    let sink = engine.observation_sink();

    let vm1 = VmRecord::builder(uuid).state("running").build();
    local.insert(vm1.clone());
    sink.send(Observation::create("test", uuid, record_to_partial(&vm1))).await.unwrap();
    wait_for_update_calls(&inventory, 1).await;

    let mut vm2 = vm1.clone();
    vm2.set("quota", serde_json::json!(1000));
    local.insert(vm2.clone());
    sink.send(Observation::modify("test", uuid, vm2.extra.clone())).await.unwrap();
    wait_for_update_calls(&inventory, 2).await;

    let mut vm3 = vm2.clone();
    vm3.set("cpu_cap", serde_json::json!(800));
    local.insert(vm3.clone());
    sink.send(Observation::modify("test", uuid, vm3.extra.clone())).await.unwrap();
    wait_for_update_calls(&inventory, 3).await;

    let mut vm4 = vm3.clone();
    vm4.extra.remove("cpu_cap");
    local.insert(vm4.clone());
    let mut removal = serde_json::Map::new();
    removal.insert("cpu_cap".to_string(), serde_json::Value::Null);
    sink.send(Observation::modify("test", uuid, removal)).await.unwrap();
    wait_for_update_calls(&inventory, 4).await;

    local.remove(uuid);
    sink.send(Observation::delete("test", uuid)).await.unwrap();
    wait_for_update_calls(&inventory, 5).await;

    let calls = inventory.update_payloads.lock();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[4].state.as_deref(), Some("destroyed"));
    assert_eq!(calls[4].zone_state.as_deref(), Some("destroyed"));
    assert!(inventory.bulk_payloads.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn s5_per_vm_retry_doubles_then_resets_on_success() {
    let uuid = VmUuid::new();
    let vm = VmRecord::builder(uuid).state("running").build();

    let inventory = Arc::new(TestInventory::default());
    for _ in 0..3 {
        inventory.update_responses.lock().push_back(Err(server_error()));
    }
    inventory.update_responses.lock().push_back(Ok(()));

    let local = Arc::new(FakeLocalMgr::new());
    local.insert(vm.clone());

    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local);
    engine.run().await;
    assert_eq!(engine.state(), EngineState::Ready);

    let sink = engine.observation_sink();
    sink.send(Observation::modify("test", uuid, record_to_partial(&vm))).await.unwrap();

    wait_for_paused(|| inventory.update_payloads.lock().len() >= 4, Duration::from_secs(10)).await;
    assert_eq!(inventory.update_payloads.lock().len(), 4);
}

#[tokio::test]
async fn stop_prevents_further_updates() {
    let uuid = VmUuid::new();
    let vm = VmRecord::builder(uuid).state("running").build();

    let inventory = Arc::new(TestInventory::default());
    let local = Arc::new(FakeLocalMgr::new());
    local.insert(vm.clone());

    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local.clone());
    engine.run().await;

    engine.stop().await;
    assert_eq!(engine.state(), EngineState::Stopped);

    let sink = engine.observation_sink();
    let _ = sink.send(Observation::modify("test", uuid, record_to_partial(&vm))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(inventory.update_payloads.lock().is_empty());
}

#[tokio::test]
async fn vanished_vm_with_no_prior_snapshot_drops_silently_without_panicking() {
    let uuid = VmUuid::new();
    let inventory = Arc::new(TestInventory::default());
    let local = Arc::new(FakeLocalMgr::new());

    let engine = ReconciliationEngine::new(test_config(), inventory.clone(), local);
    engine.run().await;

    let sink = engine.observation_sink();
    sink.send(Observation::delete("test", uuid)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(inventory.update_payloads.lock().is_empty());
}
