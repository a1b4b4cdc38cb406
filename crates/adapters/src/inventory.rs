// SPDX-License-Identifier: MIT

//! The Inventory HTTP client: the thin request layer the reconciliation
//! engine uses to read and write the central VM catalog for this node.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use vma_core::{VmRecord, VmUuid};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("network error talking to inventory: {0}")]
    Network(#[from] reqwest::Error),

    #[error("inventory returned an unexpected response shape: {0}")]
    Protocol(String),

    #[error("inventory server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("inventory rejected the record ({status}): {body}")]
    Validation { status: u16, body: String },
}

/// Request layer to Inventory. No retry lives here; callers (the
/// reconciliation engine) own backoff decisions.
#[async_trait]
pub trait InventoryClient: Send + Sync + 'static {
    /// VMs Inventory believes are active on `node_id`.
    async fn list_for_node(&self, node_id: VmUuid) -> Result<Vec<VmRecord>, InventoryError>;

    /// Atomic-per-call replace/update of the VM set for a node. Used only
    /// during initial reconciliation.
    async fn bulk_update_for_node(
        &self,
        node_id: VmUuid,
        vms: HashMap<VmUuid, VmRecord>,
    ) -> Result<(), InventoryError>;

    /// Per-VM update keyed by the record's own uuid.
    async fn update_one(&self, vm: &VmRecord) -> Result<(), InventoryError>;
}

#[derive(Serialize)]
struct BulkUpdateBody {
    vms: HashMap<VmUuid, VmRecord>,
}

/// `reqwest`-backed production client.
pub struct HttpInventoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInventoryClient {
    /// Builds the connection pool and a fixed `User-Agent` once, per
    /// `vm-agent/<CARGO_PKG_VERSION> (rust; node=<uuid>)`.
    pub fn new(base_url: impl Into<String>, node_id: VmUuid) -> Result<Self, InventoryError> {
        let user_agent = format!("vm-agent/{} (rust; node={})", env!("CARGO_PKG_VERSION"), node_id);
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client, base_url: base_url.into() })
    }

    async fn classify_error(resp: reqwest::Response) -> InventoryError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            InventoryError::Validation { status: status.as_u16(), body }
        } else {
            InventoryError::Server { status: status.as_u16(), body }
        }
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn list_for_node(&self, node_id: VmUuid) -> Result<Vec<VmRecord>, InventoryError> {
        let url = format!("{}/vms", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("server_uuid", node_id.to_string()), ("state", "active".to_string())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::classify_error(resp).await);
        }

        resp.json::<Vec<VmRecord>>().await.map_err(|e| InventoryError::Protocol(e.to_string()))
    }

    async fn bulk_update_for_node(
        &self,
        node_id: VmUuid,
        vms: HashMap<VmUuid, VmRecord>,
    ) -> Result<(), InventoryError> {
        let url = format!("{}/vms", self.base_url);
        let resp = self
            .client
            .put(&url)
            .query(&[("server_uuid", node_id.to_string())])
            .json(&BulkUpdateBody { vms })
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify_error(resp).await)
        }
    }

    async fn update_one(&self, vm: &VmRecord) -> Result<(), InventoryError> {
        let url = format!("{}/vms/{}", self.base_url, vm.uuid);
        let resp = self.client.put(&url).json(vm).send().await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify_error(resp).await)
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeInventoryClient;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use vma_core::{VmRecord, VmUuid};

    use super::{InventoryClient, InventoryError};

    #[derive(Debug, Clone)]
    pub enum Call {
        ListForNode(VmUuid),
        BulkUpdateForNode(VmUuid, HashMap<VmUuid, VmRecord>),
        UpdateOne(VmRecord),
    }

    /// Records every call and serves scripted responses, mirroring the
    /// teacher's `FakeNotifyAdapter` call-recorder convention.
    #[derive(Default)]
    pub struct FakeInventoryClient {
        state: Mutex<State>,
    }

    #[derive(Default)]
    struct State {
        calls: Vec<Call>,
        list_for_node: Vec<Result<Vec<VmRecord>, InventoryError>>,
        bulk_update: Vec<Result<(), InventoryError>>,
        update_one: Vec<Result<(), InventoryError>>,
    }

    impl FakeInventoryClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the next response to `list_for_node`; responses are
        /// consumed in FIFO order, with the last one sticking once the
        /// queue is drained.
        pub fn push_list_for_node(&self, result: Result<Vec<VmRecord>, InventoryError>) {
            self.state.lock().list_for_node.push(result);
        }

        pub fn push_bulk_update(&self, result: Result<(), InventoryError>) {
            self.state.lock().bulk_update.push(result);
        }

        pub fn push_update_one(&self, result: Result<(), InventoryError>) {
            self.state.lock().update_one.push(result);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().calls.clone()
        }

        fn take_or_repeat<T: Clone>(queue: &mut Vec<T>) -> Option<T> {
            if queue.len() > 1 {
                Some(queue.remove(0))
            } else {
                queue.first().cloned()
            }
        }
    }

    fn clone_result<T: Clone>(r: &Result<T, InventoryError>) -> Result<T, InventoryError> {
        match r {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(clone_error(e)),
        }
    }

    fn clone_error(e: &InventoryError) -> InventoryError {
        match e {
            InventoryError::Network(_) => InventoryError::Protocol("network error (fake)".to_string()),
            InventoryError::Protocol(s) => InventoryError::Protocol(s.clone()),
            InventoryError::Server { status, body } => InventoryError::Server { status: *status, body: body.clone() },
            InventoryError::Validation { status, body } => {
                InventoryError::Validation { status: *status, body: body.clone() }
            }
        }
    }

    #[async_trait]
    impl InventoryClient for FakeInventoryClient {
        async fn list_for_node(&self, node_id: VmUuid) -> Result<Vec<VmRecord>, InventoryError> {
            let mut state = self.state.lock();
            state.calls.push(Call::ListForNode(node_id));
            match Self::take_or_repeat(&mut state.list_for_node) {
                Some(r) => clone_result(&r),
                None => Ok(Vec::new()),
            }
        }

        async fn bulk_update_for_node(
            &self,
            node_id: VmUuid,
            vms: HashMap<VmUuid, VmRecord>,
        ) -> Result<(), InventoryError> {
            let mut state = self.state.lock();
            state.calls.push(Call::BulkUpdateForNode(node_id, vms));
            match Self::take_or_repeat(&mut state.bulk_update) {
                Some(r) => clone_result(&r),
                None => Ok(()),
            }
        }

        async fn update_one(&self, vm: &VmRecord) -> Result<(), InventoryError> {
            let mut state = self.state.lock();
            state.calls.push(Call::UpdateOne(vm.clone()));
            match Self::take_or_repeat(&mut state.update_one) {
                Some(r) => clone_result(&r),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
#[path = "inventory_tests.rs"]
mod tests;
