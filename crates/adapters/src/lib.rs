// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Concrete adapters for the two external collaborators: Inventory (over
//! HTTP) and local-mgr (over a filesystem VM-config tree).

pub mod inventory;
pub mod localmgr;

pub use inventory::{HttpInventoryClient, InventoryClient, InventoryError};
pub use localmgr::{EventStream, EventStreamReady, FsLocalMgr, LocalMgr, LocalMgrError, StreamEvent};

#[cfg(any(test, feature = "test-support"))]
pub use inventory::FakeInventoryClient;
#[cfg(any(test, feature = "test-support"))]
pub use localmgr::FakeLocalMgr;
