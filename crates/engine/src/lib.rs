// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The reconciliation engine: startup diffing against Inventory, the
//! serial per-VM update dispatcher, and the backoff/retry machinery that
//! backs it.

pub mod agent;
pub mod error;
pub mod queue;
pub mod reconcile;
pub mod retry;
pub mod state;

pub use agent::{AgentConfig, ReconciliationEngine};
pub use error::EngineError;
pub use queue::UpdateQueue;
pub use retry::DelayScheduler;
pub use state::EngineState;
