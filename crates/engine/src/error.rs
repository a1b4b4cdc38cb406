// SPDX-License-Identifier: MIT

//! Engine-level error type. Wraps the adapter error taxonomies for the
//! startup path's `?`-based propagation, plus the one case with no sensible
//! source error: the "VM vanished with no prior snapshot" invariant
//! violation described in §9 of the design notes.

use thiserror::Error;
use vma_adapters::{InventoryError, LocalMgrError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("local-mgr error: {0}")]
    LocalMgr(#[from] LocalMgrError),

    #[error("programming error: {0}")]
    Fatal(String),
}
