// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared types for the VM inventory reconciliation agent: the clock
//! abstraction, VM identity and record types, and the default-value tables
//! used when diffing local-mgr's view of a VM against Inventory's.

pub mod clock;
pub mod defaults;
pub mod id;
pub mod vm_record;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use defaults::{always_set_default, fields_differ, PERIODIC_FIELDS};
pub use id::VmUuid;
pub use vm_record::{comparison_view, merge_partial, ComparisonView, Partial, VmRecord};
