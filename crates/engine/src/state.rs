// SPDX-License-Identifier: MIT

//! Explicit engine lifecycle states, replacing the source's tri-state
//! `ready` boolean (see `SPEC_FULL.md` §4.4/§9). Every ingress path —
//! `queue_vm`, `process_one`, the event-buffering path, the startup retry
//! loop — matches on this enum once and commits to the matched branch.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Startup reconciliation (steps 3-9 of §4.4) is in progress. Incoming
    /// coalesced events are buffered into `dirty`, never enqueued.
    Initializing,
    /// Startup succeeded. Events flow straight to the update queue.
    Ready,
    /// `stop()` has run. No further processing or updates will occur; the
    /// engine may not be restarted.
    Stopped,
}
