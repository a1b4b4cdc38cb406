// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The four observation sources and the coalescer that deduplicates them.
//!
//! Watchers never talk to Inventory and never retry against it; they only
//! ever emit [`observation::Observation`]s on an [`observation::ObservationSink`].
//! Merging, deduplication, and the canonical `Created`/`Modified`/`Deleted`
//! events live in [`coalescer`].

pub mod coalescer;
pub mod event_stream;
pub mod filesystem;
pub mod observation;
pub mod periodic;
pub mod state_event;
pub mod watcher;

pub use coalescer::{Coalescer, CoalescedEvent};
pub use event_stream::EventStreamWatcher;
pub use filesystem::FilesystemWatcher;
pub use observation::{Observation, ObservationKind, ObservationSink};
pub use periodic::PeriodicPoller;
pub use state_event::StateEventWatcher;
pub use watcher::{Watcher, WatcherError};
