//! # kvdrop-core
//!
//! Pure logic for kvdrop (no I/O, instant tests).
//!
//! This crate implements the change-detection state machine and retry
//! arithmetic without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. [`SyncState`] is a plain value: a tick receives the
//! previous state and yields the next one, so there is no hidden singleton
//! and several monitors can run side by side.
//!
//! The actual I/O (remote store, local resource) is performed by
//! `kvdrop-client`, which executes the [`Plan`]s produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod clock;
pub mod state;

pub use backoff::RetryPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use state::{Plan, SyncEvent, SyncMode, SyncState, TickOutcome, TickPhase};
