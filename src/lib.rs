//! Offline-first data synchronization.
//!
//! - `cache`: read-through snapshot cache, serves the last good response when offline
//! - `outbox`: durable write queue with ordered, failure-classifying replay
//! - `sync`: the client facade and the send-now-or-defer decision for writes

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod logging;
pub mod net;
pub mod outbox;
pub mod runner;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SyncError};
pub use sync::{SyncClient, SyncOptions, WriteAction, WriteIntent, WriteOutcome};
