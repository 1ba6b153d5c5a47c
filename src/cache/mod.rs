//! Snapshot cache for reads.
//!
//! - Persists the last successful response per caller-chosen key
//! - Serves that snapshot when the network read fails, with no staleness bound
//! - Snapshot writes are best-effort; a failing store never fails a good read

mod layer;
mod traits;

pub use layer::SnapshotCache;
pub use traits::{CacheResult, CacheSource, Snapshot};
