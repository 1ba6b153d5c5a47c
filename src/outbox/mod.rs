//! Write outbox: durable queue plus ordered replay.

mod flusher;
mod item;
mod queue;

pub use flusher::{classify, Disposition, FlushReport, Flusher, RetryPolicy, StopReason};
pub use item::{OutboxItem, PendingWrite};
pub use queue::{OutboxQueue, RESERVED_PREFIX};
