//! Notifications emitted to collaborators (UI refresh, badge counts).

use serde::ser::{Serialize, SerializeMap, Serializer};
use tokio::sync::broadcast;
use tracing::debug;

/// Events the subsystem publishes upward.
///
/// Serializes as the wire name under `event` next to the payload:
/// `{"event":"flushed:leave","count":2}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  /// A write was stored in the outbox
  Queued { module: String, id: String },
  /// A flush pass completed at least one item
  Flushed { count: usize, modules: Vec<String> },
  /// Per-module share of a flush pass, for selective refresh
  ModuleFlushed { module: String, count: usize },
}

impl Notification {
  /// Wire name: `queued`, `flushed` or `flushed:<module>`.
  pub fn name(&self) -> String {
    match self {
      Self::Queued { .. } => "queued".to_string(),
      Self::Flushed { .. } => "flushed".to_string(),
      Self::ModuleFlushed { module, .. } => format!("flushed:{}", module),
    }
  }
}

impl Serialize for Notification {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    map.serialize_entry("event", &self.name())?;
    match self {
      Self::Queued { module, id } => {
        map.serialize_entry("module", module)?;
        map.serialize_entry("id", id)?;
      }
      Self::Flushed { count, modules } => {
        map.serialize_entry("count", count)?;
        map.serialize_entry("modules", modules)?;
      }
      Self::ModuleFlushed { count, .. } => {
        map.serialize_entry("count", count)?;
      }
    }
    map.end()
  }
}

/// Listener registry. Each subscriber receives every notification sent
/// after it subscribed; slow subscribers lose the oldest ones.
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: broadcast::Sender<Notification>,
}

impl Notifier {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.tx.subscribe()
  }

  pub fn emit(&self, notification: Notification) {
    debug!(event = %notification.name(), "notify");
    // No subscribers is fine
    let _ = self.tx.send(notification);
  }
}

impl Default for Notifier {
  fn default() -> Self {
    Self::new(64)
  }
}
