//! Online signal.
//!
//! A shared boolean the Decision Layer consults at write time and the flusher
//! re-checks before every replay attempt. Changes are observable through a
//! watch channel so the runner can flush as soon as connectivity returns.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::net::{HttpRequest, Transport};

#[derive(Debug, Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the signal. Subscribers are only woken on an actual change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

/// Probe reachability: any HTTP response means online, a transport error
/// means offline. Returns the new state.
pub async fn probe(connectivity: &Connectivity, transport: &dyn Transport, url: &str) -> bool {
  let online = transport
    .send(&HttpRequest::get(url, Default::default()))
    .await
    .is_ok();
  connectivity.set_online(online);
  online
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{HttpResponse, TransportError};
  use crate::testing::ScriptedTransport;

  #[tokio::test]
  async fn test_subscribers_see_changes() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();

    connectivity.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow());
    assert!(connectivity.is_online());
  }

  #[tokio::test]
  async fn test_probe_treats_any_response_as_online() {
    let connectivity = Connectivity::new(false);
    let transport = ScriptedTransport::new(vec![
      Ok(HttpResponse::new(503, "")),
      Err(TransportError::new("connection refused")),
    ]);

    assert!(probe(&connectivity, &transport, "http://h/health").await);
    assert!(connectivity.is_online());

    assert!(!probe(&connectivity, &transport, "http://h/health").await);
    assert!(!connectivity.is_online());
  }
}
