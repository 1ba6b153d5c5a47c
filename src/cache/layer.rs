//! Read-through snapshot cache.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::net::{Headers, HttpRequest, Transport};
use crate::outbox::RESERVED_PREFIX;
use crate::store::Store;

use super::traits::{CacheResult, Snapshot};

/// Cache layer that wraps network reads with a durable fallback.
///
/// Network first, always. A successful response refreshes the snapshot; any
/// failure serves the snapshot, however old. Freshness is never checked.
#[derive(Clone)]
pub struct SnapshotCache {
  store: Store,
  transport: Arc<dyn Transport>,
}

impl SnapshotCache {
  pub fn new(store: Store, transport: Arc<dyn Transport>) -> Self {
    Self { store, transport }
  }

  /// Read `url`, persisting the parsed body under `cache_key` on success and
  /// serving the stored snapshot on failure.
  ///
  /// With no snapshot, the original failure is returned.
  pub async fn read_through(
    &self,
    url: &str,
    headers: &Headers,
    cache_key: &str,
  ) -> Result<CacheResult<Value>> {
    validate_key(cache_key)?;

    let failure = match self.fetch(url, headers).await {
      Ok(value) => {
        self.save(cache_key, &value).await;
        return Ok(CacheResult::from_network(value));
      }
      Err(e) => e,
    };

    match self.store.get::<Snapshot>(cache_key).await {
      Ok(Some(snapshot)) => {
        warn!(key = cache_key, error = %failure, saved_at = %snapshot.saved_at, "serving cached snapshot");
        Ok(CacheResult::offline(snapshot.value, snapshot.saved_at))
      }
      Ok(None) => Err(failure),
      Err(storage) => {
        warn!(key = cache_key, error = %storage, "snapshot lookup failed");
        Err(failure)
      }
    }
  }

  /// Last stored snapshot, without touching the network.
  pub async fn snapshot(&self, cache_key: &str) -> Result<Option<Snapshot>> {
    validate_key(cache_key)?;
    Ok(self.store.get(cache_key).await?)
  }

  async fn fetch(&self, url: &str, headers: &Headers) -> Result<Value> {
    let response = self
      .transport
      .send(&HttpRequest::get(url, headers.clone()))
      .await?;

    if !response.is_success() {
      return Err(SyncError::from_response(&response));
    }

    Ok(response.json()?)
  }

  /// Cache writes are advisory: failures are logged and dropped.
  async fn save(&self, cache_key: &str, value: &Value) {
    let snapshot = Snapshot {
      key: cache_key.to_string(),
      value: value.clone(),
      saved_at: chrono::Utc::now(),
    };

    match self.store.put(cache_key, &snapshot).await {
      Ok(()) => debug!(key = cache_key, "snapshot saved"),
      Err(e) => warn!(key = cache_key, error = %e, "failed to save snapshot"),
    }
  }
}

fn validate_key(key: &str) -> Result<()> {
  if key.is_empty() {
    return Err(SyncError::InvalidKey {
      key: key.to_string(),
      reason: "cache key must not be empty",
    });
  }
  if key.starts_with(RESERVED_PREFIX) {
    return Err(SyncError::InvalidKey {
      key: key.to_string(),
      reason: "prefix is reserved for the outbox",
    });
  }
  Ok(())
}
