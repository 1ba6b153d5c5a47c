//! Durable key-value store.
//!
//! Every other component persists through this layer:
//! - `KvBackend` is the injection point (SQLite on disk, memory in tests)
//! - `Store` is the typed facade that (de)serializes values as JSON
//!
//! Failures propagate to the caller. Swallowing is a policy decision of the
//! layers above (the snapshot cache treats writes as advisory).

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Trait for persistent storage backends.
///
/// Values are JSON documents. `put` overwrites; last write wins.
#[async_trait]
pub trait KvBackend: Send + Sync {
  /// Read the value stored under `key`, if any.
  async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

  /// Store `value` under `key`, replacing any previous value.
  async fn put(&self, key: &str, value: &Value) -> StorageResult<()>;

  /// Remove `key`. Removing a missing key is not an error.
  async fn delete(&self, key: &str) -> StorageResult<()>;

  /// Atomically read `key`, pass the current value to `f` and store what it
  /// returns. `None` from `f` leaves the key untouched.
  ///
  /// No other `update` or `put` on the same backend, in this process or
  /// another, may interleave. Returns whether a value was written.
  async fn update(&self, key: &str, f: UpdateFn) -> StorageResult<bool>;
}

/// Transformation applied by [`KvBackend::update`].
pub type UpdateFn = Box<dyn FnOnce(Option<Value>) -> StorageResult<Option<Value>> + Send>;

/// Typed handle over a shared backend.
#[derive(Clone)]
pub struct Store {
  backend: Arc<dyn KvBackend>,
}

impl Store {
  pub fn new(backend: impl KvBackend + 'static) -> Self {
    Self {
      backend: Arc::new(backend),
    }
  }

  pub fn from_arc(backend: Arc<dyn KvBackend>) -> Self {
    Self { backend }
  }

  /// Store backed by a fresh in-memory map.
  pub fn in_memory() -> Self {
    Self::new(MemoryBackend::default())
  }

  /// Read and decode the value under `key`.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
    check_key(key)?;
    match self.backend.get(key).await? {
      Some(value) => serde_json::from_value(value)
        .map(Some)
        .map_err(|e| StorageError::serialization(key, e)),
      None => Ok(None),
    }
  }

  /// Encode and store `value` under `key`.
  pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
    check_key(key)?;
    let value = serde_json::to_value(value).map_err(|e| StorageError::serialization(key, e))?;
    self.backend.put(key, &value).await
  }

  pub async fn delete(&self, key: &str) -> StorageResult<()> {
    check_key(key)?;
    self.backend.delete(key).await
  }

  /// Read-modify-write `key` as one atomic step.
  ///
  /// `f` sees the decoded current value; returning `None` skips the write.
  pub async fn update<T, F>(&self, key: &str, f: F) -> StorageResult<bool>
  where
    T: Serialize + DeserializeOwned + 'static,
    F: FnOnce(Option<T>) -> Option<T> + Send + 'static,
  {
    check_key(key)?;
    let owned_key = key.to_string();
    self
      .backend
      .update(
        key,
        Box::new(move |current| {
          let current = current
            .map(serde_json::from_value::<T>)
            .transpose()
            .map_err(|e| StorageError::serialization(&owned_key, e))?;
          match f(current) {
            Some(next) => serde_json::to_value(&next)
              .map(Some)
              .map_err(|e| StorageError::serialization(&owned_key, e)),
            None => Ok(None),
          }
        }),
      )
      .await
  }
}

fn check_key(key: &str) -> StorageResult<()> {
  if key.is_empty() {
    return Err(StorageError::EmptyKey);
  }
  Ok(())
}
