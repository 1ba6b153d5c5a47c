//! In-memory backend. Nothing survives the process; used for tests and
//! for running without a database.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{KvBackend, StorageError, StorageResult, UpdateFn};

#[derive(Debug, Default)]
pub struct MemoryBackend {
  entries: Mutex<HashMap<String, Value>>,
}

impl MemoryBackend {
  fn entries(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
    self
      .entries
      .lock()
      .map_err(|e| StorageError::backend(format!("lock poisoned: {}", e)))
  }
}

#[async_trait]
impl KvBackend for MemoryBackend {
  async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
    Ok(self.entries()?.get(key).cloned())
  }

  async fn put(&self, key: &str, value: &Value) -> StorageResult<()> {
    self.entries()?.insert(key.to_string(), value.clone());
    Ok(())
  }

  async fn delete(&self, key: &str) -> StorageResult<()> {
    self.entries()?.remove(key);
    Ok(())
  }

  async fn update(&self, key: &str, f: UpdateFn) -> StorageResult<bool> {
    let mut entries = self.entries()?;
    match f(entries.get(key).cloned())? {
      Some(next) => {
        entries.insert(key.to_string(), next);
        Ok(true)
      }
      None => Ok(false),
    }
  }
}
