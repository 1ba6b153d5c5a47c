//! SQLite-backed durable store.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{KvBackend, StorageError, StorageResult, UpdateFn};

/// How long a writer waits for another connection's transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Schema for the key-value namespace.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-based storage implementation.
///
/// Writes are committed before `put` returns (WAL journal, `synchronous=FULL`),
/// so queued writes survive a process restart.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> StorageResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|e| {
        StorageError::backend(format!(
          "failed to create database directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    debug!(path = %path.display(), "opened sqlite store");
    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> StorageResult<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  /// Get the default database path.
  pub fn default_path() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError::backend("could not determine data directory"))?;

    Ok(data_dir.join("offsync").join("offsync.db"))
  }

  fn with_connection(conn: Connection) -> StorageResult<Self> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::backend(format!("lock poisoned: {}", e)))
  }
}

#[async_trait]
impl KvBackend for SqliteBackend {
  async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
    let conn = self.conn()?;
    read_value(&conn, key)
  }

  async fn put(&self, key: &str, value: &Value) -> StorageResult<()> {
    let conn = self.conn()?;
    write_value(&conn, key, value)
  }

  async fn delete(&self, key: &str) -> StorageResult<()> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    Ok(())
  }

  async fn update(&self, key: &str, f: UpdateFn) -> StorageResult<bool> {
    let mut conn = self.conn()?;
    // IMMEDIATE takes the write lock up front, so other processes on the
    // same file wait instead of reading a value about to change.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let written = match f(read_value(&tx, key)?)? {
      Some(next) => {
        write_value(&tx, key, &next)?;
        true
      }
      None => false,
    };

    tx.commit()?;
    Ok(written)
  }
}

fn read_value(conn: &Connection, key: &str) -> StorageResult<Option<Value>> {
  let data: Option<Vec<u8>> = conn
    .query_row(
      "SELECT value FROM kv_store WHERE key = ?",
      params![key],
      |row| row.get(0),
    )
    .optional()?;

  match data {
    Some(bytes) => serde_json::from_slice(&bytes)
      .map(Some)
      .map_err(|e| StorageError::serialization(key, e)),
    None => Ok(None),
  }
}

fn write_value(conn: &Connection, key: &str, value: &Value) -> StorageResult<()> {
  let data = serde_json::to_vec(value).map_err(|e| StorageError::serialization(key, e))?;
  conn.execute(
    "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
     VALUES (?, ?, datetime('now'))",
    params![key, data],
  )?;
  debug!(key, bytes = data.len(), "stored value");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Store;
  use serde_json::json;

  #[tokio::test]
  async fn test_round_trip_in_memory() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend
      .put("leave:list", &json!([{"id": 1}, {"id": 2}]))
      .await
      .unwrap();

    let read = backend.get("leave:list").await.unwrap();
    assert_eq!(read, Some(json!([{"id": 1}, {"id": 2}])));
  }

  #[tokio::test]
  async fn test_overwrite_and_delete() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.put("k", &json!("a")).await.unwrap();
    backend.put("k", &json!("b")).await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), Some(json!("b")));

    backend.delete("k").await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("offsync.db");

    {
      let store = Store::new(SqliteBackend::open(&path).unwrap());
      store
        .put("overtime:summary:2024-05", &json!({"totalHours": 12}))
        .await
        .unwrap();
    }

    let store = Store::new(SqliteBackend::open(&path).unwrap());
    let read: Option<Value> = store.get("overtime:summary:2024-05").await.unwrap();
    assert_eq!(read, Some(json!({"totalHours": 12})));
  }

  #[tokio::test]
  async fn test_update_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsync.db");
    let first = Store::new(SqliteBackend::open(&path).unwrap());
    let second = Store::new(SqliteBackend::open(&path).unwrap());

    for n in 0..10u32 {
      let store = if n % 2 == 0 { &first } else { &second };
      store
        .update("ids", move |ids: Option<Vec<u32>>| {
          let mut ids = ids.unwrap_or_default();
          ids.push(n);
          Some(ids)
        })
        .await
        .unwrap();
    }

    let ids: Option<Vec<u32>> = first.get("ids").await.unwrap();
    assert_eq!(ids, Some((0..10).collect()));
  }

  #[tokio::test]
  async fn test_failed_update_rolls_back() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.put("k", &json!(1)).await.unwrap();

    let result = backend
      .update("k", Box::new(|_| Err(StorageError::backend("refused"))))
      .await;

    assert!(result.is_err());
    assert_eq!(backend.get("k").await.unwrap(), Some(json!(1)));
  }
}
