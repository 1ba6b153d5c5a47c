//! Durable FIFO of pending writes.
//!
//! Layout in the store:
//! - `outbox:item:<id>` holds one `OutboxItem` row
//! - `outbox:index` holds the ordered list of ids (replay order)
//!
//! Every change to the index is a single `Store::update`, atomic in the
//! backend, so queues sharing a store (or a database file) cannot lose ids.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{Notification, Notifier};
use crate::store::{StorageError, Store};

use super::item::{OutboxItem, PendingWrite};

/// Store keys starting with this belong to the outbox.
pub const RESERVED_PREFIX: &str = "outbox:";

const INDEX_KEY: &str = "outbox:index";

fn item_key(id: &str) -> String {
  format!("outbox:item:{}", id)
}

#[derive(Clone)]
pub struct OutboxQueue {
  store: Store,
  notifier: Notifier,
}

impl OutboxQueue {
  pub fn new(store: Store, notifier: Notifier) -> Self {
    Self { store, notifier }
  }

  /// Persist `write` and append it to the replay order.
  ///
  /// Returns the stored row. Identical payloads are never merged.
  pub async fn enqueue(&self, write: PendingWrite) -> Result<OutboxItem> {
    let item = OutboxItem::new(Uuid::new_v4().to_string(), Utc::now(), write);

    // Row first: an indexed id always has a row to read.
    self.store.put(&item_key(&item.id), &item).await?;

    let id = item.id.clone();
    self
      .store
      .update(INDEX_KEY, move |index: Option<Vec<String>>| {
        let mut index = index.unwrap_or_default();
        index.push(id);
        Some(index)
      })
      .await?;

    info!(id = %item.id, module = %item.module, method = %item.method, url = %item.url, "queued write");
    self.notifier.emit(Notification::Queued {
      module: item.module.clone(),
      id: item.id.clone(),
    });

    Ok(item)
  }

  /// All readable pending rows, oldest first.
  ///
  /// Ids whose row is gone or no longer decodes are skipped and stay in the
  /// index, so `remove` can still discard them.
  pub async fn list(&self) -> Result<Vec<OutboxItem>> {
    let index = self.read_index().await?;

    let mut items = Vec::with_capacity(index.len());
    for id in &index {
      match self.store.get::<OutboxItem>(&item_key(id)).await {
        Ok(Some(item)) => items.push(item),
        Ok(None) => debug!(id = %id, "index entry without row, skipping"),
        Err(StorageError::Serialization { message, .. }) => {
          warn!(id = %id, error = %message, "unreadable outbox row, skipping")
        }
        Err(e) => return Err(e.into()),
      }
    }

    // Stable: ties keep index order.
    items.sort_by_key(|item| item.created_at);
    Ok(items)
  }

  pub async fn get(&self, id: &str) -> Result<Option<OutboxItem>> {
    Ok(self.store.get(&item_key(id)).await?)
  }

  pub async fn len(&self) -> Result<usize> {
    Ok(self.read_index().await?.len())
  }

  pub async fn is_empty(&self) -> Result<bool> {
    Ok(self.len().await? == 0)
  }

  /// Drop `id` from the replay order and delete its row.
  ///
  /// Returns whether the id was queued.
  pub async fn remove(&self, id: &str) -> Result<bool> {
    let target = id.to_string();
    let removed = self
      .store
      .update(INDEX_KEY, move |index: Option<Vec<String>>| {
        let mut index = index?;
        let before = index.len();
        index.retain(|queued| *queued != target);
        (index.len() != before).then_some(index)
      })
      .await?;

    self.store.delete(&item_key(id)).await?;

    debug!(id, removed, "removed outbox item");
    Ok(removed)
  }

  /// Persist the `tries` counter of a still-queued item.
  ///
  /// A row already deleted by `remove` is not written back.
  pub async fn record_attempt(&self, item: &OutboxItem) -> Result<()> {
    let updated = item.clone();
    self
      .store
      .update(&item_key(&item.id), move |row: Option<OutboxItem>| {
        row.map(|_| updated)
      })
      .await?;
    Ok(())
  }

  async fn read_index(&self) -> Result<Vec<String>> {
    Ok(self.store.get(INDEX_KEY).await?.unwrap_or_default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{HttpMethod, Payload};
  use crate::store::{KvBackend, MemoryBackend, StorageResult, UpdateFn};
  use std::sync::Arc;
  use async_trait::async_trait;
  use serde_json::{json, Map, Value};

  fn write(module: &str, body: Value) -> PendingWrite {
    PendingWrite {
      module: module.into(),
      method: HttpMethod::Post,
      url: format!("https://example.org/{}", module),
      headers: Default::default(),
      payload: Payload::json(&body).unwrap(),
      metadata: Map::new(),
    }
  }

  /// Yields before every operation so concurrent callers interleave.
  #[derive(Default)]
  struct YieldingBackend(MemoryBackend);

  #[async_trait]
  impl KvBackend for YieldingBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
      tokio::task::yield_now().await;
      self.0.get(key).await
    }

    async fn put(&self, key: &str, value: &Value) -> StorageResult<()> {
      tokio::task::yield_now().await;
      self.0.put(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
      tokio::task::yield_now().await;
      self.0.delete(key).await
    }

    async fn update(&self, key: &str, f: UpdateFn) -> StorageResult<bool> {
      tokio::task::yield_now().await;
      self.0.update(key, f).await
    }
  }

  #[tokio::test]
  async fn test_list_is_fifo() {
    let queue = OutboxQueue::new(Store::in_memory(), Notifier::default());
    let a = queue.enqueue(write("leave", json!({"n": 1}))).await.unwrap();
    let b = queue.enqueue(write("overtime", json!({"n": 2}))).await.unwrap();
    let c = queue.enqueue(write("leave", json!({"n": 3}))).await.unwrap();

    let ids: Vec<String> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![a.id, b.id, c.id]);
  }

  #[tokio::test]
  async fn test_enqueue_returns_fresh_row() {
    let queue = OutboxQueue::new(Store::in_memory(), Notifier::default());
    let item = queue.enqueue(write("leave", json!({}))).await.unwrap();

    assert_eq!(item.tries, 0);
    assert_eq!(item.module, "leave");
    assert_eq!(queue.get(&item.id).await.unwrap(), Some(item));
  }

  #[tokio::test]
  async fn test_identical_payloads_are_not_deduplicated() {
    let queue = OutboxQueue::new(Store::in_memory(), Notifier::default());
    let a = queue.enqueue(write("leave", json!({"same": true}))).await.unwrap();
    let b = queue.enqueue(write("leave", json!({"same": true}))).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(queue.len().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_enqueue_emits_queued() {
    let notifier = Notifier::default();
    let mut rx = notifier.subscribe();
    let queue = OutboxQueue::new(Store::in_memory(), notifier);

    let item = queue.enqueue(write("overtime", json!({}))).await.unwrap();

    assert_eq!(
      rx.recv().await.unwrap(),
      Notification::Queued {
        module: "overtime".into(),
        id: item.id,
      }
    );
  }

  #[tokio::test]
  async fn test_remove_drops_index_entry_and_row() {
    let store = Store::in_memory();
    let queue = OutboxQueue::new(store.clone(), Notifier::default());
    let a = queue.enqueue(write("leave", json!(1))).await.unwrap();
    let b = queue.enqueue(write("leave", json!(2))).await.unwrap();

    assert!(queue.remove(&a.id).await.unwrap());
    assert!(!queue.remove(&a.id).await.unwrap());

    let remaining: Vec<String> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(remaining, vec![b.id]);
    assert!(store.get::<Value>(&item_key(&a.id)).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_list_skips_ids_without_rows() {
    let store = Store::in_memory();
    let queue = OutboxQueue::new(store.clone(), Notifier::default());
    let a = queue.enqueue(write("leave", json!(1))).await.unwrap();
    let b = queue.enqueue(write("leave", json!(2))).await.unwrap();

    store.delete(&item_key(&a.id)).await.unwrap();

    let items = queue.list().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, b.id);
  }

  #[tokio::test]
  async fn test_record_attempt_persists_tries() {
    let queue = OutboxQueue::new(Store::in_memory(), Notifier::default());
    let mut item = queue.enqueue(write("leave", json!(1))).await.unwrap();

    item.tries = 3;
    queue.record_attempt(&item).await.unwrap();
    assert_eq!(queue.get(&item.id).await.unwrap().unwrap().tries, 3);

    // A removed item is not resurrected
    queue.remove(&item.id).await.unwrap();
    queue.record_attempt(&item).await.unwrap();
    assert!(queue.get(&item.id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_concurrent_enqueues_lose_no_ids() {
    let queue = OutboxQueue::new(Store::new(YieldingBackend::default()), Notifier::default());

    let handles: Vec<_> = (0..25)
      .map(|n| {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(write("leave", json!(n))).await })
      })
      .collect();

    let mut ids = Vec::new();
    for handle in handles {
      ids.push(handle.await.unwrap().unwrap().id);
    }

    let listed: Vec<String> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(listed.len(), 25);
    for id in ids {
      assert!(listed.contains(&id));
    }
  }

  #[tokio::test]
  async fn test_queues_sharing_a_store_lose_no_ids() {
    let store = Store::from_arc(Arc::new(YieldingBackend::default()));
    let first = OutboxQueue::new(store.clone(), Notifier::default());
    let second = OutboxQueue::new(store, Notifier::default());

    let handles: Vec<_> = (0..20)
      .map(|n| {
        let queue = if n % 2 == 0 { first.clone() } else { second.clone() };
        tokio::spawn(async move { queue.enqueue(write("leave", json!(n))).await })
      })
      .collect();

    let mut ids = Vec::new();
    for handle in handles {
      ids.push(handle.await.unwrap().unwrap().id);
    }

    let listed: Vec<String> = second.list().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(listed.len(), 20);
    for id in ids {
      assert!(listed.contains(&id));
    }
  }

  #[tokio::test]
  async fn test_unreadable_row_is_skipped_and_removable() {
    let store = Store::in_memory();
    let queue = OutboxQueue::new(store.clone(), Notifier::default());
    let bad = queue.enqueue(write("leave", json!(1))).await.unwrap();
    let good = queue.enqueue(write("overtime", json!(2))).await.unwrap();

    store
      .put(&item_key(&bad.id), &json!({"garbage": true}))
      .await
      .unwrap();

    let items = queue.list().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, good.id);
    assert_eq!(queue.len().await.unwrap(), 2);

    assert!(queue.remove(&bad.id).await.unwrap());
    assert_eq!(queue.len().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_storage_failure_still_fails_list() {
    let queue = OutboxQueue::new(
      Store::new(crate::testing::FailingBackend),
      Notifier::default(),
    );
    assert!(queue.list().await.is_err());
  }

  #[tokio::test]
  async fn test_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let id = {
      let store = Store::new(crate::store::SqliteBackend::open(&path).unwrap());
      let queue = OutboxQueue::new(store, Notifier::default());
      queue.enqueue(write("leave", json!({"days": 2}))).await.unwrap().id
    };

    let store = Store::new(crate::store::SqliteBackend::open(&path).unwrap());
    let queue = OutboxQueue::new(store, Notifier::default());
    let items = queue.list().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
    assert_eq!(items[0].payload, Payload::json(&json!({"days": 2})).unwrap());
  }
}
