//! Client facade: the four operations callers use, plus the write-time
//! decision between sending now and deferring to the outbox.
//!
//! Connectivity failures defer. Server answers, including rejections,
//! surface to the caller and are never queued.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheResult, Snapshot, SnapshotCache};
use crate::connectivity::Connectivity;
use crate::error::{Result, SyncError};
use crate::events::{Notification, Notifier};
use crate::net::{merge_headers, Headers, HttpMethod, HttpRequest, HttpResponse, Payload, Transport};
use crate::outbox::{FlushReport, Flusher, OutboxItem, OutboxQueue, PendingWrite, RetryPolicy};
use crate::store::Store;

/// What the caller wants written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
  Create,
  Update,
  Delete,
}

impl WriteAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }

  fn default_method(&self) -> HttpMethod {
    match self {
      Self::Create => HttpMethod::Post,
      Self::Update => HttpMethod::Put,
      Self::Delete => HttpMethod::Delete,
    }
  }
}

/// A write issued by a call site.
#[derive(Debug, Clone)]
pub struct WriteIntent {
  pub module: String,
  pub action: WriteAction,
  pub method: HttpMethod,
  /// Absolute URL, or a path relative to the configured base URL
  pub url: String,
  pub headers: Headers,
  pub payload: Payload,
  pub metadata: Map<String, Value>,
}

impl WriteIntent {
  pub fn new(module: impl Into<String>, action: WriteAction, url: impl Into<String>) -> Self {
    Self {
      module: module.into(),
      action,
      method: action.default_method(),
      url: url.into(),
      headers: Headers::new(),
      payload: Payload::empty(),
      metadata: Map::new(),
    }
  }

  pub fn create(module: impl Into<String>, url: impl Into<String>) -> Self {
    Self::new(module, WriteAction::Create, url)
  }

  pub fn update(module: impl Into<String>, url: impl Into<String>) -> Self {
    Self::new(module, WriteAction::Update, url)
  }

  pub fn delete(module: impl Into<String>, url: impl Into<String>) -> Self {
    Self::new(module, WriteAction::Delete, url)
  }

  pub fn method(mut self, method: HttpMethod) -> Self {
    self.method = method;
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn payload(mut self, payload: Payload) -> Self {
    self.payload = payload;
    self
  }

  /// JSON body with a matching content-type header.
  pub fn json<T: serde::Serialize + ?Sized>(self, body: &T) -> serde_json::Result<Self> {
    Ok(
      self
        .header("Content-Type", "application/json")
        .payload(Payload::json(body)?),
    )
  }

  pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.metadata.insert(key.into(), value.into());
    self
  }
}

/// Result of a write. Queued is a normal outcome, not an error.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
  /// The server accepted the write (2xx).
  Sent(HttpResponse),
  /// The write was deferred to the outbox.
  Queued { queue_id: String, item: OutboxItem },
}

impl WriteOutcome {
  pub fn is_queued(&self) -> bool {
    matches!(self, Self::Queued { .. })
  }

  pub fn queue_id(&self) -> Option<&str> {
    match self {
      Self::Queued { queue_id, .. } => Some(queue_id),
      Self::Sent(_) => None,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
  /// Base for relative URLs
  pub base_url: Option<Url>,
  /// Sent with every request; per-call headers win
  pub default_headers: Headers,
  pub retry: RetryPolicy,
  pub notification_capacity: Option<usize>,
}

/// Offline-first client over one store and one transport.
#[derive(Clone)]
pub struct SyncClient {
  base_url: Option<Url>,
  default_headers: Headers,
  transport: Arc<dyn Transport>,
  cache: SnapshotCache,
  queue: OutboxQueue,
  flusher: Flusher,
  connectivity: Connectivity,
  notifier: Notifier,
}

impl SyncClient {
  pub fn new(
    store: Store,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
    options: SyncOptions,
  ) -> Self {
    let notifier = options
      .notification_capacity
      .map(Notifier::new)
      .unwrap_or_default();
    let cache = SnapshotCache::new(store.clone(), transport.clone());
    let queue = OutboxQueue::new(store, notifier.clone());
    let flusher = Flusher::new(
      queue.clone(),
      transport.clone(),
      connectivity.clone(),
      notifier.clone(),
    )
    .with_policy(options.retry);

    Self {
      base_url: options.base_url,
      default_headers: options.default_headers,
      transport,
      cache,
      queue,
      flusher,
      connectivity,
      notifier,
    }
  }

  /// Read with snapshot fallback.
  pub async fn read(&self, url: &str, cache_key: &str) -> Result<CacheResult<Value>> {
    let url = self.resolve(url)?;
    self
      .cache
      .read_through(url.as_str(), &self.default_headers, cache_key)
      .await
  }

  /// Last stored snapshot for `cache_key`, without touching the network.
  pub async fn cached(&self, cache_key: &str) -> Result<Option<Snapshot>> {
    self.cache.snapshot(cache_key).await
  }

  /// Read and decode into `T`.
  pub async fn read_as<T: serde::de::DeserializeOwned>(
    &self,
    url: &str,
    cache_key: &str,
  ) -> Result<CacheResult<T>> {
    let result = self.read(url, cache_key).await?;
    let data = serde_json::from_value(result.data.clone())?;
    Ok(result.map(|_| data))
  }

  /// Send now, or defer when offline.
  ///
  /// - offline signal: enqueue without touching the network
  /// - no response: enqueue as fallback
  /// - 2xx: `Sent`
  /// - any other status: `SyncError::Application`, nothing queued
  pub async fn write(&self, intent: WriteIntent) -> Result<WriteOutcome> {
    let pending = self.prepare(intent)?;

    if !self.connectivity.is_online() {
      debug!(module = %pending.module, "offline, deferring write");
      return self.defer(pending).await;
    }

    let request = HttpRequest::new(
      pending.method,
      pending.url.clone(),
      pending.headers.clone(),
      pending.payload.clone(),
    );

    match self.transport.send(&request).await {
      Ok(response) if response.is_success() => Ok(WriteOutcome::Sent(response)),
      Ok(response) => Err(SyncError::from_response(&response)),
      Err(e) => {
        warn!(module = %pending.module, error = %e, "write failed without response, deferring");
        self.defer(pending).await
      }
    }
  }

  /// Pending writes, oldest first.
  pub async fn pending(&self) -> Result<Vec<OutboxItem>> {
    self.queue.list().await
  }

  /// One replay pass over at most `max_batch` items.
  pub async fn flush(&self, max_batch: usize) -> Result<FlushReport> {
    self.flusher.flush(max_batch).await
  }

  /// Give up on a queued write.
  pub async fn discard(&self, id: &str) -> Result<bool> {
    self.queue.remove(id).await
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.notifier.subscribe()
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  async fn defer(&self, pending: PendingWrite) -> Result<WriteOutcome> {
    let item = self.queue.enqueue(pending).await?;
    Ok(WriteOutcome::Queued {
      queue_id: item.id.clone(),
      item,
    })
  }

  fn prepare(&self, intent: WriteIntent) -> Result<PendingWrite> {
    let url = self.resolve(&intent.url)?;
    let mut metadata = intent.metadata;
    metadata
      .entry("action")
      .or_insert_with(|| Value::from(intent.action.as_str()));

    Ok(PendingWrite {
      module: intent.module,
      method: intent.method,
      url: url.into(),
      headers: merge_headers(&self.default_headers, &intent.headers),
      payload: intent.payload,
      metadata,
    })
  }

  /// Absolute URLs pass through; anything else joins onto the base URL.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    match Url::parse(url) {
      Ok(absolute) => Ok(absolute),
      Err(url::ParseError::RelativeUrlWithoutBase) => {
        let base = self.base_url.as_ref().ok_or_else(|| SyncError::InvalidUrl {
          url: url.to_string(),
          reason: "relative url without a configured base url".to_string(),
        })?;
        base.join(url).map_err(|e| SyncError::InvalidUrl {
          url: url.to_string(),
          reason: e.to_string(),
        })
      }
      Err(e) => Err(SyncError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
      }),
    }
  }
}
