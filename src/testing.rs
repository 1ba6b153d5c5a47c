//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::net::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::store::{KvBackend, StorageError, StorageResult, UpdateFn};

/// Transport that replays a fixed list of outcomes in order and records
/// every request it was given. Runs dry as a transport error.
pub struct ScriptedTransport {
  outcomes: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
  requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
  pub fn new(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Self {
    Self {
      outcomes: Mutex::new(outcomes.into()),
      requests: Mutex::new(Vec::new()),
    }
  }

  pub fn requests(&self) -> Vec<HttpRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    self.requests.lock().unwrap().push(request.clone());
    self
      .outcomes
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Err(TransportError::new("no scripted response")))
  }
}

pub fn ok(status: u16, body: &str) -> Result<HttpResponse, TransportError> {
  Ok(HttpResponse::new(status, body))
}

pub fn offline() -> Result<HttpResponse, TransportError> {
  Err(TransportError::new("network unreachable"))
}

/// Backend whose every operation fails.
pub struct FailingBackend;

#[async_trait]
impl KvBackend for FailingBackend {
  async fn get(&self, _key: &str) -> StorageResult<Option<Value>> {
    Err(StorageError::backend("disk unavailable"))
  }

  async fn put(&self, _key: &str, _value: &Value) -> StorageResult<()> {
    Err(StorageError::backend("disk unavailable"))
  }

  async fn delete(&self, _key: &str) -> StorageResult<()> {
    Err(StorageError::backend("disk unavailable"))
  }

  async fn update(&self, _key: &str, _f: UpdateFn) -> StorageResult<bool> {
    Err(StorageError::backend("disk unavailable"))
  }
}
