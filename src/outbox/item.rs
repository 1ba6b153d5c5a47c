//! Outbox rows and the caller-supplied write they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::net::{Headers, HttpMethod, HttpRequest, Payload};

/// A write the caller wants delivered, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
  /// Tag used for notifications (e.g. "leave", "overtime")
  pub module: String,
  pub method: HttpMethod,
  /// Absolute URL
  pub url: String,
  pub headers: Headers,
  pub payload: Payload,
  /// Caller context carried along untouched
  pub metadata: Map<String, Value>,
}

/// A persisted outbox entry.
///
/// The envelope is fixed at enqueue time; only `tries` changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
  pub id: String,
  pub created_at: DateTime<Utc>,
  /// Replay attempts answered with a 5xx
  pub tries: u32,
  pub module: String,
  pub method: HttpMethod,
  pub url: String,
  #[serde(default)]
  pub headers: Headers,
  #[serde(flatten)]
  pub payload: Payload,
  #[serde(default)]
  pub metadata: Map<String, Value>,
}

impl OutboxItem {
  pub(crate) fn new(id: String, created_at: DateTime<Utc>, write: PendingWrite) -> Self {
    Self {
      id,
      created_at,
      tries: 0,
      module: write.module,
      method: write.method,
      url: write.url,
      headers: write.headers,
      payload: write.payload,
      metadata: write.metadata,
    }
  }

  /// Id for optimistic rendering; never collides with server-issued ids.
  pub fn local_id(&self) -> String {
    format!("local-{}", self.id)
  }

  /// The request a live caller would have issued for this write.
  pub fn to_request(&self) -> HttpRequest {
    HttpRequest::new(
      self.method,
      self.url.clone(),
      self.headers.clone(),
      self.payload.clone(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::BTreeMap;

  fn form_item() -> OutboxItem {
    OutboxItem::new(
      "abc".into(),
      Utc::now(),
      PendingWrite {
        module: "support".into(),
        method: HttpMethod::Post,
        url: "https://example.org/tickets".into(),
        headers: Headers::from([
          ("Content-Type".to_string(), "multipart/form-data; boundary=x".to_string()),
          ("X-Trace".to_string(), "1".to_string()),
        ]),
        payload: Payload::form(
          BTreeMap::from([("subject".to_string(), "Laptop".to_string())]),
          Vec::new(),
        ),
        metadata: Map::new(),
      },
    )
  }

  #[test]
  fn test_row_shape() {
    let value = serde_json::to_value(form_item()).unwrap();

    assert_eq!(value["id"], "abc");
    assert_eq!(value["tries"], 0);
    assert_eq!(value["method"], "POST");
    assert_eq!(value["encoding"], "form");
    assert_eq!(value["fields"], json!({"subject": "Laptop"}));
  }

  #[test]
  fn test_row_decodes_back() {
    let item = form_item();
    let value = serde_json::to_value(&item).unwrap();
    assert_eq!(serde_json::from_value::<OutboxItem>(value).unwrap(), item);
  }

  #[test]
  fn test_replay_request_strips_form_content_type() {
    let request = form_item().to_request();

    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.url, "https://example.org/tickets");
    assert_eq!(
      request.headers,
      Headers::from([("X-Trace".to_string(), "1".to_string())])
    );
  }

  #[test]
  fn test_local_id() {
    assert_eq!(form_item().local_id(), "local-abc");
  }
}
