//! Transport seam: sends a request, returns whatever the server answered.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::request::HttpRequest;

/// No response reached us: DNS failure, refused connection, reset, timeout.
///
/// Any HTTP status, including 5xx, is a response and never a `TransportError`.
#[derive(Debug, Clone, Error)]
#[error("transport failure: {message}")]
pub struct TransportError {
  pub message: String,
}

impl TransportError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// A response received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  /// Any 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }

  /// Human-readable failure message: the body's `message`, `error` or
  /// `detail` string, else the body text, else a generic status line.
  pub fn error_message(&self) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&self.body) {
      for field in ["message", "error", "detail"] {
        if let Some(Value::String(s)) = map.get(field) {
          return s.clone();
        }
      }
    }

    let text = String::from_utf8_lossy(&self.body);
    let text = text.trim();
    if !text.is_empty() && text.len() <= 200 && !text.starts_with('{') {
      return text.to_string();
    }

    format!("request failed with status {}", self.status)
  }
}

/// Trait for network backends.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_success_range() {
    assert!(HttpResponse::new(200, "").is_success());
    assert!(HttpResponse::new(204, "").is_success());
    assert!(!HttpResponse::new(304, "").is_success());
    assert!(!HttpResponse::new(400, "").is_success());
  }

  #[test]
  fn test_error_message_from_json_fields() {
    let r = HttpResponse::new(400, r#"{"message":"Invalid date range"}"#);
    assert_eq!(r.error_message(), "Invalid date range");

    let r = HttpResponse::new(409, r#"{"error":"Duplicate request"}"#);
    assert_eq!(r.error_message(), "Duplicate request");
  }

  #[test]
  fn test_error_message_fallbacks() {
    assert_eq!(
      HttpResponse::new(502, "Bad Gateway").error_message(),
      "Bad Gateway"
    );
    assert_eq!(
      HttpResponse::new(500, "").error_message(),
      "request failed with status 500"
    );
    assert_eq!(
      HttpResponse::new(422, r#"{"code":7}"#).error_message(),
      "request failed with status 422"
    );
  }
}
