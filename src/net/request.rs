//! Outbound request model shared by live calls and outbox replay.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header map. Names are kept as given; lookups are case-insensitive.
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl HttpMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for HttpMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for HttpMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Self::Get),
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "PATCH" => Ok(Self::Patch),
      "DELETE" => Ok(Self::Delete),
      other => Err(format!("unsupported method: {}", other)),
    }
  }
}

/// A binary file sent as one part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
  /// Form field name
  pub field: String,
  pub file_name: String,
  pub content_type: Option<String>,
  #[serde(with = "base64_bytes")]
  pub data: Vec<u8>,
}

/// Request body, tagged by encoding.
///
/// Persisted inside outbox rows as `"encoding": "raw" | "form"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "lowercase")]
pub enum Payload {
  /// Body passed through unchanged.
  Raw {
    #[serde(default, with = "base64_opt_bytes")]
    body: Option<Vec<u8>>,
  },
  /// Multipart form built at send time from fields and files.
  Form {
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    files: Vec<Attachment>,
  },
}

impl Payload {
  pub fn empty() -> Self {
    Self::Raw { body: None }
  }

  pub fn raw(body: impl Into<Vec<u8>>) -> Self {
    Self::Raw {
      body: Some(body.into()),
    }
  }

  /// Serialize `value` as the raw body. Pair with a JSON content-type header.
  pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
    Ok(Self::raw(serde_json::to_vec(value)?))
  }

  pub fn form(fields: BTreeMap<String, String>, files: Vec<Attachment>) -> Self {
    Self::Form { fields, files }
  }

  pub fn is_form(&self) -> bool {
    matches!(self, Self::Form { .. })
  }
}

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: HttpMethod,
  pub url: String,
  pub headers: Headers,
  pub payload: Payload,
}

impl HttpRequest {
  /// Build a request. For form payloads any caller-supplied content-type is
  /// dropped so the transport can set the multipart boundary itself.
  pub fn new(method: HttpMethod, url: impl Into<String>, headers: Headers, payload: Payload) -> Self {
    let headers = if payload.is_form() {
      headers
        .into_iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type"))
        .collect()
    } else {
      headers
    };

    Self {
      method,
      url: url.into(),
      headers,
      payload,
    }
  }

  pub fn get(url: impl Into<String>, headers: Headers) -> Self {
    Self::new(HttpMethod::Get, url, headers, Payload::empty())
  }
}

/// Merge `overrides` on top of `defaults`. Names compare case-insensitively
/// and the override's spelling wins.
pub fn merge_headers(defaults: &Headers, overrides: &Headers) -> Headers {
  let mut merged: Headers = defaults
    .iter()
    .filter(|(name, _)| !overrides.keys().any(|o| o.eq_ignore_ascii_case(name)))
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect();
  merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
  merged
}

mod base64_bytes {
  use base64::{engine::general_purpose::STANDARD, Engine};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    STANDARD.decode(s).map_err(serde::de::Error::custom)
  }
}

mod base64_opt_bytes {
  use base64::{engine::general_purpose::STANDARD, Engine};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
      Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Option<Vec<u8>>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
      Some(s) => STANDARD
        .decode(s)
        .map(Some)
        .map_err(serde::de::Error::custom),
      None => Ok(None),
    }
  }
}
