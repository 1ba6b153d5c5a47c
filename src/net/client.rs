//! `Transport` implementation on top of reqwest.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, warn};

use super::request::{HttpMethod, HttpRequest, Payload};
use super::transport::{HttpResponse, Transport, TransportError};

/// HTTP client wrapper
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// Create a transport. `timeout` of `None` waits indefinitely.
  pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| TransportError::new(format!("failed to build http client: {}", e)))?;

    Ok(Self { client })
  }

  fn build_form(
    fields: &std::collections::BTreeMap<String, String>,
    files: &[super::request::Attachment],
  ) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for (name, value) in fields {
      form = form.text(name.clone(), value.clone());
    }
    for file in files {
      let mut part = Part::bytes(file.data.clone()).file_name(file.file_name.clone());
      if let Some(content_type) = &file.content_type {
        part = part
          .mime_str(content_type)
          .map_err(|e| TransportError::new(format!("invalid content type {}: {}", content_type, e)))?;
      }
      form = form.part(file.field.clone(), part);
    }
    Ok(form)
  }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
  match method {
    HttpMethod::Get => reqwest::Method::GET,
    HttpMethod::Post => reqwest::Method::POST,
    HttpMethod::Put => reqwest::Method::PUT,
    HttpMethod::Patch => reqwest::Method::PATCH,
    HttpMethod::Delete => reqwest::Method::DELETE,
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), &request.url);

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    builder = match &request.payload {
      Payload::Raw { body: Some(body) } => builder.body(body.clone()),
      Payload::Raw { body: None } => builder,
      Payload::Form { fields, files } => builder.multipart(Self::build_form(fields, files)?),
    };

    let response = builder
      .send()
      .await
      .map_err(|e| TransportError::new(format!("{} {}: {}", request.method, request.url, e)))?;

    let status = response.status().as_u16();
    // The server has answered once a status arrives; a body cut short
    // still counts as that answer.
    let body = match response.bytes().await {
      Ok(bytes) => bytes.to_vec(),
      Err(e) => {
        warn!(method = %request.method, url = %request.url, status, error = %e, "response body unreadable");
        Vec::new()
      }
    };

    debug!(method = %request.method, url = %request.url, status, "request completed");
    Ok(HttpResponse::new(status, body))
  }
}
