//! Error taxonomy for the sync subsystem.

use thiserror::Error;

use crate::net::{HttpResponse, TransportError};
use crate::store::StorageError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
  /// The request never produced a response.
  #[error(transparent)]
  Transport(#[from] TransportError),

  /// A reachable server rejected the request. Displays the server's message.
  #[error("{message}")]
  Application { status: u16, message: String },

  #[error(transparent)]
  Storage(#[from] StorageError),

  /// A response or snapshot did not have the expected shape.
  #[error("unexpected response shape: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("invalid cache key {key:?}: {reason}")]
  InvalidKey { key: String, reason: &'static str },
}

impl SyncError {
  /// Build an application error from a non-success response.
  pub fn from_response(response: &HttpResponse) -> Self {
    Self::Application {
      status: response.status,
      message: response.error_message(),
    }
  }

  pub fn is_transport(&self) -> bool {
    matches!(self, Self::Transport(_))
  }

  /// HTTP status for application errors.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Application { status, .. } => Some(*status),
      _ => None,
    }
  }
}
