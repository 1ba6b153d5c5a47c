//! Error types for the durable key-value store.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
  /// Keys must be non-empty strings.
  #[error("storage key must not be empty")]
  EmptyKey,

  /// The SQLite backend reported an error.
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// The backend is unavailable (lock poisoned, directory missing, ...).
  #[error("storage backend unavailable: {0}")]
  Backend(String),

  /// A value could not be encoded or decoded.
  #[error("serialization error for key {key}: {message}")]
  Serialization { key: String, message: String },
}

impl StorageError {
  /// Create a backend error.
  pub fn backend(message: impl Into<String>) -> Self {
    Self::Backend(message.into())
  }

  /// Create a serialization error with key context.
  pub fn serialization(key: impl Into<String>, message: impl ToString) -> Self {
    Self::Serialization {
      key: key.into(),
      message: message.to_string(),
    }
  }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
