use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::net::Headers;
use crate::outbox::RetryPolicy;
use crate::sync::SyncOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub flush: FlushConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Relative request paths are joined onto this
  pub base_url: String,
  /// Sent with every request
  #[serde(default)]
  pub headers: Headers,
  /// Request timeout; none by default
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (defaults to $XDG_DATA_HOME/offsync/offsync.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
  pub max_batch: usize,
  pub interval_secs: u64,
  pub max_backoff_secs: u64,
  /// Drop an item after this many 5xx answers; unbounded if unset
  pub max_server_retries: Option<u32>,
}

impl Default for FlushConfig {
  fn default() -> Self {
    Self {
      max_batch: 20,
      interval_secs: 30,
      max_backoff_secs: 300,
      max_server_retries: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Polled to drive the online signal. Without it the signal stays online.
  pub probe_url: Option<String>,
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      probe_interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub capacity: usize,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self { capacity: 64 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  pub level: String,
  /// Log to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.base_url()?;
    if self.flush.max_batch == 0 {
      return Err(eyre!("flush.max_batch must be at least 1"));
    }
    if self.flush.interval_secs == 0 {
      return Err(eyre!("flush.interval_secs must be at least 1"));
    }
    Ok(())
  }

  /// Base URL with a trailing slash, so relative paths append instead of
  /// replacing the last segment.
  pub fn base_url(&self) -> Result<Url> {
    let raw = &self.server.base_url;
    let normalized = if raw.ends_with('/') {
      raw.clone()
    } else {
      format!("{}/", raw)
    };
    Url::parse(&normalized).map_err(|e| eyre!("Invalid server.base_url {}: {}", raw, e))
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.server.timeout_secs.map(Duration::from_secs)
  }

  pub fn sync_options(&self) -> Result<SyncOptions> {
    Ok(SyncOptions {
      base_url: Some(self.base_url()?),
      default_headers: self.server.headers.clone(),
      retry: RetryPolicy {
        max_server_retries: self.flush.max_server_retries,
      },
      notification_capacity: Some(self.notifications.capacity),
    })
  }
}
