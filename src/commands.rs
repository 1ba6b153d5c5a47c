//! CLI subcommands.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use offsync::config::Config;
use offsync::connectivity::Connectivity;
use offsync::net::{Attachment, HttpMethod, Payload, ReqwestTransport};
use offsync::outbox::FlushReport;
use offsync::runner::{FlushRunner, RunnerConfig};
use offsync::store::{SqliteBackend, Store};
use offsync::{SyncClient, WriteAction, WriteIntent, WriteOutcome};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Read a resource, falling back to the last cached snapshot
  Get {
    /// Absolute URL or path relative to server.base_url
    #[arg(required_unless_present = "cached")]
    url: Option<String>,
    /// Cache key, e.g. "overtime:summary:2024-05"
    #[arg(short, long)]
    key: String,
    /// Print the stored snapshot without contacting the server
    #[arg(long)]
    cached: bool,
  },

  /// Send a write now, or queue it when the network is unavailable
  Send {
    /// Module tag used in notifications (e.g. "leave")
    module: String,
    url: String,
    #[arg(short, long, default_value = "POST")]
    method: HttpMethod,
    /// Raw JSON body
    #[arg(long, conflicts_with_all = ["field", "file"])]
    json: Option<String>,
    /// Form field as name=value (multipart)
    #[arg(long)]
    field: Vec<String>,
    /// Form file as field=path (multipart)
    #[arg(long)]
    file: Vec<String>,
    /// Extra header as name=value
    #[arg(short = 'H', long)]
    header: Vec<String>,
  },

  /// List queued writes, oldest first
  Queue,

  /// Replay queued writes
  Flush {
    #[arg(long)]
    max_batch: Option<usize>,
  },

  /// Discard a queued write
  Drop { id: String },

  /// Flush in the background until interrupted
  Run,
}

pub fn build_client(config: &Config, online: bool) -> Result<SyncClient> {
  let path = match &config.storage.path {
    Some(p) => p.clone(),
    None => SqliteBackend::default_path()?,
  };
  let store = Store::new(SqliteBackend::open(&path)?);
  let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);

  Ok(SyncClient::new(
    store,
    transport,
    Connectivity::new(online),
    config.sync_options()?,
  ))
}

pub async fn run(command: Command, client: &SyncClient, config: &Config) -> Result<()> {
  match command {
    Command::Get {
      url,
      key,
      cached: true,
    } => {
      if url.is_some() {
        eprintln!("--cached given, ignoring url");
      }
      let snapshot = client
        .cached(&key)
        .await?
        .ok_or_else(|| eyre!("No snapshot stored under {}", key))?;
      eprintln!("snapshot saved {}", snapshot.saved_at.to_rfc3339());
      println!("{}", serde_json::to_string_pretty(&snapshot.value)?);
    }

    Command::Get {
      url: Some(url),
      key,
      cached: false,
    } => {
      let result = client.read(&url, &key).await?;
      if let Some(cached_at) = result.cached_at {
        eprintln!("offline: serving snapshot saved {}", cached_at.to_rfc3339());
      }
      println!("{}", serde_json::to_string_pretty(&result.data)?);
    }

    Command::Get { url: None, .. } => return Err(eyre!("A url is required unless --cached is set")),

    Command::Send {
      module,
      url,
      method,
      json,
      field,
      file,
      header,
    } => {
      let mut intent = WriteIntent::new(module, action_for(method), url).method(method);
      for h in &header {
        let (name, value) = parse_pair(h)?;
        intent = intent.header(name, value);
      }
      intent = match json {
        Some(body) => {
          let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| eyre!("Invalid --json body: {}", e))?;
          intent.json(&value)?
        }
        None if !field.is_empty() || !file.is_empty() => intent.payload(form_payload(&field, &file)?),
        None => intent,
      };

      match client.write(intent).await? {
        WriteOutcome::Sent(response) => println!("sent {}", response.status),
        WriteOutcome::Queued { queue_id, .. } => println!("queued {}", queue_id),
      }
    }

    Command::Queue => {
      let items = client.pending().await?;
      if items.is_empty() {
        println!("queue is empty");
      }
      for item in items {
        println!(
          "{}  {}  {:<8} {} {}  tries={}",
          item.id,
          item.created_at.format("%Y-%m-%d %H:%M:%S"),
          item.module,
          item.method,
          item.url,
          item.tries
        );
      }
    }

    Command::Flush { max_batch } => {
      let report = client
        .flush(max_batch.unwrap_or(config.flush.max_batch))
        .await?;
      print_report(&report);
    }

    Command::Drop { id } => {
      if client.discard(&id).await? {
        println!("dropped {}", id);
      } else {
        return Err(eyre!("No queued write with id {}", id));
      }
    }

    Command::Run => {
      let mut notifications = client.subscribe();
      tokio::spawn(async move {
        loop {
          match notifications.recv().await {
            Ok(n) => match serde_json::to_string(&n) {
              Ok(line) => println!("{}", line),
              Err(_) => println!("{}", n.name()),
            },
            Err(RecvError::Lagged(missed)) => eprintln!("missed {} notifications", missed),
            Err(RecvError::Closed) => break,
          }
        }
      });

      let runner = FlushRunner::new(client.clone(), RunnerConfig::from(config));
      runner
        .run(async {
          let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    }
  }

  Ok(())
}

fn action_for(method: HttpMethod) -> WriteAction {
  match method {
    HttpMethod::Delete => WriteAction::Delete,
    HttpMethod::Put | HttpMethod::Patch => WriteAction::Update,
    HttpMethod::Get | HttpMethod::Post => WriteAction::Create,
  }
}

fn print_report(report: &FlushReport) {
  println!(
    "attempted {}, delivered {}, dropped {}",
    report.attempted,
    report.delivered.len(),
    report.dropped.len()
  );
  if let Some(reason) = &report.stopped {
    println!("stopped: {:?}", reason);
  }
}

/// Split `name=value`.
fn parse_pair(input: &str) -> Result<(String, String)> {
  let (name, value) = input
    .split_once('=')
    .ok_or_else(|| eyre!("Expected name=value, got {:?}", input))?;
  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Empty name in {:?}", input));
  }
  Ok((name.to_string(), value.to_string()))
}

fn form_payload(fields: &[String], files: &[String]) -> Result<Payload> {
  let mut form_fields = BTreeMap::new();
  for f in fields {
    let (name, value) = parse_pair(f)?;
    form_fields.insert(name, value);
  }

  let mut attachments = Vec::new();
  for entry in files {
    let (field, path) = parse_pair(entry)?;
    attachments.push(read_attachment(field, Path::new(&path))?);
  }

  Ok(Payload::form(form_fields, attachments))
}

fn read_attachment(field: String, path: &Path) -> Result<Attachment> {
  let data =
    std::fs::read(path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .ok_or_else(|| eyre!("Not a file: {}", path.display()))?;

  Ok(Attachment {
    field,
    content_type: guess_content_type(&file_name).map(String::from),
    file_name,
    data,
  })
}

fn guess_content_type(file_name: &str) -> Option<&'static str> {
  let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
  match ext.as_str() {
    "png" => Some("image/png"),
    "jpg" | "jpeg" => Some("image/jpeg"),
    "pdf" => Some("application/pdf"),
    "txt" => Some("text/plain"),
    "json" => Some("application/json"),
    _ => None,
  }
}
