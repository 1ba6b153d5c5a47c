//! Background flushing.
//!
//! Flushes when connectivity comes back and on a timer while online. Passes
//! that stop on a failure push the next attempt out exponentially.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::connectivity;
use crate::sync::SyncClient;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
  pub max_batch: usize,
  pub interval: Duration,
  pub max_backoff: Duration,
  pub probe_url: Option<String>,
  pub probe_interval: Duration,
}

impl From<&crate::config::Config> for RunnerConfig {
  fn from(config: &crate::config::Config) -> Self {
    Self {
      max_batch: config.flush.max_batch,
      interval: Duration::from_secs(config.flush.interval_secs),
      max_backoff: Duration::from_secs(config.flush.max_backoff_secs),
      probe_url: config.connectivity.probe_url.clone(),
      probe_interval: Duration::from_secs(config.connectivity.probe_interval_secs),
    }
  }
}

/// Delay before the next pass after `failures` consecutive failed passes.
pub fn backoff_delay(interval: Duration, max: Duration, failures: u32) -> Duration {
  let factor = 2u32.saturating_pow(failures.min(16));
  interval.saturating_mul(factor).min(max.max(interval))
}

pub struct FlushRunner {
  client: SyncClient,
  config: RunnerConfig,
}

impl FlushRunner {
  pub fn new(client: SyncClient, config: RunnerConfig) -> Self {
    Self { client, config }
  }

  /// Run until `shutdown` resolves.
  pub async fn run(self, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    let mut online_rx = self.client.connectivity().subscribe();
    let mut failures: u32 = 0;
    let mut next_flush = Instant::now();
    let mut next_probe = Instant::now();

    info!(max_batch = self.config.max_batch, "flush runner started");

    loop {
      let wake = match &self.config.probe_url {
        Some(_) => next_flush.min(next_probe),
        None => next_flush,
      };

      tokio::select! {
        _ = &mut shutdown => break,
        changed = online_rx.changed() => {
          if changed.is_err() {
            break;
          }
          if *online_rx.borrow_and_update() {
            // Reconnected: flush now, forget earlier failures.
            failures = 0;
            next_flush = Instant::now();
          }
          continue;
        }
        _ = sleep(wake.saturating_duration_since(Instant::now())) => {}
      }

      let now = Instant::now();
      if let Some(url) = &self.config.probe_url {
        if now >= next_probe {
          let online =
            connectivity::probe(self.client.connectivity(), self.client.transport().as_ref(), url)
              .await;
          debug!(online, "probe finished");
          next_probe = now + self.config.probe_interval;
        }
      }

      if now < next_flush {
        continue;
      }

      failures = self.pass(failures).await;
      next_flush = Instant::now()
        + backoff_delay(self.config.interval, self.config.max_backoff, failures);
    }

    info!("flush runner stopped");
  }

  /// One pass; returns the updated failure streak.
  async fn pass(&self, failures: u32) -> u32 {
    if !self.client.connectivity().is_online() {
      return failures;
    }

    match self.client.flush(self.config.max_batch).await {
      Ok(report) if report.stopped.as_ref().is_some_and(|s| s.is_failure()) => failures + 1,
      Ok(_) => 0,
      Err(e) => {
        error!(error = %e, "flush pass failed");
        failures + 1
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connectivity::Connectivity;
  use crate::net::Payload;
  use crate::store::Store;
  use crate::sync::{SyncOptions, WriteIntent};
  use crate::testing::{ok, ScriptedTransport};
  use std::sync::Arc;

  #[test]
  fn test_backoff_delay() {
    let base = Duration::from_secs(30);
    let max = Duration::from_secs(300);

    assert_eq!(backoff_delay(base, max, 0), Duration::from_secs(30));
    assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(60));
    assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(240));
    assert_eq!(backoff_delay(base, max, 4), max);
    assert_eq!(backoff_delay(base, max, 40), max);
  }

  #[test]
  fn test_backoff_never_below_interval() {
    let base = Duration::from_secs(60);
    assert_eq!(backoff_delay(base, Duration::from_secs(10), 2), base);
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconnect_triggers_flush() {
    let transport = Arc::new(ScriptedTransport::new(vec![ok(201, "")]));
    let connectivity = Connectivity::new(false);
    let client = SyncClient::new(
      Store::in_memory(),
      transport.clone(),
      connectivity.clone(),
      SyncOptions::default(),
    );
    client
      .write(WriteIntent::create("leave", "https://example.org/leave").payload(Payload::raw("{}")))
      .await
      .unwrap();

    let runner = FlushRunner::new(
      client.clone(),
      RunnerConfig {
        max_batch: 10,
        interval: Duration::from_secs(3600),
        max_backoff: Duration::from_secs(3600),
        probe_url: None,
        probe_interval: Duration::from_secs(15),
      },
    );
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(runner.run(async {
      let _ = stop_rx.await;
    }));

    // Let the initial pass run while offline
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.request_count(), 0);

    connectivity.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.request_count(), 1);
    assert!(client.pending().await.unwrap().is_empty());

    stop_tx.send(()).unwrap();
    handle.await.unwrap();
  }
}
