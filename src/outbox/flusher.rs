//! Ordered replay of queued writes.
//!
//! Outcome per item:
//! - 2xx/3xx: delivered, removed
//! - 4xx: poison, removed (it will never succeed)
//! - 5xx: transient, retained; the pass stops to keep FIFO order
//! - no response: the pass stops, this and later items stay queued

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::events::{Notification, Notifier};
use crate::net::Transport;

use super::item::OutboxItem;
use super::queue::OutboxQueue;

/// How a replay response is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  Delivered,
  Poison,
  Retry,
  /// Status outside 200-599. Treated like a retry, without counting a try.
  Ambiguous,
}

pub fn classify(status: u16) -> Disposition {
  match status {
    200..=399 => Disposition::Delivered,
    400..=499 => Disposition::Poison,
    500..=599 => Disposition::Retry,
    _ => Disposition::Ambiguous,
  }
}

/// Bound on server-error retries. `None` keeps an item until it succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_server_retries: Option<u32>,
}

impl RetryPolicy {
  fn exhausted(&self, tries: u32) -> bool {
    self.max_server_retries.is_some_and(|max| tries >= max)
  }
}

/// Why a pass ended before draining its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
  Offline,
  AlreadyRunning,
  Transport { id: String, message: String },
  ServerError { id: String, status: u16 },
  UnexpectedStatus { id: String, status: u16 },
}

impl StopReason {
  /// The pass hit a failure worth backing off for.
  pub fn is_failure(&self) -> bool {
    matches!(
      self,
      Self::Transport { .. } | Self::ServerError { .. } | Self::UnexpectedStatus { .. }
    )
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
  /// Items a request was sent for
  pub attempted: usize,
  pub delivered: Vec<String>,
  /// Poison items and items past their retry bound
  pub dropped: Vec<String>,
  /// Distinct modules of completed items, first-seen order
  pub modules: Vec<String>,
  pub stopped: Option<StopReason>,
}

impl FlushReport {
  /// Items that left the queue.
  pub fn completed(&self) -> usize {
    self.delivered.len() + self.dropped.len()
  }

  fn stopped(reason: StopReason) -> Self {
    Self {
      stopped: Some(reason),
      ..Default::default()
    }
  }
}

#[derive(Clone)]
pub struct Flusher {
  queue: OutboxQueue,
  transport: Arc<dyn Transport>,
  connectivity: Connectivity,
  notifier: Notifier,
  policy: RetryPolicy,
  running: Arc<Mutex<()>>,
}

impl Flusher {
  pub fn new(
    queue: OutboxQueue,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
    notifier: Notifier,
  ) -> Self {
    Self {
      queue,
      transport,
      connectivity,
      notifier,
      policy: RetryPolicy::default(),
      running: Arc::new(Mutex::new(())),
    }
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Replay up to `max_batch` of the oldest items, in order.
  ///
  /// Only one pass runs at a time; a concurrent call returns immediately
  /// with `StopReason::AlreadyRunning`.
  pub async fn flush(&self, max_batch: usize) -> Result<FlushReport> {
    let Ok(_running) = self.running.try_lock() else {
      return Ok(FlushReport::stopped(StopReason::AlreadyRunning));
    };

    if !self.connectivity.is_online() {
      return Ok(FlushReport::stopped(StopReason::Offline));
    }

    let mut report = FlushReport::default();
    let mut per_module: Vec<(String, usize)> = Vec::new();
    let outcome = self.run_pass(max_batch, &mut report, &mut per_module).await;

    // Notify for whatever completed, even if the pass failed midway.
    self.notify(&per_module);
    report.modules = per_module.into_iter().map(|(module, _)| module).collect();

    if report.attempted > 0 {
      info!(
        attempted = report.attempted,
        delivered = report.delivered.len(),
        dropped = report.dropped.len(),
        stopped = ?report.stopped,
        "flush pass finished"
      );
    }

    outcome.map(|()| report)
  }

  async fn run_pass(
    &self,
    max_batch: usize,
    report: &mut FlushReport,
    per_module: &mut Vec<(String, usize)>,
  ) -> Result<()> {
    let batch: Vec<OutboxItem> = self.queue.list().await?.into_iter().take(max_batch).collect();

    for mut item in batch {
      if !self.connectivity.is_online() {
        report.stopped = Some(StopReason::Offline);
        break;
      }

      report.attempted += 1;
      let response = match self.transport.send(&item.to_request()).await {
        Ok(response) => response,
        Err(e) => {
          warn!(id = %item.id, error = %e, "replay failed without response, stopping pass");
          report.stopped = Some(StopReason::Transport {
            id: item.id,
            message: e.message,
          });
          break;
        }
      };

      match classify(response.status) {
        Disposition::Delivered => {
          self.queue.remove(&item.id).await?;
          report.delivered.push(item.id.clone());
        }
        Disposition::Poison => {
          warn!(
            id = %item.id,
            status = response.status,
            message = %response.error_message(),
            "server rejected queued write, dropping"
          );
          self.queue.remove(&item.id).await?;
          report.dropped.push(item.id.clone());
        }
        Disposition::Retry => {
          item.tries += 1;
          if self.policy.exhausted(item.tries) {
            warn!(id = %item.id, tries = item.tries, "retry limit reached, dropping");
            self.queue.remove(&item.id).await?;
            report.dropped.push(item.id.clone());
          } else {
            warn!(id = %item.id, status = response.status, tries = item.tries, "server error, stopping pass");
            self.queue.record_attempt(&item).await?;
            report.stopped = Some(StopReason::ServerError {
              id: item.id,
              status: response.status,
            });
            break;
          }
        }
        Disposition::Ambiguous => {
          warn!(id = %item.id, status = response.status, "unexpected status, stopping pass");
          report.stopped = Some(StopReason::UnexpectedStatus {
            id: item.id,
            status: response.status,
          });
          break;
        }
      }

      match per_module.iter_mut().find(|(module, _)| *module == item.module) {
        Some((_, count)) => *count += 1,
        None => per_module.push((item.module, 1)),
      }
    }

    Ok(())
  }

  fn notify(&self, per_module: &[(String, usize)]) {
    let count: usize = per_module.iter().map(|(_, n)| n).sum();
    if count == 0 {
      return;
    }

    self.notifier.emit(Notification::Flushed {
      count,
      modules: per_module.iter().map(|(m, _)| m.clone()).collect(),
    });
    for (module, count) in per_module {
      self.notifier.emit(Notification::ModuleFlushed {
        module: module.clone(),
        count: *count,
      });
    }
  }
}
