//! Background replay of queued mutations.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::http::Request;
use crate::network::Coalescer;
use crate::notify::NotificationDispatcher;
use crate::pending::{ActionStatus, PendingAction, PendingLog};

/// What started a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
  ConnectivityRestored,
  /// Periodic pass; the only trigger that honours backoff
  Timer,
  Forced,
}

impl SyncTrigger {
  fn respects_backoff(&self) -> bool {
    matches!(self, Self::Timer)
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub retrying: usize,
  pub failed_permanent: usize,
  /// Actions left alone because their backoff had not elapsed
  pub deferred: usize,
  /// Another pass was already running; nothing was done
  pub skipped: bool,
}

/// Clears the running flag when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for RunGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

pub struct SyncRunner {
  config: Arc<Config>,
  pending: PendingLog,
  network: Coalescer,
  notifier: Arc<NotificationDispatcher>,
  running: AtomicBool,
}

impl SyncRunner {
  pub fn new(
    config: Arc<Config>,
    pending: PendingLog,
    network: Coalescer,
    notifier: Arc<NotificationDispatcher>,
  ) -> Self {
    Self {
      config,
      pending,
      network,
      notifier,
      running: AtomicBool::new(false),
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Drain the pending log once, oldest action first.
  pub async fn run(&self, trigger: SyncTrigger) -> Result<SyncReport> {
    let Some(_guard) = RunGuard::acquire(&self.running) else {
      debug!(?trigger, "sync already running, skipping");
      return Ok(SyncReport {
        skipped: true,
        ..SyncReport::default()
      });
    };

    let mut report = SyncReport::default();
    let now = Utc::now();

    for queued in self.pending.replayable()? {
      if trigger.respects_backoff() && !queued.is_due(now) {
        report.deferred += 1;
        continue;
      }
      // Re-read: a concurrent path may have delivered or dropped it
      let mut action = match self.pending.get(queued.id) {
        Ok(Some(action)) => action,
        Ok(None) => {
          debug!(id = %queued.id, "action already gone");
          continue;
        }
        Err(e) => {
          warn!(id = %queued.id, error = %e, "failed to reload queued action");
          continue;
        }
      };
      if action.status == ActionStatus::FailedPermanent {
        continue;
      }

      report.attempted += 1;
      match self.deliver(&action).await {
        Ok(()) => {
          if let Err(e) = self.pending.remove(action.id) {
            // Still queued, so the next pass delivers it again
            warn!(id = %action.id, url = %action.url, error = %e, "delivered but could not dequeue");
            continue;
          }
          report.succeeded += 1;
          debug!(id = %action.id, url = %action.url, "replayed");
        }
        Err(e) => {
          if let Err(err) = self.record_failure(&mut action, &e, Utc::now()) {
            warn!(id = %action.id, url = %action.url, error = %err, "failed to record replay failure");
            continue;
          }
          match action.status {
            ActionStatus::FailedPermanent => report.failed_permanent += 1,
            _ => report.retrying += 1,
          }
        }
      }
    }

    info!(
      "Sync ({:?}): {} attempted, {} delivered, {} retrying, {} failed, {} deferred",
      trigger,
      report.attempted,
      report.succeeded,
      report.retrying,
      report.failed_permanent,
      report.deferred
    );

    if report.succeeded > 0 {
      self.notifier.sync_succeeded(report.succeeded);
      self.check_updates().await;
    }

    Ok(report)
  }

  /// Delay before the next timer-driven attempt after `retry_count` failures.
  pub fn backoff(&self, retry_count: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry_count.saturating_sub(1));
    let delay = self.config.sync.backoff_base_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(self.config.sync.backoff_max_ms))
  }

  async fn deliver(&self, action: &PendingAction) -> Result<(), FetchError> {
    let request = action
      .to_request()
      .map_err(|e| FetchError::Unavailable(e.to_string()))?;
    let response = self.network.fetch(request).await?;
    if response.is_success() {
      Ok(())
    } else {
      Err(FetchError::UpstreamError {
        status: response.status,
      })
    }
  }

  fn record_failure(
    &self,
    action: &mut PendingAction,
    error: &FetchError,
    now: DateTime<Utc>,
  ) -> Result<()> {
    action.retry_count += 1;
    action.last_error = Some(error.to_string());

    if action.retry_count > self.config.sync.max_retries {
      action.status = ActionStatus::FailedPermanent;
      action.next_attempt_at = None;
      warn!(
        id = %action.id,
        url = %action.url,
        attempts = action.retry_count,
        error = %error,
        "giving up on queued action"
      );
    } else {
      action.status = ActionStatus::Retrying;
      let delay = chrono::Duration::from_std(self.backoff(action.retry_count))
        .unwrap_or_else(|_| chrono::Duration::zero());
      action.next_attempt_at = Some(now + delay);
      debug!(id = %action.id, attempt = action.retry_count, error = %error, "replay failed");
    }

    if self.pending.update(action)? && action.status == ActionStatus::FailedPermanent {
      self.notifier.sync_failed(action);
    }
    Ok(())
  }

  /// Ask the server whether it has changes we have not seen.
  async fn check_updates(&self) {
    let path = &self.config.sync.check_updates_path;
    if path.is_empty() {
      return;
    }
    let request = match Request::get(&self.config.url_for(path)) {
      Ok(request) => request,
      Err(e) => {
        warn!(path, error = %e, "invalid check-updates url");
        return;
      }
    };

    match self.network.fetch(request).await {
      Ok(response) if response.is_success() => {
        let has_updates = response
          .json_body()
          .ok()
          .and_then(|body| body.get("hasUpdates").and_then(|v| v.as_bool()))
          .unwrap_or(false);
        if has_updates {
          self.notifier.updates_available();
        }
      }
      Ok(response) => debug!(status = response.status, "check-updates refused"),
      Err(e) => debug!(error = %e, "check-updates unreachable"),
    }
  }
}
