use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use color_eyre::Result;

use crate::cache::eviction::EvictionReport;
use crate::clients::ClientAction;
use crate::control::{ControlMessage, ControlReply};
use crate::error::FetchError;
use crate::http::{Request, Response};
use crate::lifecycle::{ActivationReport, InstallReport};
use crate::notify::Notification;
use crate::sync::{SyncReport, SyncTrigger};

/// Reply slot for events whose sender may or may not wait for the outcome.
pub type Reply<T> = Option<oneshot::Sender<T>>;

/// Everything the runtime reacts to
#[derive(Debug)]
pub enum Event {
  /// Create and seed this build's namespaces
  Install {
    reply: Reply<Result<InstallReport>>,
  },
  /// An outgoing call from the host
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Response, FetchError>>,
  },
  /// Drain the pending log
  Sync {
    trigger: SyncTrigger,
    reply: Reply<Result<SyncReport>>,
  },
  /// Raw push payload from the delivery service
  Push {
    payload: Vec<u8>,
    reply: Reply<Result<Notification, FetchError>>,
  },
  Control {
    message: ControlMessage,
    reply: Reply<Result<ControlReply>>,
  },
  NotificationClick {
    notification: Notification,
    action: Option<String>,
    reply: Reply<Option<ClientAction>>,
  },
  ClientOpened {
    url: String,
    reply: Reply<Uuid>,
  },
  ClientClosed {
    id: Uuid,
    reply: Reply<Result<Option<ActivationReport>>>,
  },
  /// A session moved to another page
  ClientNavigated {
    id: Uuid,
    url: String,
    reply: Reply<bool>,
  },
  /// Capacity sweep over every namespace
  Evict {
    reply: Reply<Result<EvictionReport>>,
  },
  /// Stop the loop after in-flight work settles
  Shutdown,
}

/// Key of the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Fetch,
  Sync,
  Push,
  Control,
  NotificationClick,
  ClientOpened,
  ClientClosed,
  ClientNavigated,
  Evict,
  Shutdown,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Install { .. } => EventKind::Install,
      Self::Fetch { .. } => EventKind::Fetch,
      Self::Sync { .. } => EventKind::Sync,
      Self::Push { .. } => EventKind::Push,
      Self::Control { .. } => EventKind::Control,
      Self::NotificationClick { .. } => EventKind::NotificationClick,
      Self::ClientOpened { .. } => EventKind::ClientOpened,
      Self::ClientClosed { .. } => EventKind::ClientClosed,
      Self::ClientNavigated { .. } => EventKind::ClientNavigated,
      Self::Evict { .. } => EventKind::Evict,
      Self::Shutdown => EventKind::Shutdown,
    }
  }
}

/// Send a reply if anyone is still waiting for it.
pub fn respond<T>(reply: Reply<T>, value: T) {
  if let Some(tx) = reply {
    // Receiver gone means the caller stopped caring
    let _ = tx.send(value);
  }
}

/// Event source: host-submitted events plus the periodic timers
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler. A zero period disables that timer.
  pub fn new(sync_period: Duration, eviction_period: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    spawn_timer(tx.clone(), sync_period, || Event::Sync {
      trigger: SyncTrigger::Timer,
      reply: None,
    });
    spawn_timer(tx.clone(), eviction_period, || Event::Evict { reply: None });

    Self { tx, rx }
  }

  /// Get a sender for submitting events
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Emit `make()` every `period`, starting one period from now.
fn spawn_timer<F>(tx: mpsc::UnboundedSender<Event>, period: Duration, make: F)
where
  F: Fn() -> Event + Send + 'static,
{
  if period.is_zero() {
    return;
  }
  tokio::spawn(async move {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      ticker.tick().await;
      if tx.send(make()).is_err() {
        break;
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_timers_feed_the_queue() {
    let mut events = EventHandler::new(Duration::from_millis(30), Duration::from_millis(75));

    let first = events.next().await.unwrap();
    assert_eq!(first.kind(), EventKind::Sync);
    let second = events.next().await.unwrap();
    assert_eq!(second.kind(), EventKind::Sync);
    let third = events.next().await.unwrap();
    assert_eq!(third.kind(), EventKind::Evict);
  }

  #[tokio::test]
  async fn test_sender_and_disabled_timers() {
    let mut events = EventHandler::new(Duration::ZERO, Duration::ZERO);
    events.sender().send(Event::Shutdown).unwrap();
    assert_eq!(events.next().await.unwrap().kind(), EventKind::Shutdown);
  }

  #[test]
  fn test_respond_without_receiver() {
    let (tx, rx) = oneshot::channel::<u8>();
    drop(rx);
    respond(Some(tx), 1);
    respond::<u8>(None, 2);
  }
}
