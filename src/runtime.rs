//! Event loop and dispatch table.
//!
//! A single loop receives every [`Event`] and spawns the handler registered
//! for its [`EventKind`] as its own task. Handlers share state only through
//! the cloned [`Context`].

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::eviction::{self, EvictionReport};
use crate::clients::ClientAction;
use crate::config::Config;
use crate::context::Context;
use crate::control::{ControlMessage, ControlReply};
use crate::error::FetchError;
use crate::event::{respond, Event, EventHandler, EventKind};
use crate::http::{Request, Response};
use crate::lifecycle::{ActivationReport, InstallReport};
use crate::network::Transport;
use crate::notify::Notification;
use crate::sync::{SyncReport, SyncTrigger};

type Handler = fn(Context, Event) -> BoxFuture<'static, ()>;

/// Owns the event loop until shutdown
pub struct Runtime {
  ctx: Context,
  handlers: HashMap<EventKind, Handler>,
  events: EventHandler,
}

impl Runtime {
  /// Build the context from `config`, start the loop and kick off install.
  pub fn start(
    config: Config,
    transport: Arc<dyn Transport>,
  ) -> Result<(RuntimeHandle, mpsc::UnboundedReceiver<Notification>)> {
    let (ctx, notifications) = Context::new(config, transport)?;
    Ok((Self::spawn(ctx), notifications))
  }

  /// Start the loop over an already wired context.
  pub fn spawn(ctx: Context) -> RuntimeHandle {
    let events = EventHandler::new(
      Duration::from_secs(ctx.config.sync.interval_secs),
      Duration::from_secs(ctx.config.eviction.interval_secs),
    );
    let tx = events.sender();
    let runtime = Self {
      ctx,
      handlers: dispatch_table(),
      events,
    };
    let task = tokio::spawn(runtime.run());

    // Install first so the loop's first task brings up this build
    let _ = tx.send(Event::Install { reply: None });
    RuntimeHandle { tx, task }
  }

  async fn run(mut self) {
    info!(version = %self.ctx.config.version, origin = %self.ctx.config.origin, "runtime started");

    while let Some(event) = self.events.next().await {
      let kind = event.kind();
      if kind == EventKind::Shutdown {
        break;
      }
      match self.handlers.get(&kind) {
        Some(handler) => {
          tokio::spawn(handler(self.ctx.clone(), event));
        }
        None => warn!(?kind, "no handler registered"),
      }
    }

    self.ctx.layer.settle().await;
    info!("runtime stopped");
  }
}

fn dispatch_table() -> HashMap<EventKind, Handler> {
  let mut handlers: HashMap<EventKind, Handler> = HashMap::new();
  handlers.insert(EventKind::Install, on_install);
  handlers.insert(EventKind::Fetch, on_fetch);
  handlers.insert(EventKind::Sync, on_sync);
  handlers.insert(EventKind::Push, on_push);
  handlers.insert(EventKind::Control, on_control);
  handlers.insert(EventKind::NotificationClick, on_notification_click);
  handlers.insert(EventKind::ClientOpened, on_client_opened);
  handlers.insert(EventKind::ClientClosed, on_client_closed);
  handlers.insert(EventKind::ClientNavigated, on_client_navigated);
  handlers.insert(EventKind::Evict, on_evict);
  handlers
}

fn on_install(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::Install { reply } = event else {
      return;
    };
    let result = ctx.lifecycle.install().await;
    if let Err(e) = &result {
      warn!(error = %e, "install failed");
    }
    respond(reply, result);
  }
  .boxed()
}

fn on_fetch(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::Fetch { request, reply } = event else {
      return;
    };
    let _ = reply.send(ctx.fetch(request).await);
  }
  .boxed()
}

fn on_sync(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::Sync { trigger, reply } = event else {
      return;
    };
    let result = ctx.sync.run(trigger).await;
    if let Err(e) = &result {
      warn!(?trigger, error = %e, "sync pass failed");
    }
    respond(reply, result);
  }
  .boxed()
}

fn on_push(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::Push { payload, reply } = event else {
      return;
    };
    let result = ctx.notifier.push(&payload);
    if let Err(e) = &result {
      warn!(error = %e, bytes = payload.len(), "push dropped");
    }
    respond(reply, result);
  }
  .boxed()
}

fn on_control(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::Control { message, reply } = event else {
      return;
    };
    debug!(?message, "control message");
    let result = match message {
      ControlMessage::SkipWaiting => ctx
        .lifecycle
        .skip_waiting()
        .map(|activation| ControlReply::SkipWaiting { activation }),
      ControlMessage::GetVersion => Ok(ControlReply::Version {
        active: ctx.lifecycle.active_version(),
        current: ctx.lifecycle.current_version().to_string(),
      }),
      ControlMessage::ForceSync => ctx.sync.run(SyncTrigger::Forced).await.map(ControlReply::Sync),
      ControlMessage::GetStatus => ctx.pending.stats().map(|queue| ControlReply::Status {
        state: ctx.lifecycle.state(),
        active: ctx.lifecycle.active_version(),
        queue,
      }),
    };
    respond(reply, result);
  }
  .boxed()
}

fn on_notification_click(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::NotificationClick {
      notification,
      action,
      reply,
    } = event
    else {
      return;
    };
    let controller = ctx.lifecycle.active_version();
    let result = ctx
      .notifier
      .activate(&notification, action.as_deref(), controller.as_deref());
    respond(reply, result);
  }
  .boxed()
}

fn on_client_opened(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::ClientOpened { url, reply } = event else {
      return;
    };
    respond(reply, ctx.lifecycle.open_client(&url));
  }
  .boxed()
}

fn on_client_closed(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::ClientClosed { id, reply } = event else {
      return;
    };
    respond(reply, ctx.lifecycle.close_client(id));
  }
  .boxed()
}

fn on_client_navigated(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::ClientNavigated { id, url, reply } = event else {
      return;
    };
    let known = ctx.clients.navigate(id, &url);
    if !known {
      debug!(%id, url = %url, "navigation for unknown session");
    }
    respond(reply, known);
  }
  .boxed()
}

fn on_evict(ctx: Context, event: Event) -> BoxFuture<'static, ()> {
  async move {
    let Event::Evict { reply } = event else {
      return;
    };
    let storage = Arc::clone(ctx.layer.storage());
    let result = tokio::task::spawn_blocking(move || eviction::sweep(storage.as_ref()))
      .await
      .map_err(|e| eyre!("Eviction task failed: {}", e))
      .and_then(|r| r);
    if let Err(e) = &result {
      warn!(error = %e, "eviction sweep failed");
    }
    respond(reply, result);
  }
  .boxed()
}

/// Host-side handle to a running [`Runtime`].
pub struct RuntimeHandle {
  tx: mpsc::UnboundedSender<Event>,
  task: JoinHandle<()>,
}

impl RuntimeHandle {
  /// Route an outgoing call through the layer.
  pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Event::Fetch { request, reply })
      .map_err(|_| FetchError::Unavailable("runtime stopped".to_string()))?;
    rx.await
      .map_err(|_| FetchError::Unavailable("runtime stopped".to_string()))?
  }

  pub async fn control(&self, message: ControlMessage) -> Result<ControlReply> {
    self.request(|reply| Event::Control { message, reply }).await?
  }

  /// Re-run install, e.g. after the host shipped new assets.
  pub async fn install(&self) -> Result<InstallReport> {
    self.request(|reply| Event::Install { reply }).await?
  }

  /// Signal that the network came back; drains the log ignoring backoff.
  pub async fn connectivity_restored(&self) -> Result<SyncReport> {
    self
      .request(|reply| Event::Sync {
        trigger: SyncTrigger::ConnectivityRestored,
        reply,
      })
      .await?
  }

  pub async fn push(&self, payload: Vec<u8>) -> Result<Notification> {
    let notification = self.request(|reply| Event::Push { payload, reply }).await??;
    Ok(notification)
  }

  pub async fn notification_click(
    &self,
    notification: Notification,
    action: Option<String>,
  ) -> Result<Option<ClientAction>> {
    self
      .request(|reply| Event::NotificationClick {
        notification,
        action,
        reply,
      })
      .await
  }

  pub async fn open_client(&self, url: &str) -> Result<Uuid> {
    let url = url.to_string();
    self.request(|reply| Event::ClientOpened { url, reply }).await
  }

  pub async fn close_client(&self, id: Uuid) -> Result<Option<ActivationReport>> {
    self.request(|reply| Event::ClientClosed { id, reply }).await?
  }

  /// Record that a session now shows `url`. False if the session is unknown.
  pub async fn navigate_client(&self, id: Uuid, url: &str) -> Result<bool> {
    let url = url.to_string();
    self
      .request(|reply| Event::ClientNavigated { id, url, reply })
      .await
  }

  pub async fn evict(&self) -> Result<EvictionReport> {
    self.request(|reply| Event::Evict { reply }).await?
  }

  /// Stop the loop and wait for outstanding cache writes.
  pub async fn shutdown(self) -> Result<()> {
    let _ = self.tx.send(Event::Shutdown);
    self
      .task
      .await
      .map_err(|e| eyre!("Runtime task failed: {}", e))
  }

  async fn request<T, F>(&self, make: F) -> Result<T>
  where
    F: FnOnce(Option<oneshot::Sender<T>>) -> Event,
  {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(make(Some(reply)))
      .map_err(|_| eyre!("Runtime stopped"))?;
    rx.await.map_err(|_| eyre!("Runtime dropped the request"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::lifecycle::LifecycleState;
  use crate::network::mock::MockTransport;
  use crate::notify::NotificationKind;
  use reqwest::Method;
  use url::Url;

  fn start(mock: &MockTransport) -> (RuntimeHandle, mpsc::UnboundedReceiver<Notification>) {
    let mut config = Config::for_origin("https://app.test");
    config.install.shell_assets = vec!["/".to_string()];
    config.install.prewarm = Vec::new();
    config.network_timeout_ms = 200;
    config.sync.interval_secs = 0;
    config.eviction.interval_secs = 0;
    let (ctx, rx) = Context::with_database(
      config,
      Database::open_in_memory().unwrap(),
      mock.clone().into_transport(),
    )
    .unwrap();
    (Runtime::spawn(ctx), rx)
  }

  async fn wait_for_active(handle: &RuntimeHandle) {
    for _ in 0..100 {
      if let ControlReply::Status {
        state: LifecycleState::Active,
        ..
      } = handle.control(ControlMessage::GetStatus).await.unwrap()
      {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("runtime never activated");
  }

  #[tokio::test]
  async fn test_cache_first_survives_going_offline() {
    let mock = MockTransport::new();
    mock.respond("GET", "https://app.test/", 200, "<html></html>");
    mock.respond("GET", "https://app.test/img/crane.png", 200, "PNGDATA");
    let (handle, _rx) = start(&mock);
    wait_for_active(&handle).await;

    let url = "https://app.test/img/crane.png";
    let first = handle.fetch(Request::get(url).unwrap()).await.unwrap();
    assert_eq!(first.source(), Some("network"));

    mock.set_offline(true);
    let mut second = None;
    // The cache write lands in the background
    for _ in 0..100 {
      if let Ok(response) = handle.fetch(Request::get(url).unwrap()).await {
        second = Some(response);
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = second.expect("cached image never served");
    assert_eq!(second.body, first.body);
    assert_eq!(second.source(), Some("cache"));

    handle.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_control_messages() {
    let mock = MockTransport::new();
    mock.respond("GET", "https://app.test/", 200, "<html></html>");
    let (handle, _rx) = start(&mock);
    wait_for_active(&handle).await;

    let reply = handle.control(ControlMessage::GetVersion).await.unwrap();
    assert_eq!(
      reply,
      ControlReply::Version {
        active: Some("v1".to_string()),
        current: "v1".to_string()
      }
    );

    let reply = handle.control(ControlMessage::SkipWaiting).await.unwrap();
    assert_eq!(reply, ControlReply::SkipWaiting { activation: None });

    let reply = handle.control(ControlMessage::ForceSync).await.unwrap();
    assert_eq!(reply, ControlReply::Sync(SyncReport::default()));

    handle.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_offline_write_syncs_on_reconnect() {
    let mock = MockTransport::new();
    mock.respond("GET", "https://app.test/", 200, "<html></html>");
    let (handle, mut rx) = start(&mock);
    wait_for_active(&handle).await;

    mock.set_offline(true);
    let request = Request::new(
      Method::PUT,
      Url::parse("https://app.test/api/warehouses/2").unwrap(),
    )
    .with_body(r#"{"name":"North yard"}"#);
    let response = handle.fetch(request).await.unwrap();
    assert_eq!(response.status, 202);

    mock.set_offline(false);
    mock.respond("PUT", "https://app.test/api/warehouses/2", 200, "{}");
    let report = handle.connectivity_restored().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let mut kinds = Vec::new();
    while let Ok(n) = rx.try_recv() {
      kinds.push(n.kind);
    }
    assert!(kinds.contains(&NotificationKind::SyncSucceeded));

    handle.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_push_and_click_open_a_session() {
    let mock = MockTransport::new();
    mock.respond("GET", "https://app.test/", 200, "<html></html>");
    let (handle, _rx) = start(&mock);
    wait_for_active(&handle).await;

    let notification = handle
      .push(br#"{"title":"Inspection","body":"Site 4 passed","url":"/projects/4"}"#.to_vec())
      .await
      .unwrap();
    assert_eq!(notification.title, "Inspection");

    let opened = handle.notification_click(notification.clone(), None).await.unwrap();
    let Some(ClientAction::Opened(id)) = opened else {
      panic!("expected a new session");
    };
    let again = handle.notification_click(notification, None).await.unwrap();
    assert_eq!(again, Some(ClientAction::Focused(id)));

    assert!(handle.close_client(id).await.unwrap().is_none());
    assert!(handle.push(vec![0xff, 0xfe]).await.is_err());

    handle.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_click_focuses_a_session_that_navigated_there() {
    let mock = MockTransport::new();
    mock.respond("GET", "https://app.test/", 200, "<html></html>");
    let (handle, _rx) = start(&mock);
    wait_for_active(&handle).await;

    let id = handle.open_client("https://app.test/").await.unwrap();
    assert!(handle.navigate_client(id, "https://app.test/equipment/9").await.unwrap());
    assert!(!handle.navigate_client(Uuid::new_v4(), "https://app.test/").await.unwrap());

    let notification = handle
      .push(br#"{"title":"Service due","body":"Excavator 9","url":"/equipment/9"}"#.to_vec())
      .await
      .unwrap();
    let clicked = handle.notification_click(notification, None).await.unwrap();
    assert_eq!(clicked, Some(ClientAction::Focused(id)));

    handle.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_eviction_on_demand() {
    let mock = MockTransport::new();
    mock.respond("GET", "https://app.test/", 200, "<html></html>");
    let (handle, _rx) = start(&mock);
    wait_for_active(&handle).await;

    let report = handle.evict().await.unwrap();
    assert_eq!(report.namespaces_scanned, 5);
    assert_eq!(report.entries_evicted, 0);

    handle.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_requests_fail_after_shutdown() {
    let mock = MockTransport::new();
    let (handle, _rx) = start(&mock);
    let tx = handle.tx.clone();
    handle.shutdown().await.unwrap();

    assert!(tx.send(Event::Shutdown).is_err());
  }
}
