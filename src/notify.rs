//! User-facing notifications emitted by the layer.
//!
//! The layer renders notifications and hands them to the host over a channel;
//! how they are displayed is the host's business. Actions carry a target
//! locator that [`NotificationDispatcher::activate`] turns into focusing an
//! open session or opening a new one.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::clients::{ClientAction, ClientRegistry};
use crate::error::FetchError;
use crate::pending::PendingAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
  VersionUpdated,
  SyncSucceeded,
  SyncFailed,
  UpdatesAvailable,
  Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  /// Location to focus or open when the action is chosen
  #[serde(default, alias = "url")]
  pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub kind: NotificationKind,
  pub title: String,
  pub body: String,
  pub tag: Option<String>,
  /// Location for a click on the notification itself
  pub target: Option<String>,
  pub actions: Vec<NotificationAction>,
}

/// Shape of a JSON push payload. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct PushMessage {
  title: Option<String>,
  #[serde(alias = "message")]
  body: Option<String>,
  tag: Option<String>,
  url: Option<String>,
  #[serde(default)]
  actions: Vec<NotificationAction>,
}

pub struct NotificationDispatcher {
  tx: mpsc::UnboundedSender<Notification>,
  clients: Arc<ClientRegistry>,
  app_name: String,
  origin: String,
}

impl NotificationDispatcher {
  /// Create a dispatcher and the receiving end handed to the host.
  pub fn new(
    app_name: &str,
    origin: &str,
    clients: Arc<ClientRegistry>,
  ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Self {
      tx,
      clients,
      app_name: app_name.to_string(),
      origin: origin.trim_end_matches('/').to_string(),
    };
    (dispatcher, rx)
  }

  pub fn version_updated(&self, previous: Option<&str>, current: &str) -> Notification {
    let body = match previous {
      Some(previous) => format!("Updated from {} to {}.", previous, current),
      None => format!("Version {} is ready to use offline.", current),
    };
    self.deliver(Notification {
      kind: NotificationKind::VersionUpdated,
      title: format!("{} updated", self.app_name),
      body,
      tag: Some("version-updated".to_string()),
      target: Some(self.resolve("/")),
      actions: Vec::new(),
    })
  }

  pub fn sync_succeeded(&self, delivered: usize) -> Notification {
    let noun = if delivered == 1 { "change" } else { "changes" };
    self.deliver(Notification {
      kind: NotificationKind::SyncSucceeded,
      title: "Sync complete".to_string(),
      body: format!("{} offline {} synced.", delivered, noun),
      tag: Some("sync".to_string()),
      target: None,
      actions: Vec::new(),
    })
  }

  /// An action exhausted its retries and will not be replayed again.
  pub fn sync_failed(&self, action: &PendingAction) -> Notification {
    let error = action.last_error.as_deref().unwrap_or("unknown error");
    self.deliver(Notification {
      kind: NotificationKind::SyncFailed,
      title: "Sync failed".to_string(),
      body: format!(
        "{} {} could not be synced after {} attempts: {}",
        action.method, action.url, action.retry_count, error
      ),
      tag: Some(format!("sync-failed-{}", action.id)),
      target: Some(self.resolve("/sync")),
      actions: vec![NotificationAction {
        action: "review".to_string(),
        title: "Review".to_string(),
        target: Some(self.resolve("/sync")),
      }],
    })
  }

  pub fn updates_available(&self) -> Notification {
    self.deliver(Notification {
      kind: NotificationKind::UpdatesAvailable,
      title: "New data available".to_string(),
      body: "The server has changes since your last sync.".to_string(),
      tag: Some("updates".to_string()),
      target: Some(self.resolve("/")),
      actions: Vec::new(),
    })
  }

  /// Render a pushed payload: JSON when it parses, plain text otherwise.
  pub fn push(&self, payload: &[u8]) -> Result<Notification, FetchError> {
    let notification = self.render_push(payload)?;
    Ok(self.deliver(notification))
  }

  fn render_push(&self, payload: &[u8]) -> Result<Notification, FetchError> {
    let message = match serde_json::from_slice::<PushMessage>(payload) {
      Ok(message) => message,
      Err(_) => {
        let text = std::str::from_utf8(payload)
          .map_err(|e| FetchError::MalformedPush(e.to_string()))?
          .trim();
        PushMessage {
          body: (!text.is_empty()).then(|| text.to_string()),
          ..PushMessage::default()
        }
      }
    };

    let actions = message
      .actions
      .into_iter()
      .map(|a| NotificationAction {
        target: a.target.map(|t| self.resolve(&t)),
        ..a
      })
      .collect();

    Ok(Notification {
      kind: NotificationKind::Push,
      title: message.title.unwrap_or_else(|| self.app_name.clone()),
      body: message
        .body
        .unwrap_or_else(|| "You have a new notification.".to_string()),
      tag: message.tag,
      target: message.url.map(|u| self.resolve(&u)),
      actions,
    })
  }

  /// Handle a click on a notification or one of its actions.
  ///
  /// Returns `None` when nothing has a target to go to.
  pub fn activate(
    &self,
    notification: &Notification,
    action: Option<&str>,
    controller: Option<&str>,
  ) -> Option<ClientAction> {
    let target = match action {
      Some(name) => notification
        .actions
        .iter()
        .find(|a| a.action == name)
        .and_then(|a| a.target.clone())
        .or_else(|| notification.target.clone()),
      None => notification.target.clone(),
    }?;

    let result = self.clients.focus_or_open(&target, controller);
    debug!(?result, target, "notification activated");
    Some(result)
  }

  fn resolve(&self, target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
      target.to_string()
    } else {
      format!("{}/{}", self.origin, target.trim_start_matches('/'))
    }
  }

  fn deliver(&self, notification: Notification) -> Notification {
    if self.tx.send(notification.clone()).is_err() {
      warn!(title = %notification.title, "notification receiver dropped");
    }
    notification
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dispatcher() -> (
    NotificationDispatcher,
    mpsc::UnboundedReceiver<Notification>,
    Arc<ClientRegistry>,
  ) {
    let clients = Arc::new(ClientRegistry::new());
    let (dispatcher, rx) = NotificationDispatcher::new("Field", "https://app.test/", Arc::clone(&clients));
    (dispatcher, rx, clients)
  }

  #[test]
  fn test_json_push() {
    let (dispatcher, mut rx, _) = dispatcher();
    let payload = br#"{
      "title": "Delivery",
      "body": "Cement arrived at warehouse 3",
      "url": "/warehouses/3",
      "actions": [{"action": "open", "title": "Open", "url": "/warehouses/3/inventory"}]
    }"#;

    let notification = dispatcher.push(payload).unwrap();
    assert_eq!(notification.title, "Delivery");
    assert_eq!(notification.target.as_deref(), Some("https://app.test/warehouses/3"));
    assert_eq!(
      notification.actions[0].target.as_deref(),
      Some("https://app.test/warehouses/3/inventory")
    );
    assert_eq!(rx.try_recv().unwrap(), notification);
  }

  #[test]
  fn test_plain_text_push_fallback() {
    let (dispatcher, _rx, _) = dispatcher();
    let notification = dispatcher.push(b"Crew meeting at 7am").unwrap();
    assert_eq!(notification.kind, NotificationKind::Push);
    assert_eq!(notification.title, "Field");
    assert_eq!(notification.body, "Crew meeting at 7am");
  }

  #[test]
  fn test_non_utf8_push_is_malformed() {
    let (dispatcher, mut rx, _) = dispatcher();
    let err = dispatcher.push(&[0xff, 0xfe, 0x00]).unwrap_err();
    assert!(matches!(err, FetchError::MalformedPush(_)));
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_activate_focuses_matching_session() {
    let (dispatcher, _rx, clients) = dispatcher();
    let id = clients.open("https://app.test/warehouses/3", Some("v1"));
    let notification = dispatcher
      .push(br#"{"body":"x","url":"/warehouses/3"}"#)
      .unwrap();

    assert_eq!(
      dispatcher.activate(&notification, None, Some("v1")),
      Some(ClientAction::Focused(id))
    );
  }

  #[test]
  fn test_activate_action_opens_new_session() {
    let (dispatcher, _rx, clients) = dispatcher();
    let notification = dispatcher
      .push(br#"{"body":"x","actions":[{"action":"open","title":"Open","url":"/documents/9"}]}"#)
      .unwrap();

    let result = dispatcher.activate(&notification, Some("open"), Some("v1"));
    assert!(matches!(result, Some(ClientAction::Opened(_))));
    assert_eq!(clients.sessions()[0].url, "https://app.test/documents/9");
  }

  #[test]
  fn test_activate_without_target() {
    let (dispatcher, _rx, _) = dispatcher();
    let notification = dispatcher.sync_succeeded(2);
    assert_eq!(notification.body, "2 offline changes synced.");
    assert_eq!(dispatcher.activate(&notification, None, None), None);
  }
}
