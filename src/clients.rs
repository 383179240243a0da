//! Registry of open client sessions (views of the host application).
//!
//! Sessions are controlled by the build that was active when they opened or
//! that later claimed them. The lifecycle manager uses this to decide whether
//! a new build must wait, and notification actions use it to focus or open a
//! view.

use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSession {
  pub id: Uuid,
  /// Current location of the view
  pub url: String,
  /// Version controlling this session, if any
  pub controller: Option<String>,
  pub focused: bool,
}

/// Result of activating a notification action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
  Focused(Uuid),
  Opened(Uuid),
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
  sessions: RwLock<Vec<ClientSession>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a session at `url`, controlled by `controller`.
  pub fn open(&self, url: &str, controller: Option<&str>) -> Uuid {
    let session = ClientSession {
      id: Uuid::new_v4(),
      url: url.to_string(),
      controller: controller.map(String::from),
      focused: false,
    };
    let id = session.id;
    self.write().push(session);
    debug!(%id, url, "client opened");
    id
  }

  /// Returns false if the session was unknown.
  pub fn close(&self, id: Uuid) -> bool {
    let mut sessions = self.write();
    let before = sessions.len();
    sessions.retain(|s| s.id != id);
    before != sessions.len()
  }

  pub fn navigate(&self, id: Uuid, url: &str) -> bool {
    let mut sessions = self.write();
    match sessions.iter_mut().find(|s| s.id == id) {
      Some(session) => {
        session.url = url.to_string();
        true
      }
      None => false,
    }
  }

  /// Put every open session under `version`. Returns how many changed hands.
  pub fn claim(&self, version: &str) -> usize {
    let mut claimed = 0;
    for session in self.write().iter_mut() {
      if session.controller.as_deref() != Some(version) {
        session.controller = Some(version.to_string());
        claimed += 1;
      }
    }
    claimed
  }

  /// Sessions controlled by a version other than `version`.
  pub fn controlled_by_other(&self, version: &str) -> usize {
    self
      .read()
      .iter()
      .filter(|s| s.controller.as_deref().is_some_and(|c| c != version))
      .count()
  }

  /// Focus a session showing `target`, or open a new one there.
  pub fn focus_or_open(&self, target: &str, controller: Option<&str>) -> ClientAction {
    {
      let mut sessions = self.write();
      if let Some(index) = sessions.iter().position(|s| s.url == target) {
        for (i, session) in sessions.iter_mut().enumerate() {
          session.focused = i == index;
        }
        return ClientAction::Focused(sessions[index].id);
      }
    }

    let id = self.open(target, controller);
    for session in self.write().iter_mut() {
      session.focused = session.id == id;
    }
    ClientAction::Opened(id)
  }

  pub fn sessions(&self) -> Vec<ClientSession> {
    self.read().clone()
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ClientSession>> {
    self.sessions.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ClientSession>> {
    self.sessions.write().unwrap_or_else(PoisonError::into_inner)
  }
}
