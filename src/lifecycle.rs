//! Install, activate, and version cutover of namespaces.
//!
//! `Installing -> Installed (waiting) -> Activating -> Active`. Installing
//! creates this build's namespaces and seeds them; activating deletes every
//! namespace stamped with another build in one sweep and takes over every
//! open session. Activation waits while sessions are still controlled by an
//! older build, unless skip-waiting is requested.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheLayer, CacheStorage, Namespace, NamespaceFamily, SqliteStorage};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::error::FetchError;
use crate::http::Request;
use crate::notify::NotificationDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
  /// Nothing installed by this process yet
  Idle,
  Installing,
  /// Installed, waiting for old sessions to go away
  Installed,
  Activating,
  Active,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
  pub seeded: usize,
  pub skipped: Vec<String>,
  pub prewarmed: usize,
  pub activated: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
  pub removed: Vec<String>,
  pub claimed: usize,
  pub previous: Option<String>,
}

struct LifecycleInner {
  state: LifecycleState,
  active_version: Option<String>,
  skip_waiting: bool,
}

pub struct LifecycleManager {
  config: Arc<Config>,
  layer: CacheLayer<SqliteStorage>,
  clients: Arc<ClientRegistry>,
  notifier: Arc<NotificationDispatcher>,
  inner: Mutex<LifecycleInner>,
}

impl LifecycleManager {
  /// Create the manager, resuming the version whose namespaces survive from a
  /// previous run.
  pub fn new(
    config: Arc<Config>,
    layer: CacheLayer<SqliteStorage>,
    clients: Arc<ClientRegistry>,
    notifier: Arc<NotificationDispatcher>,
  ) -> Result<Self> {
    let mut versions: Vec<String> = layer
      .storage()
      .namespaces()?
      .into_iter()
      .map(|ns| ns.version)
      .collect();
    versions.sort();
    versions.dedup();

    let (state, active_version) = match versions.as_slice() {
      [only] => {
        debug!(version = %only, "resuming previously active version");
        (LifecycleState::Active, Some(only.clone()))
      }
      _ => (LifecycleState::Idle, None),
    };

    Ok(Self {
      config,
      layer,
      clients,
      notifier,
      inner: Mutex::new(LifecycleInner {
        state,
        active_version,
        skip_waiting: false,
      }),
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.lock().state
  }

  /// The build whose namespaces currently serve requests.
  pub fn active_version(&self) -> Option<String> {
    self.lock().active_version.clone()
  }

  /// The build this process carries.
  pub fn current_version(&self) -> &str {
    &self.config.version
  }

  /// Create and seed this build's namespaces, then activate unless old
  /// sessions hold it back.
  pub async fn install(&self) -> Result<InstallReport> {
    let version = self.config.version.clone();
    self.lock().state = LifecycleState::Installing;
    info!(%version, "installing");

    if let Err(e) = self.create_namespaces(&version) {
      self.lock().state = LifecycleState::Idle;
      return Err(e);
    }

    let mut report = InstallReport::default();
    let shell = NamespaceFamily::Shell.namespace_name(&version);
    for (path, outcome) in self.seed(&shell, &self.config.install.shell_assets).await {
      match outcome {
        Ok(()) => report.seeded += 1,
        Err(e) => {
          warn!(asset = %path, error = %e, "shell asset skipped");
          report.skipped.push(path);
        }
      }
    }

    let api = NamespaceFamily::Api.namespace_name(&version);
    for (path, outcome) in self.seed(&api, &self.config.install.prewarm).await {
      match outcome {
        Ok(()) => report.prewarmed += 1,
        Err(e) => debug!(endpoint = %path, error = %e, "pre-warm skipped"),
      }
    }

    let should_activate = {
      let mut inner = self.lock();
      inner.state = LifecycleState::Installed;
      inner.skip_waiting || self.clients.controlled_by_other(&version) == 0
    };

    info!(
      "Installed {}: {} shell assets, {} pre-warmed, {} skipped",
      version,
      report.seeded,
      report.prewarmed,
      report.skipped.len()
    );

    if should_activate {
      self.activate()?;
      report.activated = true;
    } else {
      info!(%version, "waiting for old sessions to close");
    }

    Ok(report)
  }

  /// Cut over to this build: sweep stale namespaces, claim every session.
  pub fn activate(&self) -> Result<ActivationReport> {
    let version = self.config.version.clone();
    {
      let mut inner = self.lock();
      match inner.state {
        LifecycleState::Installed => inner.state = LifecycleState::Activating,
        LifecycleState::Active if inner.active_version.as_deref() == Some(version.as_str()) => {
          return Ok(ActivationReport {
            previous: inner.active_version.clone(),
            ..ActivationReport::default()
          });
        }
        other => return Err(eyre!("Cannot activate from state {:?}", other)),
      }
    }

    let removed = match self.layer.storage().delete_stale_namespaces(&version) {
      Ok(removed) => removed,
      Err(e) => {
        self.lock().state = LifecycleState::Installed;
        return Err(e);
      }
    };

    let previous = {
      let mut inner = self.lock();
      let previous = inner.active_version.replace(version.clone());
      inner.state = LifecycleState::Active;
      inner.skip_waiting = false;
      previous
    };
    let claimed = self.clients.claim(&version);

    info!(
      "Activated {}: removed {} stale namespaces, claimed {} sessions",
      version,
      removed.len(),
      claimed
    );

    if previous.as_deref().is_some_and(|p| p != version) {
      self.notifier.version_updated(previous.as_deref(), &version);
    }

    Ok(ActivationReport {
      removed,
      claimed,
      previous,
    })
  }

  /// Force activation even while old sessions are open.
  pub fn skip_waiting(&self) -> Result<Option<ActivationReport>> {
    let waiting = {
      let mut inner = self.lock();
      inner.skip_waiting = true;
      inner.state == LifecycleState::Installed
    };
    if waiting {
      return self.activate().map(Some);
    }
    Ok(None)
  }

  /// Register a session under the active build.
  pub fn open_client(&self, url: &str) -> Uuid {
    let controller = self.active_version();
    self.clients.open(url, controller.as_deref())
  }

  /// Close a session; the last old session closing releases a waiting install.
  pub fn close_client(&self, id: Uuid) -> Result<Option<ActivationReport>> {
    self.clients.close(id);
    let release = {
      let inner = self.lock();
      inner.state == LifecycleState::Installed
        && self.clients.controlled_by_other(&self.config.version) == 0
    };
    if release {
      return self.activate().map(Some);
    }
    Ok(None)
  }

  fn create_namespaces(&self, version: &str) -> Result<()> {
    for family in NamespaceFamily::ALL {
      self.layer.storage().create_namespace(&Namespace {
        name: family.namespace_name(version),
        version: version.to_string(),
        capacity: self.config.capacity(family),
      })?;
    }
    Ok(())
  }

  /// Fetch every path concurrently and store the 2xx answers.
  async fn seed(
    &self,
    namespace: &str,
    paths: &[String],
  ) -> Vec<(String, std::result::Result<(), FetchError>)> {
    let fetches = paths.iter().map(|path| async move {
      let url = self.config.url_for(path);
      let outcome = match Request::get(&url) {
        Ok(request) => match self.layer.network().fetch(request.clone()).await {
          Ok(response) => self.layer.store(namespace, &request, &response),
          Err(e) => Err(e),
        },
        Err(e) => Err(FetchError::Unavailable(format!("{}: {}", url, e))),
      };
      (path.clone(), outcome)
    });
    join_all(fetches).await
  }

  fn lock(&self) -> MutexGuard<'_, LifecycleInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
