//! Shared state handed to every event handler.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::{CacheLayer, CacheStorage, SqliteStorage};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::error::FetchError;
use crate::http::{Request, Response};
use crate::lifecycle::LifecycleManager;
use crate::network::{Coalescer, Transport};
use crate::notify::{Notification, NotificationDispatcher};
use crate::pending::PendingLog;
use crate::router::{self, RequestRouter};
use crate::sync::SyncRunner;

/// Everything a handler may touch. Cheap to clone; all members are shared.
#[derive(Clone)]
pub struct Context {
  pub config: Arc<Config>,
  pub router: Arc<RequestRouter>,
  pub layer: CacheLayer<SqliteStorage>,
  pub pending: PendingLog,
  pub lifecycle: Arc<LifecycleManager>,
  pub clients: Arc<ClientRegistry>,
  pub notifier: Arc<NotificationDispatcher>,
  pub sync: Arc<SyncRunner>,
}

impl Context {
  /// Open the configured database and wire every component to it.
  pub fn new(
    config: Config,
    transport: Arc<dyn Transport>,
  ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
    let db = Database::open(config.storage.path.as_deref())?;
    Self::with_database(config, db, transport)
  }

  pub fn with_database(
    config: Config,
    db: Database,
    transport: Arc<dyn Transport>,
  ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
    let router = Arc::new(RequestRouter::new(&config)?);
    let config = Arc::new(config);

    let network = Coalescer::new(transport, config.network_timeout());
    let layer = CacheLayer::new(Arc::new(SqliteStorage::new(db.clone())), network.clone());
    let pending = PendingLog::new(db);

    let clients = Arc::new(ClientRegistry::new());
    let (notifier, notifications) =
      NotificationDispatcher::new(&config.app_name, &config.origin, Arc::clone(&clients));
    let notifier = Arc::new(notifier);

    let lifecycle = Arc::new(LifecycleManager::new(
      Arc::clone(&config),
      layer.clone(),
      Arc::clone(&clients),
      Arc::clone(&notifier),
    )?);
    let sync = Arc::new(SyncRunner::new(
      Arc::clone(&config),
      pending.clone(),
      network,
      Arc::clone(&notifier),
    ));

    let ctx = Self {
      config,
      router,
      layer,
      pending,
      lifecycle,
      clients,
      notifier,
      sync,
    };
    Ok((ctx, notifications))
  }

  /// Serve one outgoing call through the router.
  pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    router::handle(self, request).await
  }
}
