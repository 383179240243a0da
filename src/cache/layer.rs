//! Cache layer that orchestrates caching strategies with network fetching.

use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::placeholder::ResourceFamily;
use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheKey};
use crate::error::FetchError;
use crate::http::{Request, Response};
use crate::network::Coalescer;

/// Read/write order between a namespace and the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  NetworkOnly,
  CacheOnly,
}

/// What to serve when network-first runs out of real answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
  None,
  /// Synthesize the family's offline placeholder
  Placeholder(ResourceFamily),
  /// Serve the cached shell document from another namespace
  Shell { namespace: String, url: String },
}

/// Cache layer that runs the five strategies against a storage backend.
///
/// Responses are handed back before their cache writes finish; writes run as
/// spawned tasks that [`CacheLayer::settle`] can wait for.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  network: Coalescer,
  background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<S>, network: Coalescer) -> Self {
    Self {
      storage,
      network,
      background: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn network(&self) -> &Coalescer {
    &self.network
  }

  /// Run `strategy` for `request` against `namespace`.
  pub async fn dispatch(
    &self,
    strategy: Strategy,
    request: Request,
    namespace: &str,
    fallback: &Fallback,
  ) -> Result<Response, FetchError> {
    debug!(?strategy, namespace, url = %request.url, "dispatching");
    match strategy {
      Strategy::CacheFirst => self.cache_first(request, namespace).await,
      Strategy::NetworkFirst => self.network_first(request, namespace, fallback).await,
      Strategy::StaleWhileRevalidate => {
        self
          .stale_while_revalidate(request, namespace, fallback)
          .await
      }
      Strategy::NetworkOnly => self.network_only(request).await,
      Strategy::CacheOnly => self.cache_only(&request, namespace),
    }
  }

  /// Serve from the namespace; go to the network only on a miss.
  pub async fn cache_first(&self, request: Request, namespace: &str) -> Result<Response, FetchError> {
    let key = request.cache_key();
    if let Some(cached) = self.lookup(namespace, &key) {
      return Ok(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_in_background(namespace, key, &response);
        Ok(response)
      }
      Err(e) => {
        debug!(key = %key, error = %e, "cache-first double miss");
        Err(FetchError::Unavailable(key.to_string()))
      }
    }
  }

  /// Prefer the network; fall back to the namespace, then to `fallback`.
  pub async fn network_first(
    &self,
    request: Request,
    namespace: &str,
    fallback: &Fallback,
  ) -> Result<Response, FetchError> {
    let key = request.cache_key();

    let upstream = match self.network.fetch(request).await {
      Ok(response) if response.is_success() => {
        self.store_in_background(namespace, key, &response);
        return Ok(response);
      }
      Ok(response) => {
        debug!(key = %key, status = response.status, "upstream error, falling back to cache");
        Some(response)
      }
      Err(e) => {
        debug!(key = %key, error = %e, "falling back to cache");
        None
      }
    };

    if let Some(cached) = self.lookup(namespace, &key) {
      return Ok(cached);
    }

    match fallback {
      Fallback::Placeholder(family) => {
        debug!(key = %key, ?family, "serving offline placeholder");
        return Ok(family.placeholder());
      }
      Fallback::Shell { namespace, url } => {
        if let Some(shell) = self.lookup(namespace, &CacheKey::new("GET", url)) {
          debug!(key = %key, shell = %url, "serving cached shell");
          return Ok(shell);
        }
      }
      Fallback::None => {}
    }

    // A real upstream answer beats inventing one.
    upstream.ok_or_else(|| FetchError::Unavailable(key.to_string()))
  }

  /// Serve the cached entry now and refresh it in the background.
  pub async fn stale_while_revalidate(
    &self,
    request: Request,
    namespace: &str,
    fallback: &Fallback,
  ) -> Result<Response, FetchError> {
    let key = request.cache_key();
    let Some(cached) = self.lookup(namespace, &key) else {
      return self.network_first(request, namespace, fallback).await;
    };

    let storage = Arc::clone(&self.storage);
    let network = self.network.clone();
    let namespace = namespace.to_string();
    let refresh = tokio::spawn(async move {
      match network.fetch(request).await {
        Ok(response) if response.is_success() => {
          write_entry(storage.as_ref(), &namespace, CacheEntry::from_response(key, &response));
        }
        Ok(response) => debug!(key = %key, status = response.status, "revalidation skipped"),
        Err(e) => debug!(key = %key, error = %e, "revalidation failed"),
      }
    });
    self.track(refresh);

    Ok(cached)
  }

  /// Always the network; the namespace is never read or written.
  pub async fn network_only(&self, request: Request) -> Result<Response, FetchError> {
    self.network.fetch(request).await
  }

  /// Always the namespace; the network is never touched.
  pub fn cache_only(&self, request: &Request, namespace: &str) -> Result<Response, FetchError> {
    let key = request.cache_key();
    self
      .lookup(namespace, &key)
      .ok_or_else(|| FetchError::CacheMiss(key.to_string()))
  }

  /// Store a 2xx response. Used by install seeding, which must wait for it.
  pub fn store(&self, namespace: &str, request: &Request, response: &Response) -> Result<(), FetchError> {
    if !response.is_success() {
      return Err(FetchError::UpstreamError {
        status: response.status,
      });
    }
    let entry = CacheEntry::from_response(request.cache_key(), response);
    self
      .storage
      .put(namespace, &entry)
      .map_err(|e| match e.downcast::<FetchError>() {
        Ok(fetch_error) => fetch_error,
        Err(other) => FetchError::Storage(other.to_string()),
      })
  }

  /// Wait for every outstanding cache write and revalidation.
  pub async fn settle(&self) {
    loop {
      let pending: Vec<JoinHandle<()>> = {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        background.drain(..).collect()
      };
      if pending.is_empty() {
        return;
      }
      for handle in pending {
        if let Err(e) = handle.await {
          warn!(error = %e, "background cache task panicked");
        }
      }
    }
  }

  /// Read an entry, treating storage failures as a miss.
  fn lookup(&self, namespace: &str, key: &CacheKey) -> Option<Response> {
    match self.storage.get(namespace, key) {
      Ok(entry) => entry.map(CacheEntry::into_response),
      Err(e) => {
        warn!(namespace, key = %key, error = %e, "cache read failed");
        None
      }
    }
  }

  /// Copy a 2xx response into the namespace without holding up the caller.
  fn store_in_background(&self, namespace: &str, key: CacheKey, response: &Response) {
    if !response.is_success() {
      return;
    }
    let entry = CacheEntry::from_response(key, response);
    let storage = Arc::clone(&self.storage);
    let namespace = namespace.to_string();
    let handle = tokio::spawn(async move {
      write_entry(storage.as_ref(), &namespace, entry);
    });
    self.track(handle);
  }

  fn track(&self, handle: JoinHandle<()>) {
    let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
    background.retain(|h| !h.is_finished());
    background.push(handle);
  }
}

fn write_entry<S: CacheStorage + ?Sized>(storage: &S, namespace: &str, entry: CacheEntry) {
  if let Err(e) = storage.put(namespace, &entry) {
    warn!(namespace, key = %entry.key, error = %e, "cache write failed");
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: self.network.clone(),
      background: Arc::clone(&self.background),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Namespace, SqliteStorage};
  use crate::db::Database;
  use crate::http::OFFLINE_HEADER;
  use crate::network::mock::MockTransport;
  use std::time::Duration;

  const NS: &str = "api-v1";

  fn layer() -> (CacheLayer<SqliteStorage>, MockTransport) {
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap());
    for name in [NS, "shell-v1"] {
      storage
        .create_namespace(&Namespace {
          name: name.to_string(),
          version: "v1".to_string(),
          capacity: 100,
        })
        .unwrap();
    }
    let mock = MockTransport::new();
    let network = Coalescer::new(mock.clone().into_transport(), Duration::from_millis(200));
    (CacheLayer::new(Arc::new(storage), network), mock)
  }

  fn get(url: &str) -> Request {
    Request::get(url).unwrap()
  }

  #[tokio::test]
  async fn test_cache_first_serves_identical_body_offline() {
    let (layer, mock) = layer();
    let url = "https://app.test/static/app.js";
    mock.respond("GET", url, 200, "console.log('hi')");

    let first = layer.cache_first(get(url), NS).await.unwrap();
    layer.settle().await;

    mock.set_offline(true);
    let second = layer.cache_first(get(url), NS).await.unwrap();

    assert_eq!(first.body, second.body);
    assert_eq!(second.source(), Some("cache"));
    assert_eq!(mock.calls("GET", url), 1);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let (layer, mock) = layer();
    let url = "https://app.test/missing.png";
    mock.respond("GET", url, 404, "nope");

    let response = layer.cache_first(get(url), NS).await.unwrap();
    layer.settle().await;

    assert_eq!(response.status, 404);
    assert_eq!(layer.storage().entry_count(NS).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_double_miss_is_unavailable() {
    let (layer, mock) = layer();
    mock.set_offline(true);

    let err = layer
      .cache_first(get("https://app.test/fonts/inter.woff2"), NS)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Unavailable(_)));
  }

  #[tokio::test]
  async fn test_network_first_prefers_network_and_stores() {
    let (layer, mock) = layer();
    let url = "https://app.test/api/users";
    mock.respond("GET", url, 200, r#"{"data":["ada"]}"#);

    let response = layer
      .network_first(get(url), NS, &Fallback::None)
      .await
      .unwrap();
    layer.settle().await;

    assert_eq!(response.source(), Some("network"));
    assert_eq!(layer.storage().entry_count(NS).unwrap(), 1);
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache_on_upstream_error() {
    let (layer, mock) = layer();
    let url = "https://app.test/api/equipment";
    mock.respond_once("GET", url, 200, r#"{"data":["crane"]}"#);
    mock.respond("GET", url, 500, "boom");

    layer
      .network_first(get(url), NS, &Fallback::None)
      .await
      .unwrap();
    layer.settle().await;

    let response = layer
      .network_first(get(url), NS, &Fallback::None)
      .await
      .unwrap();
    assert_eq!(response.body, br#"{"data":["crane"]}"#);
    assert_eq!(response.source(), Some("cache"));
  }

  #[tokio::test]
  async fn test_network_first_placeholder_on_503_without_cache() {
    let (layer, mock) = layer();
    let url = "https://app.test/api/projects";
    mock.respond("GET", url, 503, "unavailable");

    let response = layer
      .network_first(get(url), NS, &Fallback::Placeholder(ResourceFamily::Projects))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.header(OFFLINE_HEADER), Some("true"));
    let body = response.json_body().unwrap();
    assert_eq!(body["data"], serde_json::json!([]));
    assert_eq!(body["offline"], true);
  }

  #[tokio::test]
  async fn test_network_first_without_fallback_returns_upstream_answer() {
    let (layer, mock) = layer();
    let url = "https://app.test/api/reports";
    mock.respond("GET", url, 502, "bad gateway");

    let response = layer
      .network_first(get(url), NS, &Fallback::None)
      .await
      .unwrap();
    assert_eq!(response.status, 502);

    mock.set_offline(true);
    let err = layer
      .network_first(get(url), NS, &Fallback::None)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Unavailable(_)));
  }

  #[tokio::test]
  async fn test_network_first_serves_shell_for_navigation() {
    let (layer, mock) = layer();
    let shell = get("https://app.test/");
    layer
      .store("shell-v1", &shell, &Response::new(200, "<html>shell</html>"))
      .unwrap();
    mock.set_offline(true);

    let fallback = Fallback::Shell {
      namespace: "shell-v1".to_string(),
      url: "https://app.test/".to_string(),
    };
    let response = layer
      .network_first(get("https://app.test/projects/7"), NS, &fallback)
      .await
      .unwrap();
    assert_eq!(response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_refreshes_in_background() {
    let (layer, mock) = layer();
    let url = "https://app.test/api/dashboard/stats";
    mock.respond_once("GET", url, 200, r#"{"totalProjects":1}"#);
    mock.respond("GET", url, 200, r#"{"totalProjects":2}"#);

    // Prime the namespace
    layer
      .stale_while_revalidate(get(url), NS, &Fallback::None)
      .await
      .unwrap();
    layer.settle().await;

    // Slow network must not delay the cached answer
    mock.set_delay(Duration::from_millis(150));
    let started = std::time::Instant::now();
    let first = layer
      .stale_while_revalidate(get(url), NS, &Fallback::None)
      .await
      .unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(first.body, br#"{"totalProjects":1}"#);

    layer.settle().await;
    mock.set_offline(true);
    let second = layer
      .stale_while_revalidate(get(url), NS, &Fallback::None)
      .await
      .unwrap();
    assert_eq!(second.body, br#"{"totalProjects":2}"#);
  }

  #[tokio::test]
  async fn test_network_only_never_touches_namespace() {
    let (layer, mock) = layer();
    let url = "https://app.test/api/sync/check-updates";
    mock.respond("GET", url, 200, "{}");

    layer.network_only(get(url)).await.unwrap();
    layer.settle().await;
    assert_eq!(layer.storage().entry_count(NS).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_cache_only_never_touches_network() {
    let (layer, mock) = layer();
    let url = "https://app.test/offline.html";

    let err = layer.cache_only(&get(url), NS).unwrap_err();
    assert!(matches!(err, FetchError::CacheMiss(_)));

    layer
      .store(NS, &get(url), &Response::new(200, "offline page"))
      .unwrap();
    let response = layer.cache_only(&get(url), NS).unwrap();
    assert_eq!(response.body, b"offline page");
    assert_eq!(mock.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_store_rejects_non_success() {
    let (layer, _mock) = layer();
    let err = layer
      .store(NS, &get("https://app.test/x"), &Response::new(500, "err"))
      .unwrap_err();
    assert_eq!(err, FetchError::UpstreamError { status: 500 });
  }
}
