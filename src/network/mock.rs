//! Scripted in-memory transport for tests.

use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Transport;
use crate::error::FetchError;
use crate::http::{Request, Response, SOURCE_HEADER};

type RouteKey = (String, String);

#[derive(Default)]
struct MockState {
  offline: bool,
  delay: Option<Duration>,
  /// Fixed answers per route
  routes: HashMap<RouteKey, Result<Response, FetchError>>,
  /// One-shot answers consumed before the fixed answer
  queued: HashMap<RouteKey, VecDeque<Result<Response, FetchError>>>,
  calls: Vec<Request>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
  state: Arc<Mutex<MockState>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn into_transport(self) -> Arc<dyn Transport> {
    Arc::new(self)
  }

  fn key(method: &str, url: &str) -> RouteKey {
    (method.to_ascii_uppercase(), url.to_string())
  }

  pub fn respond(&self, method: &str, url: &str, status: u16, body: &str) {
    let response = Response::new(status, body.as_bytes().to_vec())
      .with_header("content-type", "application/json");
    self
      .state
      .lock()
      .unwrap()
      .routes
      .insert(Self::key(method, url), Ok(response));
  }

  /// Queue a single answer served before any fixed one.
  pub fn respond_once(&self, method: &str, url: &str, status: u16, body: &str) {
    let response = Response::new(status, body.as_bytes().to_vec());
    self
      .state
      .lock()
      .unwrap()
      .queued
      .entry(Self::key(method, url))
      .or_default()
      .push_back(Ok(response));
  }

  /// Make one route fail at the transport level.
  pub fn fail(&self, method: &str, url: &str) {
    self.state.lock().unwrap().routes.insert(
      Self::key(method, url),
      Err(FetchError::NetworkUnavailable(format!("connection refused: {}", url))),
    );
  }

  pub fn set_offline(&self, offline: bool) {
    self.state.lock().unwrap().offline = offline;
  }

  pub fn set_delay(&self, delay: Duration) {
    self.state.lock().unwrap().delay = Some(delay);
  }

  pub fn calls(&self, method: &str, url: &str) -> usize {
    let method = method.to_ascii_uppercase();
    self
      .state
      .lock()
      .unwrap()
      .calls
      .iter()
      .filter(|r| r.method.as_str() == method && r.url.as_str() == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.state.lock().unwrap().calls.len()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.state.lock().unwrap().calls.clone()
  }
}

impl Transport for MockTransport {
  fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    let (delay, result) = {
      let mut state = self.state.lock().unwrap();
      state.calls.push(request.clone());
      let key = Self::key(request.method.as_str(), request.url.as_str());

      let result = if state.offline {
        Err(FetchError::NetworkUnavailable("offline".to_string()))
      } else if let Some(next) = state.queued.get_mut(&key).and_then(|q| q.pop_front()) {
        next
      } else {
        state
          .routes
          .get(&key)
          .cloned()
          .unwrap_or_else(|| Ok(Response::new(404, "not found")))
      };
      (state.delay, result)
    };

    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      result.map(|r| r.with_header(SOURCE_HEADER, "network"))
    }
    .boxed()
  }
}
