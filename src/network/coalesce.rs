//! Coalescing of identical in-flight reads.
//!
//! Concurrent GETs for the same key share one network call: the first caller
//! starts it, later callers receive a clone of the same shared future, and the
//! map entry is dropped as soon as the call resolves.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::{send_with_timeout, Transport};
use crate::cache::CacheKey;
use crate::error::FetchError;
use crate::http::{Request, Response};

type SharedFetch = Shared<BoxFuture<'static, Result<Response, FetchError>>>;

#[derive(Clone)]
pub struct Coalescer {
  transport: Arc<dyn Transport>,
  inflight: Arc<Mutex<HashMap<CacheKey, SharedFetch>>>,
  timeout: Duration,
}

impl Coalescer {
  pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
    Self {
      transport,
      inflight: Arc::new(Mutex::new(HashMap::new())),
      timeout,
    }
  }

  /// Fetch through the network, joining an identical call already in flight.
  ///
  /// Mutating requests are never shared.
  pub async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    if request.is_mutating() {
      return send_with_timeout(self.transport.as_ref(), request, self.timeout).await;
    }

    let key = request.cache_key();
    let shared = {
      let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
      if let Some(existing) = inflight.get(&key) {
        debug!(key = %key, "joining in-flight request");
        existing.clone()
      } else {
        let transport = Arc::clone(&self.transport);
        let map = Arc::clone(&self.inflight);
        let timeout = self.timeout;
        let owned_key = key.clone();
        let fetch = async move {
          let result = send_with_timeout(transport.as_ref(), request, timeout).await;
          map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&owned_key);
          result
        }
        .boxed()
        .shared();
        inflight.insert(key, fetch.clone());
        fetch
      }
    };

    shared.await
  }

  /// Number of distinct keys currently on the wire.
  pub fn in_flight(&self) -> usize {
    self
      .inflight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }
}
