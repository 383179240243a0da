//! Network access for the layer.
//!
//! Everything that leaves the process goes through a [`Transport`]. The
//! production implementation wraps `reqwest`; tests script one in memory.

mod client;
mod coalesce;
#[cfg(test)]
pub(crate) mod mock;

pub use client::ReqwestTransport;
pub use coalesce::Coalescer;

use futures::future::BoxFuture;
use std::time::Duration;

use crate::error::FetchError;
use crate::http::{Request, Response};

/// Sends a request and returns whatever the upstream answered.
///
/// Non-2xx answers are `Ok`; only transport failures are `Err`, always as
/// [`FetchError::NetworkUnavailable`].
pub trait Transport: Send + Sync + 'static {
  fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>>;
}

/// Run a transport call with an upper bound on how long it may take.
pub async fn send_with_timeout(
  transport: &dyn Transport,
  request: Request,
  timeout: Duration,
) -> Result<Response, FetchError> {
  let url = request.url.to_string();
  match tokio::time::timeout(timeout, transport.send(request)).await {
    Ok(result) => result,
    Err(_) => Err(FetchError::NetworkUnavailable(format!(
      "Timed out after {}ms: {}",
      timeout.as_millis(),
      url
    ))),
  }
}
