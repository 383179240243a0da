use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::Transport;
use crate::error::FetchError;
use crate::http::{Headers, Request, Response, SOURCE_HEADER};

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("outpost/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::NetworkUnavailable(format!("Failed to build client: {}", e)))?;
    Ok(Self { client })
  }

  async fn execute(client: reqwest::Client, request: Request) -> Result<Response, FetchError> {
    let mut builder = client
      .request(request.method.clone(), request.url.clone())
      .headers(to_header_map(&request.headers));
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::NetworkUnavailable(format!("{}: {}", request.url, e)))?;

    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::NetworkUnavailable(format!("Failed to read body: {}", e)))?;

    Ok(
      Response {
        status,
        headers,
        body: body.to_vec(),
      }
      .with_header(SOURCE_HEADER, "network"),
    )
  }
}

impl Transport for ReqwestTransport {
  fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, FetchError>> {
    Self::execute(self.client.clone(), request).boxed()
  }
}

/// Convert our header map, silently dropping names or values reqwest rejects.
fn to_header_map(headers: &Headers) -> HeaderMap {
  headers
    .iter()
    .filter_map(|(name, value)| {
      let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
      let value = HeaderValue::from_str(value).ok()?;
      Some((name, value))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_conversion_skips_invalid() {
    let headers = Headers::from([
      ("content-type".to_string(), "application/json".to_string()),
      ("bad header".to_string(), "x".to_string()),
    ]);
    let map = to_header_map(&headers);
    assert_eq!(map.len(), 1);
    assert_eq!(map["content-type"], "application/json");
  }
}
