//! HTTP-shaped request and response values that flow through the layer.
//!
//! These are deliberately plain data: the host application builds a
//! [`Request`], the layer answers with a [`Response`], and neither type knows
//! whether the bytes came from the network, a namespace, or a placeholder.
//! The provenance travels in headers so callers can key off them.

use reqwest::Method;
use std::collections::BTreeMap;
use url::Url;

use crate::cache::CacheKey;

/// Header set on every response the layer synthesized while offline.
pub const OFFLINE_HEADER: &str = "x-outpost-offline";

/// Header naming where a response came from: `network`, `cache`, or `offline`.
pub const SOURCE_HEADER: &str = "x-outpost-source";

pub type Headers = BTreeMap<String, String>;

/// An outgoing call from the host application.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
    }
  }

  /// Build a GET request from a string URL.
  pub fn get(url: &str) -> Result<Self, url::ParseError> {
    Ok(Self::new(Method::GET, Url::parse(url)?))
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Anything other than a safe read is treated as a mutation.
  pub fn is_mutating(&self) -> bool {
    !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
  }

  pub fn cache_key(&self) -> CacheKey {
    CacheKey::new(self.method.as_str(), self.url.as_str())
  }
}

/// An answer handed back to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  /// A JSON response with the content type set.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    // Serializing a `Value` cannot fail.
    let body = serde_json::to_vec(value).unwrap_or_default();
    Self::new(status, body).with_header("content-type", "application/json")
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// True when the layer synthesized this response because it was offline.
  pub fn is_offline(&self) -> bool {
    self.header(OFFLINE_HEADER) == Some("true")
  }

  pub fn source(&self) -> Option<&str> {
    self.header(SOURCE_HEADER)
  }

  pub fn json_body(&self) -> serde_json::Result<serde_json::Value> {
    serde_json::from_slice(&self.body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mutating_methods() {
    let get = Request::get("https://app.test/api/projects").unwrap();
    assert!(!get.is_mutating());

    let post = Request::new(Method::POST, get.url.clone());
    assert!(post.is_mutating());

    let delete = Request::new(Method::DELETE, get.url.clone());
    assert!(delete.is_mutating());
  }

  #[test]
  fn test_headers_are_case_insensitive() {
    let response = Response::new(200, "ok").with_header("X-Outpost-Offline", "true");
    assert!(response.is_offline());
    assert_eq!(response.header("x-OUTPOST-offline"), Some("true"));
  }
}
