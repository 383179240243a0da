//! Core types for the namespace store.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::http::{Headers, Response, SOURCE_HEADER};

/// Identity of a cached response: `(method, url)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

impl CacheKey {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  /// SHA256 of the key, used as a stable fixed-length row key.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A stored response. Never mutated; a later write for the key replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a response for storage. The body is copied, so the caller keeps
  /// its own response intact.
  pub fn from_response(key: CacheKey, response: &Response) -> Self {
    let mut headers = response.headers.clone();
    headers.remove(SOURCE_HEADER);
    Self {
      key,
      status: response.status,
      headers,
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
    .with_header(SOURCE_HEADER, CacheSource::Cache.as_str())
  }
}

/// Metadata for a named cache container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
  pub name: String,
  /// Build tag active when the namespace was created
  pub version: String,
  pub capacity: usize,
}

/// The fixed set of namespace families, one instance per version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceFamily {
  Api,
  Static,
  Images,
  Fonts,
  Shell,
}

impl NamespaceFamily {
  pub const ALL: [NamespaceFamily; 5] = [
    Self::Api,
    Self::Static,
    Self::Images,
    Self::Fonts,
    Self::Shell,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Api => "api",
      Self::Static => "static",
      Self::Images => "images",
      Self::Fonts => "fonts",
      Self::Shell => "shell",
    }
  }

  /// Concrete namespace name for a build, e.g. `api-v3`.
  pub fn namespace_name(&self, version: &str) -> String {
    format!("{}-{}", self.as_str(), version)
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from a namespace
  Cache,
  /// Synthesized placeholder, nothing real was available
  Offline,
}

impl CacheSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
    }
  }
}
