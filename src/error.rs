//! Error taxonomy for request handling.
//!
//! Infrastructure code (config, database, CLI) reports through
//! `color_eyre::Result`. The variants here are the ones strategies reason
//! about: most are recovered locally by falling through to the next step and
//! only [`FetchError::Unavailable`] is meant to reach the caller as a failure.

use thiserror::Error;

/// Errors produced while serving a request, replaying a queued action, or
/// decoding a push payload.
///
/// `Clone` so a single network outcome can be shared by coalesced waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Transport failure: no connection, DNS, reset, timeout.
  #[error("Network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The upstream answered with a non-2xx status.
  #[error("Upstream error: status {status}")]
  UpstreamError { status: u16 },

  /// No entry for the key in the namespace.
  #[error("Cache miss: {0}")]
  CacheMiss(String),

  /// A namespace write was rejected by the underlying store.
  #[error("Quota exceeded for namespace {0}")]
  QuotaExceeded(String),

  /// A push payload that is neither JSON nor text.
  #[error("Malformed push payload: {0}")]
  MalformedPush(String),

  /// Cache and network are both exhausted and no placeholder exists.
  #[error("Unavailable offline: {0}")]
  Unavailable(String),

  /// The store failed for a reason other than quota.
  #[error("Storage error: {0}")]
  Storage(String),
}

impl FetchError {
  /// Connectivity failures are the only ones that queue a mutation.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::NetworkUnavailable(_))
  }
}
