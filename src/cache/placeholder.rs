//! Offline placeholders for the upstream resource families.
//!
//! When both the network and the namespace come up empty for a known
//! resource, the caller still gets a schema-shaped 200 so list views render
//! empty instead of erroring. The [`OFFLINE_HEADER`] is the only reliable way
//! to tell these apart from real answers.

use serde::Serialize;
use url::Url;

use super::traits::CacheSource;
use crate::http::{Response, OFFLINE_HEADER, SOURCE_HEADER};

const OFFLINE_MESSAGE: &str = "You are offline. Showing no data until connectivity returns.";

/// The REST-like GET surface the layer knows how to stand in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFamily {
  Projects,
  Transactions,
  Users,
  Equipment,
  Warehouses,
  Documents,
  DashboardStats,
  SyncStatus,
}

impl ResourceFamily {
  /// Identify the family from a URL under `api_prefix` (e.g. `/api`).
  pub fn from_url(url: &Url, api_prefix: &str) -> Option<Self> {
    let prefix = api_prefix.trim_end_matches('/');
    let rest = url.path().strip_prefix(prefix)?.trim_start_matches('/');
    let mut segments = rest.split('/').filter(|s| !s.is_empty());

    match (segments.next()?, segments.next()) {
      ("projects", _) => Some(Self::Projects),
      ("transactions", _) => Some(Self::Transactions),
      ("users", _) => Some(Self::Users),
      ("equipment", _) => Some(Self::Equipment),
      ("warehouses", _) => Some(Self::Warehouses),
      ("documents", _) => Some(Self::Documents),
      ("dashboard", Some("stats")) | ("dashboard-stats", _) => Some(Self::DashboardStats),
      ("sync", Some("status")) | ("sync-status", _) => Some(Self::SyncStatus),
      _ => None,
    }
  }

  /// Synthesize the offline placeholder body for this family.
  pub fn placeholder(&self) -> Response {
    let body = match self {
      Self::DashboardStats => serde_json::to_value(OfflineStats::default()),
      Self::SyncStatus => serde_json::to_value(OfflineSyncStatus::default()),
      _ => serde_json::to_value(OfflineList::default()),
    }
    .unwrap_or_default();

    Response::json(200, &body)
      .with_header(OFFLINE_HEADER, "true")
      .with_header(SOURCE_HEADER, CacheSource::Offline.as_str())
  }
}

/// Placeholder for list endpoints.
#[derive(Debug, Serialize)]
struct OfflineList {
  data: Vec<serde_json::Value>,
  offline: bool,
  message: &'static str,
}

impl Default for OfflineList {
  fn default() -> Self {
    Self {
      data: Vec::new(),
      offline: true,
      message: OFFLINE_MESSAGE,
    }
  }
}

/// Zeroed dashboard statistics.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OfflineStats {
  total_projects: u64,
  active_projects: u64,
  total_transactions: u64,
  total_revenue: f64,
  total_expenses: f64,
  total_equipment: u64,
  offline: bool,
  message: &'static str,
}

impl Default for OfflineStats {
  fn default() -> Self {
    Self {
      total_projects: 0,
      active_projects: 0,
      total_transactions: 0,
      total_revenue: 0.0,
      total_expenses: 0.0,
      total_equipment: 0,
      offline: true,
      message: OFFLINE_MESSAGE,
    }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OfflineSyncStatus {
  last_sync: Option<String>,
  pending_changes: u64,
  offline: bool,
  message: &'static str,
}

impl Default for OfflineSyncStatus {
  fn default() -> Self {
    Self {
      last_sync: None,
      pending_changes: 0,
      offline: true,
      message: OFFLINE_MESSAGE,
    }
  }
}
