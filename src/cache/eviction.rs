//! Capacity enforcement for namespaces.
//!
//! Writes never fail for lack of room; instead a low-priority sweep trims each
//! namespace back to its capacity by dropping the oldest-inserted entries.
//! Access recency plays no part.

use color_eyre::Result;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;

/// Outcome of one sweep over every namespace.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
  pub namespaces_scanned: usize,
  pub entries_evicted: usize,
}

/// Trim every namespace to its capacity.
///
/// A failure on one namespace is logged and the sweep moves on. Each
/// namespace takes the store lock separately, so requests interleave freely.
pub fn sweep<S: CacheStorage + ?Sized>(storage: &S) -> Result<EvictionReport> {
  let mut report = EvictionReport::default();

  for namespace in storage.namespaces()? {
    report.namespaces_scanned += 1;

    let count = match storage.entry_count(&namespace.name) {
      Ok(count) => count,
      Err(e) => {
        warn!(namespace = %namespace.name, error = %e, "eviction skipped namespace");
        continue;
      }
    };

    if count <= namespace.capacity {
      continue;
    }

    let excess = count - namespace.capacity;
    match storage.evict_oldest(&namespace.name, excess) {
      Ok(evicted) => {
        debug!(namespace = %namespace.name, evicted, capacity = namespace.capacity, "evicted");
        report.entries_evicted += evicted;
      }
      Err(e) => warn!(namespace = %namespace.name, error = %e, "eviction failed"),
    }
  }

  if report.entries_evicted > 0 {
    info!(
      "Eviction sweep removed {} entries across {} namespaces",
      report.entries_evicted, report.namespaces_scanned
    );
  }

  Ok(report)
}
