//! Namespace storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, ErrorCode, OptionalExtension};

use super::traits::{CacheEntry, CacheKey, Namespace};
use crate::db::Database;
use crate::error::FetchError;
use crate::http::Headers;

/// Trait for namespace storage backends.
///
/// Access is key-scoped last-write-wins; nothing here offers read-modify-write
/// across keys except the stale-namespace sweep, which is atomic.
pub trait CacheStorage: Send + Sync {
  /// Create a namespace, or update its capacity if it already exists.
  fn create_namespace(&self, namespace: &Namespace) -> Result<()>;

  /// All namespaces, in name order.
  fn namespaces(&self) -> Result<Vec<Namespace>>;

  /// Look up one namespace by name.
  fn namespace(&self, name: &str) -> Result<Option<Namespace>>;

  /// Delete every namespace not stamped with `current_version`, in one step.
  /// Returns the names that were removed.
  fn delete_stale_namespaces(&self, current_version: &str) -> Result<Vec<String>>;

  /// Get a cached entry.
  fn get(&self, namespace: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

  /// Store an entry, fully replacing any previous entry for the key.
  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()>;

  /// Number of entries in a namespace.
  fn entry_count(&self, namespace: &str) -> Result<usize>;

  /// Keys in insertion order, oldest first.
  fn keys(&self, namespace: &str) -> Result<Vec<CacheKey>>;

  /// Remove the `count` oldest-inserted entries. Returns how many went.
  fn evict_oldest(&self, namespace: &str, count: usize) -> Result<usize>;
}

/// SQLite-based namespace storage.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl CacheStorage for SqliteStorage {
  fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO namespaces (name, version, capacity, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET capacity = excluded.capacity",
        params![
          namespace.name,
          namespace.version,
          namespace.capacity as i64,
          Utc::now().to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace.name, e))?;
    Ok(())
  }

  fn namespaces(&self) -> Result<Vec<Namespace>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name, version, capacity FROM namespaces ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let namespaces = stmt
      .query_map([], |row| {
        Ok(Namespace {
          name: row.get(0)?,
          version: row.get(1)?,
          capacity: row.get::<_, i64>(2)? as usize,
        })
      })
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;

    Ok(namespaces)
  }

  fn namespace(&self, name: &str) -> Result<Option<Namespace>> {
    let conn = self.db.conn()?;
    conn
      .query_row(
        "SELECT name, version, capacity FROM namespaces WHERE name = ?",
        params![name],
        |row| {
          Ok(Namespace {
            name: row.get(0)?,
            version: row.get(1)?,
            capacity: row.get::<_, i64>(2)? as usize,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read namespace {}: {}", name, e))
  }

  fn delete_stale_namespaces(&self, current_version: &str) -> Result<Vec<String>> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let stale: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT name FROM namespaces WHERE version != ? ORDER BY name")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let names = stmt
        .query_map(params![current_version], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list stale namespaces: {}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;
      names
    };

    tx.execute(
      "DELETE FROM cache_entries WHERE namespace IN (SELECT name FROM namespaces WHERE version != ?)",
      params![current_version],
    )
    .map_err(|e| eyre!("Failed to delete stale entries: {}", e))?;
    tx.execute(
      "DELETE FROM namespaces WHERE version != ?",
      params![current_version],
    )
    .map_err(|e| eyre!("Failed to delete stale namespaces: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(stale)
  }

  fn get(&self, namespace: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE namespace = ? AND entry_key = ?",
        params![namespace, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
        Ok(Some(CacheEntry {
          key: key.clone(),
          status,
          headers,
          body,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()> {
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.conn()?;
    // REPLACE deletes the old row, so the entry gets a fresh insertion seq.
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (namespace, entry_key, method, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          namespace,
          entry.key.hash(),
          entry.key.method,
          entry.key.url,
          entry.status,
          headers,
          entry.body,
          entry.stored_at.to_rfc3339()
        ],
      )
      .map_err(|e| classify_write_error(namespace, e))?;

    Ok(())
  }

  fn entry_count(&self, namespace: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", namespace, e))?;
    Ok(count as usize)
  }

  fn keys(&self, namespace: &str) -> Result<Vec<CacheKey>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE namespace = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![namespace], |row| {
        Ok(CacheKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list keys in {}: {}", namespace, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key row: {}", e))?;

    Ok(keys)
  }

  fn evict_oldest(&self, namespace: &str, count: usize) -> Result<usize> {
    if count == 0 {
      return Ok(0);
    }
    let conn = self.db.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE seq IN (
           SELECT seq FROM cache_entries WHERE namespace = ? ORDER BY seq ASC LIMIT ?
         )",
        params![namespace, count as i64],
      )
      .map_err(|e| eyre!("Failed to evict from {}: {}", namespace, e))?;
    Ok(removed)
  }
}

/// Map a write failure to the request-level taxonomy when it means the store
/// is out of room.
fn classify_write_error(namespace: &str, e: rusqlite::Error) -> color_eyre::Report {
  match &e {
    rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::DiskFull => {
      FetchError::QuotaExceeded(namespace.to_string()).into()
    }
    _ => FetchError::Storage(format!("Failed to store entry in {}: {}", namespace, e)).into(),
  }
}

/// Parse an RFC 3339 timestamp written by this module.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
