//! SQLite-backed pending-action log.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::types::{ActionStatus, PendingAction};
use crate::cache::parse_datetime;
use crate::db::Database;
use crate::http::{Headers, Request};

/// Queue depth by status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingStats {
  pub pending: usize,
  pub retrying: usize,
  pub failed_permanent: usize,
}

impl PendingStats {
  /// Actions that will still be replayed.
  pub fn queued(&self) -> usize {
    self.pending + self.retrying
  }
}

const SELECT_COLUMNS: &str = "SELECT id, method, url, headers, payload, created_at, retry_count,
  status, next_attempt_at, last_error FROM pending_actions";

/// Ordered, durable queue of deferred mutations.
#[derive(Clone)]
pub struct PendingLog {
  db: Database,
}

impl PendingLog {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append a new action for a mutation that could not be delivered.
  pub fn enqueue(&self, request: &Request) -> Result<PendingAction> {
    let action = PendingAction::from_request(request);
    let headers = serde_json::to_string(&action.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO pending_actions
           (id, method, url, headers, payload, created_at, retry_count, status)
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        params![
          action.id.to_string(),
          action.method,
          action.url,
          headers,
          action.payload,
          action.created_at.to_rfc3339(),
          action.status.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue action: {}", e))?;

    Ok(action)
  }

  /// Every action, in creation order.
  pub fn list(&self) -> Result<Vec<PendingAction>> {
    self.query(&format!("{} ORDER BY seq", SELECT_COLUMNS), &[])
  }

  /// Actions still eligible for replay, in creation order.
  pub fn replayable(&self) -> Result<Vec<PendingAction>> {
    self.query(
      &format!("{} WHERE status != ? ORDER BY seq", SELECT_COLUMNS),
      &[&ActionStatus::FailedPermanent.as_str()],
    )
  }

  pub fn get(&self, id: Uuid) -> Result<Option<PendingAction>> {
    let conn = self.db.conn()?;
    conn
      .query_row(
        &format!("{} WHERE id = ?", SELECT_COLUMNS),
        params![id.to_string()],
        |row| Ok(read_row(row)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read action {}: {}", id, e))?
      .transpose()
  }

  /// Delete an action after confirmed delivery. Returns false if it was
  /// already gone.
  pub fn remove(&self, id: Uuid) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM pending_actions WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to remove action {}: {}", id, e))?;
    Ok(removed > 0)
  }

  /// Persist the retry bookkeeping of an action. Returns false if the action
  /// no longer exists.
  pub fn update(&self, action: &PendingAction) -> Result<bool> {
    let conn = self.db.conn()?;
    let updated = conn
      .execute(
        "UPDATE pending_actions
         SET retry_count = ?, status = ?, next_attempt_at = ?, last_error = ?
         WHERE id = ?",
        params![
          action.retry_count,
          action.status.as_str(),
          action.next_attempt_at.map(|t| t.to_rfc3339()),
          action.last_error,
          action.id.to_string()
        ],
      )
      .map_err(|e| eyre!("Failed to update action {}: {}", action.id, e))?;
    Ok(updated > 0)
  }

  pub fn stats(&self) -> Result<PendingStats> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT status, COUNT(*) FROM pending_actions GROUP BY status")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
      .map_err(|e| eyre!("Failed to count actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read count row: {}", e))?;

    let mut stats = PendingStats::default();
    for (status, count) in rows {
      let count = count as usize;
      match ActionStatus::parse(&status)? {
        ActionStatus::Pending => stats.pending = count,
        ActionStatus::Retrying => stats.retrying = count,
        ActionStatus::FailedPermanent => stats.failed_permanent = count,
      }
    }
    Ok(stats)
  }

  fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<PendingAction>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(args, |row| Ok(read_row(row)))
      .map_err(|e| eyre!("Failed to query actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read action row: {}", e))?;

    rows.into_iter().collect()
  }
}

/// Decode a row selected with [`SELECT_COLUMNS`].
fn read_row(row: &Row<'_>) -> Result<PendingAction> {
  let column = |e: rusqlite::Error| eyre!("Failed to read action column: {}", e);

  let id: String = row.get(0).map_err(column)?;
  let headers: String = row.get(3).map_err(column)?;
  let created_at: String = row.get(5).map_err(column)?;
  let status: String = row.get(7).map_err(column)?;
  let next_attempt_at: Option<String> = row.get(8).map_err(column)?;

  Ok(PendingAction {
    id: Uuid::parse_str(&id).map_err(|e| eyre!("Invalid action id '{}': {}", id, e))?,
    method: row.get(1).map_err(column)?,
    url: row.get(2).map_err(column)?,
    headers: serde_json::from_str::<Headers>(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?,
    payload: row.get(4).map_err(column)?,
    created_at: parse_datetime(&created_at)?,
    retry_count: row.get(6).map_err(column)?,
    status: ActionStatus::parse(&status)?,
    next_attempt_at: next_attempt_at.as_deref().map(parse_datetime).transpose()?,
    last_error: row.get(9).map_err(column)?,
  })
}
