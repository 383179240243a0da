pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared SQLite connection backing the namespace store and the pending log.
///
/// Cloning is cheap; every clone talks to the same connection.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at the given path, or the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("outpost").join("outpost.db"))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection.
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_open_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("outpost.db");

    let db = Database::open(Some(&path)).unwrap();
    assert!(path.exists());

    let tables: i64 = db
      .conn()
      .unwrap()
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('namespaces', 'cache_entries', 'pending_actions')",
        [],
        |row| row.get(0),
      )
      .unwrap();
    assert_eq!(tables, 3);
  }

  #[test]
  fn test_migrations_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outpost.db");

    drop(Database::open(Some(&path)).unwrap());
    assert!(Database::open(Some(&path)).is_ok());
  }
}
