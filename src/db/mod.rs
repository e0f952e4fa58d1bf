pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Database connection shared by the response cache, the local answer
/// store and the authoring drafts.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at the given path
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    Ok(Self::data_dir()?.join("offline.db"))
  }

  /// Application data directory, shared with the log files
  pub fn data_dir() -> Result<PathBuf> {
    resolve_data_dir(dirs::data_dir(), dirs::home_dir())
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection for the duration of one operation
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn resolve_data_dir(data_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Result<PathBuf> {
  let data_dir = data_dir
    .or_else(|| home_dir.map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("activity-offline"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_in_memory_has_schema() {
    let db = Database::open_in_memory().unwrap();
    let conn = db.conn().unwrap();
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
         ('cached_responses', 'answers', 'plugin_states', 'offline_activities', 'kv_store')",
        [],
        |row| row.get(0),
      )
      .unwrap();
    assert_eq!(count, 5);
  }

  #[test]
  fn test_data_dir_falls_back_to_home() {
    assert_eq!(
      resolve_data_dir(Some("/data".into()), Some("/home/u".into())).unwrap(),
      PathBuf::from("/data/activity-offline")
    );
    assert_eq!(
      resolve_data_dir(None, Some("/home/u".into())).unwrap(),
      PathBuf::from("/home/u/.local/share/activity-offline")
    );
    assert!(resolve_data_dir(None, None).is_err());
  }

  #[test]
  fn test_open_creates_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("offline.db");
    Database::open(&path).unwrap();
    assert!(path.exists());
  }
}
