//! Response storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::traits::ResponseRecord;
use crate::db::Database;

/// Trait for cached response backends.
pub trait ResponseStorage: Send + Sync + 'static {
  /// Get a stored response by cache key.
  fn get(&self, cache_key: &str) -> Result<Option<ResponseRecord>>;

  /// Store a response under a cache key, replacing any previous one.
  fn put(&self, cache_key: &str, response: &ResponseRecord) -> Result<()>;

  /// Whether a response is stored under the key.
  fn contains(&self, cache_key: &str) -> Result<bool> {
    Ok(self.get(cache_key)?.is_some())
  }
}

/// SQLite-based response storage.
pub struct SqliteResponseStorage {
  db: Arc<Database>,
}

impl SqliteResponseStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl ResponseStorage for SqliteResponseStorage {
  fn get(&self, cache_key: &str) -> Result<Option<ResponseRecord>> {
    let conn = self.db.conn()?;

    let row: Option<(String, u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT url, status, headers, body FROM cached_responses WHERE cache_key = ?",
        params![cache_key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cached response: {}", e))?;

    match row {
      Some((url, status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(ResponseRecord {
          url,
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, cache_key: &str, response: &ResponseRecord) -> Result<()> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cached_responses (cache_key, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![cache_key, response.url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }
}
