//! Authoring drafts kept in a key-value store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::types::AuthoringOverride;
use crate::db::Database;

/// Key holding the id of the manifest being authored.
pub const AUTHORING_ID_KEY: &str = "offlineManifestAuthoringId";
/// Prefix of the keys holding one draft per manifest id.
pub const AUTHORING_DATA_KEY_PREFIX: &str = "offlineManifestAuthoringData";

/// String key-value storage.
pub trait KeyValueStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;
  fn set_item(&self, key: &str, value: &str) -> Result<()>;
  fn remove_item(&self, key: &str) -> Result<()>;
}

/// Key-value store persisted in the `kv_store` table.
pub struct SqliteKeyValueStore {
  db: Arc<Database>,
}

impl SqliteKeyValueStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl KeyValueStore for SqliteKeyValueStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;
    Ok(())
  }
}

/// Draft manifests being authored, one payload per manifest id.
pub struct AuthoringDrafts<K: KeyValueStore> {
  store: K,
}

impl<K: KeyValueStore> AuthoringDrafts<K> {
  pub fn new(store: K) -> Self {
    Self { store }
  }

  fn data_key(id: &str) -> String {
    format!("{}:{}", AUTHORING_DATA_KEY_PREFIX, id)
  }

  /// Remember the manifest being authored. `None` leaves the store untouched.
  pub fn set_authoring_id(&self, id: Option<&str>) -> Result<()> {
    match id {
      Some(id) => self.store.set_item(AUTHORING_ID_KEY, id),
      None => Ok(()),
    }
  }

  pub fn authoring_id(&self) -> Result<Option<String>> {
    self.store.get_item(AUTHORING_ID_KEY)
  }

  pub fn clear_authoring_id(&self) -> Result<()> {
    self.store.remove_item(AUTHORING_ID_KEY)
  }

  pub fn authoring_data(&self, id: &str) -> Result<Option<AuthoringOverride>> {
    match self.store.get_item(&Self::data_key(id))? {
      Some(json) => serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| eyre!("Failed to parse authoring data for {}: {}", id, e)),
      None => Ok(None),
    }
  }

  pub fn set_authoring_data(&self, id: &str, data: &AuthoringOverride) -> Result<()> {
    let json = serde_json::to_string(data)
      .map_err(|e| eyre!("Failed to serialize authoring data: {}", e))?;
    self.store.set_item(&Self::data_key(id), &json)
  }

  pub fn clear_authoring_data(&self, id: &str) -> Result<()> {
    self.store.remove_item(&Self::data_key(id))
  }

  /// Draft of the manifest currently being authored, if any.
  pub fn active_draft(&self) -> Result<Option<AuthoringOverride>> {
    match self.authoring_id()? {
      Some(id) => self.authoring_data(&id),
      None => Ok(None),
    }
  }

  /// Save a draft under the active id; a no-op when nothing is being authored.
  pub fn save_active_draft(&self, data: &AuthoringOverride) -> Result<()> {
    match self.authoring_id()? {
      Some(id) => self.set_authoring_data(&id, data),
      None => Ok(()),
    }
  }
}
