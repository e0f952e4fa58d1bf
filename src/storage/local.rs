//! Embedded SQLite backend used when running fully offline.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::answer::{doc_to_wrapped_answer, ref_id_to_answers_question_id};
use super::backend::{AllAnswersCallback, AnswerBackend, AnswerCallback, PluginStateCache, Subscription};
use super::types::{AnswerMetadata, IndexedAnswer, Session};
use crate::db::Database;

/// Backend storing answers in the local database.
///
/// Watches are one-shot: the callback runs once with the stored value and
/// the returned subscription is inert. Later writes are not pushed.
pub struct LocalBackend {
  db: Arc<Database>,
  session: Session,
  plugin_cache: PluginStateCache,
  probe_url: Option<Url>,
  http: reqwest::Client,
}

impl LocalBackend {
  pub fn new(db: Arc<Database>, session: Session, probe_url: Option<Url>) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(5))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      db,
      session,
      plugin_cache: PluginStateCache::default(),
      probe_url,
      http,
    })
  }

  fn query_answers(&self, sql: &str, args: &[&str]) -> Result<Vec<IndexedAnswer>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<String> = stmt
      .query_map(rusqlite::params_from_iter(args), |row| row.get(0))
      .map_err(|e| eyre!("Failed to query answers: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read answer: {}", e))?;

    rows
      .iter()
      .map(|data| {
        serde_json::from_str(data).map_err(|e| eyre!("Failed to deserialize answer: {}", e))
      })
      .collect()
  }
}

#[async_trait]
impl AnswerBackend for LocalBackend {
  fn session(&self) -> &Session {
    &self.session
  }

  async fn create_or_update_answer(&self, answer: &AnswerMetadata) -> Result<()> {
    let indexed = IndexedAnswer {
      meta: answer.clone(),
      activity: self.session.activity_id.clone(),
    };
    let data =
      serde_json::to_string(&indexed).map_err(|e| eyre!("Failed to serialize answer: {}", e))?;

    self
      .db
      .conn()?
      .execute(
        "INSERT INTO answers (id, question_id, activity, data, updated_at)
         VALUES (?, ?, ?, ?, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
           question_id = excluded.question_id,
           activity = excluded.activity,
           data = excluded.data,
           updated_at = excluded.updated_at",
        params![indexed.meta.id, indexed.meta.question_id, indexed.activity, data],
      )
      .map_err(|e| eyre!("Failed to store answer: {}", e))?;

    debug!(id = %answer.id, question_id = %answer.question_id, "Stored answer locally");
    Ok(())
  }

  async fn watch_answer(&self, ref_id: &str, callback: AnswerCallback) -> Result<Subscription> {
    let question_id = ref_id_to_answers_question_id(ref_id);
    let found = self.query_answers(
      "SELECT data FROM answers WHERE question_id = ? AND activity = ? ORDER BY rowid LIMIT 1",
      &[question_id.as_str(), self.session.activity_id.as_str()],
    )?;

    match found.into_iter().next() {
      Some(indexed) => callback(Some(doc_to_wrapped_answer(indexed.meta)?)),
      None => callback(None),
    }
    Ok(Subscription::noop())
  }

  async fn watch_all_answers(&self, callback: AllAnswersCallback) -> Result<Subscription> {
    let answers = self
      .export_answers(&self.session.activity_id)
      .await?
      .into_iter()
      .filter_map(|indexed| match doc_to_wrapped_answer(indexed.meta) {
        Ok(wrapped) => Some(wrapped),
        Err(e) => {
          warn!("Skipping answer: {}", e);
          None
        }
      })
      .collect();

    callback(answers);
    Ok(Subscription::noop())
  }

  fn supports_export(&self) -> bool {
    true
  }

  async fn export_answers(&self, activity: &str) -> Result<Vec<IndexedAnswer>> {
    self.query_answers(
      "SELECT data FROM answers WHERE activity = ? ORDER BY rowid",
      &[activity],
    )
  }

  async fn check_if_online(&self) -> Result<bool> {
    let Some(url) = &self.probe_url else {
      return Ok(false);
    };

    match self.http.head(url.as_str()).send().await {
      Ok(response) => Ok(response.status().is_success()),
      Err(e) => {
        debug!("Connectivity probe failed: {}", e);
        Ok(false)
      }
    }
  }

  fn plugin_cache(&self) -> &PluginStateCache {
    &self.plugin_cache
  }

  async fn load_plugin_state(&self, doc_id: &str) -> Result<Option<String>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT state FROM plugin_states WHERE doc_id = ?",
        params![doc_id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read plugin state: {}", e))
  }

  async fn store_plugin_state(&self, doc_id: &str, plugin_id: u64, state: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO plugin_states (doc_id, plugin_id, state, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![doc_id, plugin_id as i64, state],
      )
      .map_err(|e| eyre!("Failed to store plugin state: {}", e))?;
    Ok(())
  }
}
