//! Single entry point for answer storage, bound to one backend at startup.

use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::answer::{answer_with_metadata, EmbeddableConfig};
use super::backend::{AnswerBackend, Subscription};
use super::local::LocalBackend;
use super::remote::{DocumentStore, RemoteBackend};
use super::types::{AnswerMetadata, ExportSnapshot, Session, WrappedAnswer, EXPORT_SCHEMA_VERSION};
use crate::db::Database;

/// Whether the player runs against the live-sync store or fully offline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
  Online,
  #[default]
  Offline,
}

impl std::str::FromStr for RunMode {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "online" => Ok(Self::Online),
      "offline" => Ok(Self::Offline),
      other => Err(eyre!("Unknown run mode: {}", other)),
    }
  }
}

pub struct StorageFacade {
  backend: Box<dyn AnswerBackend>,
}

impl StorageFacade {
  pub fn new(backend: Box<dyn AnswerBackend>) -> Self {
    Self { backend }
  }

  /// Select the backend for `mode`.
  ///
  /// Online mode syncs through `remote` and fails without one; offline
  /// mode writes to `db`.
  pub fn for_mode(
    mode: RunMode,
    session: Session,
    db: Arc<Database>,
    probe_url: Option<Url>,
    remote: Option<Arc<dyn DocumentStore>>,
  ) -> Result<Self> {
    info!(?mode, activity = %session.activity_id, "Selecting answer storage backend");
    let backend: Box<dyn AnswerBackend> = match mode {
      RunMode::Online => {
        let store = remote
          .ok_or_else(|| eyre!("Online mode needs a live-sync document store, none is configured"))?;
        Box::new(RemoteBackend::new(store, session))
      }
      RunMode::Offline => Box::new(LocalBackend::new(db, session, probe_url)?),
    };
    Ok(Self::new(backend))
  }

  pub fn session(&self) -> &Session {
    self.backend.session()
  }

  pub fn supports_export(&self) -> bool {
    self.backend.supports_export()
  }

  pub async fn create_or_update_answer(&self, answer: &AnswerMetadata) -> Result<()> {
    self.backend.create_or_update_answer(answer).await
  }

  /// Derive the answer record for an interactive's state and store it.
  pub async fn save_interactive_state(
    &self,
    state: &Value,
    embeddable: &EmbeddableConfig,
    prior: Option<&AnswerMetadata>,
  ) -> Result<AnswerMetadata> {
    let answer = answer_with_metadata(state, embeddable, prior)?;
    self.create_or_update_answer(&answer).await?;
    Ok(answer)
  }

  pub async fn watch_answer<F>(&self, ref_id: &str, callback: F) -> Result<Subscription>
  where
    F: Fn(Option<WrappedAnswer>) + Send + Sync + 'static,
  {
    self.backend.watch_answer(ref_id, Box::new(callback)).await
  }

  pub async fn watch_all_answers<F>(&self, callback: F) -> Result<Subscription>
  where
    F: Fn(Vec<WrappedAnswer>) + Send + Sync + 'static,
  {
    self.backend.watch_all_answers(Box::new(callback)).await
  }

  /// Snapshot every stored answer of an activity (the session's by
  /// default). Returns `None` when no activity can be resolved.
  pub async fn export_activity_to_json(
    &self,
    activity_id: Option<&str>,
  ) -> Result<Option<ExportSnapshot>> {
    let activity = activity_id.unwrap_or(&self.session().activity_id);
    if activity.is_empty() {
      debug!("No activity to export");
      return Ok(None);
    }

    let answers = self.backend.export_answers(activity).await?;
    let filename = format!(
      "Activity_{}_{}",
      short_activity_id(activity),
      Local::now().format("%Y%m%d")
    );

    Ok(Some(ExportSnapshot {
      activity: activity.to_string(),
      filename,
      version: EXPORT_SCHEMA_VERSION,
      answers,
    }))
  }

  pub fn learner_plugin_state_doc_id(&self, plugin_id: u64) -> Option<String> {
    self.backend.learner_plugin_state_doc_id(plugin_id)
  }

  pub fn cached_learner_plugin_state(&self, plugin_id: u64) -> Option<String> {
    self.backend.cached_learner_plugin_state(plugin_id)
  }

  pub async fn learner_plugin_state(&self, plugin_id: u64) -> Result<Option<String>> {
    self.backend.learner_plugin_state(plugin_id).await
  }

  pub async fn set_learner_plugin_state(&self, plugin_id: u64, state: &str) -> Result<String> {
    self.backend.set_learner_plugin_state(plugin_id, state).await
  }

  pub async fn check_if_online(&self) -> Result<bool> {
    self.backend.check_if_online().await
  }
}

/// Last path segment of a URL activity id without its `.json` suffix;
/// plain ids are used as they are.
fn short_activity_id(activity: &str) -> String {
  Url::parse(activity)
    .ok()
    .and_then(|url| {
      url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| segment.trim_end_matches(".json").to_string())
    })
    .filter(|id| !id.is_empty())
    .unwrap_or_else(|| activity.to_string())
}
