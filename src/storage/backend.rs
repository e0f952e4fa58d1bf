//! The capabilities every answer backend provides.

use async_trait::async_trait;
use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use super::types::{AnswerMetadata, IndexedAnswer, Session, WrappedAnswer};

/// Receives the current answer for one question (`None` when unanswered).
pub type AnswerCallback = Box<dyn Fn(Option<WrappedAnswer>) + Send + Sync>;
/// Receives every answer of the session.
pub type AllAnswersCallback = Box<dyn Fn(Vec<WrappedAnswer>) + Send + Sync>;

/// Detachment handle returned by watches.
///
/// Like a task handle, dropping it leaves a live listener running; call
/// `unsubscribe` to stop it.
#[derive(Debug)]
pub struct Subscription {
  listener: Option<JoinHandle<()>>,
}

impl Subscription {
  /// Handle for a watch that already delivered everything it will.
  pub fn noop() -> Self {
    Self { listener: None }
  }

  pub(crate) fn live(listener: JoinHandle<()>) -> Self {
    Self {
      listener: Some(listener),
    }
  }

  /// Whether a listener is still attached.
  pub fn is_live(&self) -> bool {
    self
      .listener
      .as_ref()
      .is_some_and(|listener| !listener.is_finished())
  }

  pub fn unsubscribe(self) {
    if let Some(listener) = self.listener {
      listener.abort();
    }
  }
}

/// Plugin states read or written during this session.
#[derive(Debug, Default)]
pub struct PluginStateCache {
  states: Mutex<HashMap<u64, String>>,
}

impl PluginStateCache {
  pub fn get(&self, plugin_id: u64) -> Option<String> {
    self
      .states
      .lock()
      .ok()
      .and_then(|states| states.get(&plugin_id).cloned())
  }

  pub fn insert(&self, plugin_id: u64, state: &str) {
    if let Ok(mut states) = self.states.lock() {
      states.insert(plugin_id, state.to_string());
    }
  }
}

/// A storage engine for learner answers and plugin state.
#[async_trait]
pub trait AnswerBackend: Send + Sync {
  fn session(&self) -> &Session;

  /// Upsert an answer by id, stamped with the session's activity.
  async fn create_or_update_answer(&self, answer: &AnswerMetadata) -> Result<()>;

  /// Deliver the answer for an embeddable reference id.
  async fn watch_answer(&self, ref_id: &str, callback: AnswerCallback) -> Result<Subscription>;

  /// Deliver every answer of the session's activity.
  async fn watch_all_answers(&self, callback: AllAnswersCallback) -> Result<Subscription>;

  /// Whether `export_answers` is available.
  fn supports_export(&self) -> bool;

  /// All stored answers of an activity, oldest first.
  async fn export_answers(&self, activity: &str) -> Result<Vec<IndexedAnswer>>;

  async fn check_if_online(&self) -> Result<bool>;

  fn plugin_cache(&self) -> &PluginStateCache;

  /// Read a plugin state document.
  async fn load_plugin_state(&self, doc_id: &str) -> Result<Option<String>>;

  /// Write a plugin state document.
  async fn store_plugin_state(&self, doc_id: &str, plugin_id: u64, state: &str) -> Result<()>;

  fn learner_plugin_state_doc_id(&self, plugin_id: u64) -> Option<String> {
    let run_key = &self.session().run_key;
    if run_key.is_empty() {
      None
    } else {
      Some(format!("{}-{}", run_key, plugin_id))
    }
  }

  fn cached_learner_plugin_state(&self, plugin_id: u64) -> Option<String> {
    self.plugin_cache().get(plugin_id)
  }

  async fn learner_plugin_state(&self, plugin_id: u64) -> Result<Option<String>> {
    let Some(doc_id) = self.learner_plugin_state_doc_id(plugin_id) else {
      return Ok(None);
    };

    let state = self.load_plugin_state(&doc_id).await?;
    if let Some(state) = &state {
      self.plugin_cache().insert(plugin_id, state);
    }
    Ok(state)
  }

  async fn set_learner_plugin_state(&self, plugin_id: u64, state: &str) -> Result<String> {
    self.plugin_cache().insert(plugin_id, state);

    match self.learner_plugin_state_doc_id(plugin_id) {
      Some(doc_id) => self.store_plugin_state(&doc_id, plugin_id, state).await?,
      None => warn!(plugin_id, "No run key, plugin state kept in memory only"),
    }
    Ok(state.to_string())
  }
}
