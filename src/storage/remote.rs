//! Live-synced document store backend.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::answer::{doc_to_wrapped_answer, ref_id_to_answers_question_id};
use super::backend::{AllAnswersCallback, AnswerBackend, AnswerCallback, PluginStateCache, Subscription};
use super::types::{AnswerMetadata, IndexedAnswer, Session, WrappedAnswer};

const ANSWERS: &str = "answers";
const PLUGIN_STATES: &str = "plugin_states";

/// A document was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
  pub collection: String,
  pub id: String,
}

/// Collections of JSON documents that broadcast every write.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
  async fn set_document(&self, collection: &str, id: &str, document: Value) -> Result<()>;

  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>>;

  /// Documents whose string fields equal every filter value, ordered by id.
  async fn query(&self, collection: &str, filters: &[(&str, &str)]) -> Result<Vec<Value>>;

  fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;

  async fn is_online(&self) -> Result<bool>;
}

/// In-process document store.
pub struct MemoryDocumentStore {
  collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
  changes: broadcast::Sender<DocumentChange>,
  online: AtomicBool,
}

impl Default for MemoryDocumentStore {
  fn default() -> Self {
    let (changes, _) = broadcast::channel(256);
    Self {
      collections: Mutex::new(HashMap::new()),
      changes,
      online: AtomicBool::new(true),
    }
  }
}

impl MemoryDocumentStore {
  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
  async fn set_document(&self, collection: &str, id: &str, document: Value) -> Result<()> {
    self
      .collections
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .entry(collection.to_string())
      .or_default()
      .insert(id.to_string(), document);

    // No receivers is fine
    let _ = self.changes.send(DocumentChange {
      collection: collection.to_string(),
      id: id.to_string(),
    });
    Ok(())
  }

  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    let collections = self
      .collections
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
  }

  async fn query(&self, collection: &str, filters: &[(&str, &str)]) -> Result<Vec<Value>> {
    let collections = self
      .collections
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let Some(documents) = collections.get(collection) else {
      return Ok(Vec::new());
    };

    Ok(
      documents
        .values()
        .filter(|doc| {
          filters
            .iter()
            .all(|(field, value)| doc.get(*field).and_then(Value::as_str) == Some(*value))
        })
        .cloned()
        .collect(),
    )
  }

  fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
    self.changes.subscribe()
  }

  async fn is_online(&self) -> Result<bool> {
    Ok(self.online.load(Ordering::SeqCst))
  }
}

/// Backend that writes answers to a live-synced document store and keeps
/// watchers attached until they unsubscribe.
pub struct RemoteBackend<D: DocumentStore + ?Sized> {
  store: Arc<D>,
  session: Session,
  plugin_cache: PluginStateCache,
}

impl<D: DocumentStore + ?Sized> RemoteBackend<D> {
  pub fn new(store: Arc<D>, session: Session) -> Self {
    Self {
      store,
      session,
      plugin_cache: PluginStateCache::default(),
    }
  }
}

/// Answers matching the filters, converted for watchers.
async fn load_answers<D: DocumentStore + ?Sized>(store: &D, filters: &[(&str, &str)]) -> Result<Vec<WrappedAnswer>> {
  let documents = store.query(ANSWERS, filters).await?;
  let mut answers = Vec::with_capacity(documents.len());
  for document in documents {
    let indexed: IndexedAnswer = match serde_json::from_value(document) {
      Ok(indexed) => indexed,
      Err(e) => {
        warn!("Skipping malformed answer document: {}", e);
        continue;
      }
    };
    match doc_to_wrapped_answer(indexed.meta) {
      Ok(wrapped) => answers.push(wrapped),
      Err(e) => warn!("Skipping answer: {}", e),
    }
  }
  Ok(answers)
}

/// Deliver the current result, then re-deliver whenever it changes.
///
/// The first delivery has happened by the time this returns; only later
/// changes are delivered from the listener task.
async fn listen<D, T, F>(
  store: Arc<D>,
  filters: Vec<(String, String)>,
  select: fn(Vec<WrappedAnswer>) -> T,
  deliver: F,
) -> Result<Subscription>
where
  D: DocumentStore + ?Sized,
  T: Clone + PartialEq + Send + 'static,
  F: Fn(T) + Send + Sync + 'static,
{
  // Subscribe before the first read so no write slips between them
  let mut changes = store.subscribe();

  let initial = {
    let filters: Vec<(&str, &str)> = filters
      .iter()
      .map(|(k, v)| (k.as_str(), v.as_str()))
      .collect();
    select(load_answers(store.as_ref(), &filters).await?)
  };
  deliver(initial.clone());

  Ok(Subscription::live(tokio::spawn(async move {
    let filters: Vec<(&str, &str)> = filters
      .iter()
      .map(|(k, v)| (k.as_str(), v.as_str()))
      .collect();
    let mut last = initial;

    loop {
      // Wait for the next write to the answers collection
      loop {
        match changes.recv().await {
          Ok(change) if change.collection == ANSWERS => break,
          Ok(_) => continue,
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            debug!(skipped, "Answer listener lagged, refreshing");
            break;
          }
          Err(broadcast::error::RecvError::Closed) => return,
        }
      }

      match load_answers(store.as_ref(), &filters).await {
        Ok(answers) => {
          let current = select(answers);
          if current != last {
            deliver(current.clone());
            last = current;
          }
        }
        Err(e) => warn!("Failed to refresh watched answers: {}", e),
      }
    }
  })))
}

fn first_answer(answers: Vec<WrappedAnswer>) -> Option<WrappedAnswer> {
  answers.into_iter().next()
}

fn all_answers(answers: Vec<WrappedAnswer>) -> Vec<WrappedAnswer> {
  answers
}

#[async_trait]
impl<D: DocumentStore + ?Sized> AnswerBackend for RemoteBackend<D> {
  fn session(&self) -> &Session {
    &self.session
  }

  async fn create_or_update_answer(&self, answer: &AnswerMetadata) -> Result<()> {
    let indexed = IndexedAnswer {
      meta: answer.clone(),
      activity: self.session.activity_id.clone(),
    };
    let mut document =
      serde_json::to_value(&indexed).map_err(|e| eyre!("Failed to serialize answer: {}", e))?;
    document["run_key"] = Value::String(self.session.run_key.clone());

    self.store.set_document(ANSWERS, &answer.id, document).await
  }

  async fn watch_answer(&self, ref_id: &str, callback: AnswerCallback) -> Result<Subscription> {
    let question_id = ref_id_to_answers_question_id(ref_id);
    let filters = vec![
      ("question_id".to_string(), question_id),
      ("run_key".to_string(), self.session.run_key.clone()),
    ];
    listen(Arc::clone(&self.store), filters, first_answer, callback).await
  }

  async fn watch_all_answers(&self, callback: AllAnswersCallback) -> Result<Subscription> {
    let filters = vec![("run_key".to_string(), self.session.run_key.clone())];
    listen(Arc::clone(&self.store), filters, all_answers, callback).await
  }

  fn supports_export(&self) -> bool {
    false
  }

  async fn export_answers(&self, _activity: &str) -> Result<Vec<IndexedAnswer>> {
    Err(eyre!("Exporting answers from the remote store is not yet implemented"))
  }

  async fn check_if_online(&self) -> Result<bool> {
    self.store.is_online().await
  }

  fn plugin_cache(&self) -> &PluginStateCache {
    &self.plugin_cache
  }

  async fn load_plugin_state(&self, doc_id: &str) -> Result<Option<String>> {
    let document = self.store.get_document(PLUGIN_STATES, doc_id).await?;
    Ok(
      document
        .and_then(|d| d.get("state").and_then(Value::as_str).map(String::from)),
    )
  }

  async fn store_plugin_state(&self, doc_id: &str, plugin_id: u64, state: &str) -> Result<()> {
    self
      .store
      .set_document(
        PLUGIN_STATES,
        doc_id,
        json!({"plugin_id": plugin_id, "state": state}),
      )
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::answer::{answer_with_metadata, EmbeddableConfig};
  use std::time::Duration;
  use tokio::sync::mpsc;

  fn backend() -> RemoteBackend<MemoryDocumentStore> {
    RemoteBackend::new(
      Arc::new(MemoryDocumentStore::default()),
      Session::new("activity-1", "run-1"),
    )
  }

  fn answer(text: &str, prior: Option<&AnswerMetadata>) -> AnswerMetadata {
    answer_with_metadata(
      &json!({"answerType": "open_response_answer", "answerText": text}),
      &EmbeddableConfig::new("7-ManagedInteractive", ""),
      prior,
    )
    .unwrap()
  }

  async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
      .await
      .expect("timed out waiting for callback")
      .expect("listener stopped")
  }

  #[tokio::test]
  async fn test_watch_answer_fires_on_every_change() {
    let backend = backend();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = backend
      .watch_answer(
        "7-ManagedInteractive",
        Box::new(move |answer| {
          let _ = tx.send(answer.map(|a| a.meta.answer_text));
        }),
      )
      .await
      .unwrap();

    assert_eq!(next(&mut rx).await, None);

    let first = answer("one", None);
    backend.create_or_update_answer(&first).await.unwrap();
    assert_eq!(next(&mut rx).await, Some(Some("one".to_string())));

    backend
      .create_or_update_answer(&answer("two", Some(&first)))
      .await
      .unwrap();
    assert_eq!(next(&mut rx).await, Some(Some("two".to_string())));

    assert!(subscription.is_live());
    subscription.unsubscribe();
  }

  #[tokio::test]
  async fn test_unsubscribe_detaches_listener() {
    let backend = backend();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = backend
      .watch_all_answers(Box::new(move |answers| {
        let _ = tx.send(answers.len());
      }))
      .await
      .unwrap();
    assert_eq!(next(&mut rx).await, 0);

    subscription.unsubscribe();
    tokio::task::yield_now().await;
    backend
      .create_or_update_answer(&answer("one", None))
      .await
      .unwrap();

    // The sender lives in the aborted listener, so the channel closes
    let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
      .await
      .unwrap();
    assert_eq!(closed, None);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_current_answer_delivered_before_watch_returns() {
    let backend = backend();
    let saved = answer("one", None);
    backend.create_or_update_answer(&saved).await.unwrap();

    for _ in 0..20 {
      let seen = Arc::new(Mutex::new(None));
      let sink = Arc::clone(&seen);
      backend
        .watch_answer(
          "7-ManagedInteractive",
          Box::new(move |answer| {
            *sink.lock().unwrap() = answer.map(|a| a.meta.id);
          }),
        )
        .await
        .unwrap()
        .unsubscribe();
      assert_eq!(seen.lock().unwrap().as_deref(), Some(saved.id.as_str()));

      let count = Arc::new(Mutex::new(None));
      let sink = Arc::clone(&count);
      backend
        .watch_all_answers(Box::new(move |answers| {
          *sink.lock().unwrap() = Some(answers.len());
        }))
        .await
        .unwrap()
        .unsubscribe();
      assert_eq!(*count.lock().unwrap(), Some(1));
    }
  }

  #[tokio::test]
  async fn test_watch_all_is_scoped_to_run() {
    let store = Arc::new(MemoryDocumentStore::default());
    let mine = RemoteBackend::new(Arc::clone(&store), Session::new("a", "run-1"));
    let other = RemoteBackend::new(Arc::clone(&store), Session::new("a", "run-2"));
    other
      .create_or_update_answer(&answer("theirs", None))
      .await
      .unwrap();
    mine
      .create_or_update_answer(&answer("mine", None))
      .await
      .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = mine
      .watch_all_answers(Box::new(move |answers| {
        let _ = tx.send(
          answers
            .into_iter()
            .map(|a| a.interactive_state["answerText"].clone())
            .collect::<Vec<_>>(),
        );
      }))
      .await
      .unwrap();

    assert_eq!(next(&mut rx).await, vec![json!("mine")]);
    subscription.unsubscribe();
  }

  #[tokio::test]
  async fn test_export_is_not_implemented() {
    let backend = backend();
    assert!(!backend.supports_export());
    let err = backend.export_answers("activity-1").await.unwrap_err();
    assert!(err.to_string().contains("not yet implemented"));
  }

  #[tokio::test]
  async fn test_plugin_state() {
    let backend = backend();
    assert_eq!(
      backend.learner_plugin_state_doc_id(3).as_deref(),
      Some("run-1-3")
    );
    assert_eq!(backend.cached_learner_plugin_state(3), None);

    let stored = backend.set_learner_plugin_state(3, "{\"a\":1}").await.unwrap();
    assert_eq!(stored, "{\"a\":1}");
    assert_eq!(
      backend.learner_plugin_state(3).await.unwrap().as_deref(),
      Some("{\"a\":1}")
    );
    assert_eq!(
      backend.cached_learner_plugin_state(3).as_deref(),
      Some("{\"a\":1}")
    );
  }

  #[tokio::test]
  async fn test_connectivity_follows_store() {
    let store = Arc::new(MemoryDocumentStore::default());
    let backend = RemoteBackend::new(Arc::clone(&store), Session::default());
    assert!(backend.check_if_online().await.unwrap());
    store.set_online(false);
    assert!(!backend.check_if_online().await.unwrap());
  }
}
