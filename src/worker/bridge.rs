//! Foreground side of the caching protocol.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};

use super::port::MessageChannel;
use super::protocol::{CacheEntriesPayload, ProgressMessage, WorkerMessage};
use super::worker::WorkerHandle;
use crate::cache::CacheEntry;
use crate::manifest::OfflineManifest;

/// Something that can hand out the running worker.
#[async_trait]
pub trait WorkerSource: Send + Sync {
  async fn worker(&self) -> Result<WorkerHandle>;
}

#[async_trait]
impl WorkerSource for WorkerHandle {
  async fn worker(&self) -> Result<WorkerHandle> {
    Ok(self.clone())
  }
}

/// Progress callbacks for a caching job. All default to no-ops.
pub trait CachingProgress: Send {
  fn on_caching_started(&mut self) {}
  /// Called for entries that were fetched and for entries already cached
  fn on_url_cached(&mut self, _url: &str) {}
  fn on_url_cache_failed(&mut self, _url: &str, _reason: &str) {}
  fn on_caching_finished(&mut self) {}
}

/// Ask the worker to cache `entries`, reporting per-URL progress.
///
/// Resolves once the worker sends `CACHING_FINISHED`. Fails without
/// opening a channel when the worker cannot be obtained, and fails if the
/// worker drops the channel before finishing.
pub async fn cache_urls_with_progress<W, P>(
  source: &W,
  entries: Vec<CacheEntry>,
  progress: &mut P,
) -> Result<()>
where
  W: WorkerSource + ?Sized,
  P: CachingProgress + ?Sized,
{
  let worker = source.worker().await?;

  // The channel lives for this call only; every return path drops it
  let (port, mut channel) = MessageChannel::open();

  progress.on_caching_started();
  worker.post_message(
    WorkerMessage::CacheEntriesWithProgress {
      payload: CacheEntriesPayload {
        entries_to_cache: entries,
      },
    },
    Some(port),
  )?;

  while let Some(value) = channel.recv().await {
    let message = match serde_json::from_value::<ProgressMessage>(value) {
      Ok(message) => message,
      Err(e) => {
        warn!("Ignoring unexpected message from worker: {}", e);
        continue;
      }
    };

    match message {
      ProgressMessage::EntryCached { payload } | ProgressMessage::EntryFound { payload } => {
        info!(url = %payload.url, "Cached url");
        progress.on_url_cached(&payload.url);
      }
      ProgressMessage::EntryCacheFailed { payload } => {
        error!(url = %payload.url, error = %payload.error, "Failed to cache url");
        progress.on_url_cache_failed(&payload.url, &payload.error);
      }
      ProgressMessage::CachingFinished => {
        channel.close();
        info!("Caching finished");
        progress.on_caching_finished();
        return Ok(());
      }
    }
  }

  Err(eyre!("Worker closed the progress channel before caching finished"))
}

/// Cache every activity content URL and auxiliary URL of a manifest.
pub async fn cache_offline_manifest<W, P>(
  source: &W,
  manifest: &OfflineManifest,
  progress: &mut P,
) -> Result<()>
where
  W: WorkerSource + ?Sized,
  P: CachingProgress + ?Sized,
{
  cache_urls_with_progress(source, manifest.cache_entries(), progress).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::ActivityRef;
  use crate::worker::worker::Inbound;
  use serde_json::json;
  use tokio::sync::{mpsc, watch};

  use crate::worker::WorkerState;

  #[derive(Default)]
  struct Recorder {
    events: Vec<String>,
  }

  impl CachingProgress for Recorder {
    fn on_caching_started(&mut self) {
      self.events.push("started".into());
    }
    fn on_url_cached(&mut self, url: &str) {
      self.events.push(format!("cached {}", url));
    }
    fn on_url_cache_failed(&mut self, url: &str, reason: &str) {
      self.events.push(format!("failed {} {}", url, reason));
    }
    fn on_caching_finished(&mut self) {
      self.events.push("finished".into());
    }
  }

  struct NoWorker;

  #[async_trait]
  impl WorkerSource for NoWorker {
    async fn worker(&self) -> Result<WorkerHandle> {
      Err(eyre!("No worker registered"))
    }
  }

  /// Worker stand-in that replays a fixed script on the attached port.
  fn scripted_worker(
    script: Vec<serde_json::Value>,
  ) -> (WorkerHandle, tokio::task::JoinHandle<Vec<CacheEntry>>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_state_tx, state_rx) = watch::channel(WorkerState::Active);
    let task = tokio::spawn(async move {
      match rx.recv().await {
        Some(Inbound::Message {
          message: WorkerMessage::CacheEntriesWithProgress { payload },
          port: Some(port),
        }) => {
          for message in &script {
            port.post_message(message);
          }
          payload.entries_to_cache
        }
        _ => panic!("expected a caching request with a port"),
      }
    });
    (WorkerHandle::new(tx, state_rx), task)
  }

  #[tokio::test]
  async fn test_cache_urls_with_progress() {
    let (worker, task) = scripted_worker(vec![
      json!({"type": "ENTRY_CACHED", "payload": {"url": "https://example.com"}}),
      json!({"type": "ENTRY_CACHE_FAILED", "payload": {"url": "https://example.com/bad", "error": "mock error"}}),
      json!({"type": "ENTRY_FOUND", "payload": {"url": "https://example.com/found"}}),
      json!({"type": "CACHING_FINISHED"}),
    ]);
    let entries: Vec<CacheEntry> = vec![
      "https://example.com".into(),
      "https://example.com/bad".into(),
      "https://example.com/found".into(),
    ];

    let mut recorder = Recorder::default();
    cache_urls_with_progress(&worker, entries.clone(), &mut recorder)
      .await
      .unwrap();

    assert_eq!(task.await.unwrap(), entries);
    assert_eq!(
      recorder.events,
      vec![
        "started",
        "cached https://example.com",
        "failed https://example.com/bad mock error",
        "cached https://example.com/found",
        "finished",
      ]
    );
  }

  #[tokio::test]
  async fn test_messages_after_finished_are_ignored() {
    let (worker, _task) = scripted_worker(vec![
      json!({"type": "CACHING_FINISHED"}),
      json!({"type": "ENTRY_CACHED", "payload": {"url": "https://late"}}),
    ]);
    let mut recorder = Recorder::default();
    cache_urls_with_progress(&worker, vec![], &mut recorder)
      .await
      .unwrap();
    assert_eq!(recorder.events, vec!["started", "finished"]);
  }

  #[tokio::test]
  async fn test_missing_worker_fails_immediately() {
    let mut recorder = Recorder::default();
    let result = cache_urls_with_progress(&NoWorker, vec!["https://a".into()], &mut recorder).await;
    assert!(result.is_err());
    assert!(recorder.events.is_empty());
  }

  #[tokio::test]
  async fn test_channel_dropped_without_finish_is_an_error() {
    let (worker, _task) = scripted_worker(vec![json!({
      "type": "ENTRY_CACHED", "payload": {"url": "https://a"}
    })]);
    let mut recorder = Recorder::default();
    let result = cache_urls_with_progress(&worker, vec!["https://a".into()], &mut recorder).await;
    assert!(result.is_err());
    assert_eq!(recorder.events, vec!["started", "cached https://a"]);
  }

  #[tokio::test]
  async fn test_cache_offline_manifest_flattens_entries() {
    let (worker, task) = scripted_worker(vec![json!({"type": "CACHING_FINISHED"})]);
    let manifest = OfflineManifest {
      name: "Test Manifest".into(),
      activities: vec![
        ActivityRef {
          name: "Activity 1".into(),
          resource_url: "http://example.com/activity-1-resource-url".into(),
          content_url: "http://example.com/activity-1-content-url".into(),
        },
        ActivityRef {
          name: "Activity 2".into(),
          resource_url: "http://example.com/activity-2-resource-url".into(),
          content_url: "http://example.com/activity-2-content-url".into(),
        },
      ],
      cache_list: vec![
        "http://example.com/cache-list-item-1".into(),
        "http://example.com/cache-list-item-2".into(),
      ],
    };

    cache_offline_manifest(&worker, &manifest, &mut Recorder::default())
      .await
      .unwrap();

    let sent: Vec<String> = task.await.unwrap().into_iter().map(|e| e.url).collect();
    assert_eq!(
      sent,
      vec![
        "http://example.com/activity-1-content-url",
        "http://example.com/activity-2-content-url",
        "http://example.com/cache-list-item-1",
        "http://example.com/cache-list-item-2",
      ]
    );
  }

  #[tokio::test]
  async fn test_progress_from_running_worker() {
    use crate::cache::testing::FakeFetcher;
    use crate::cache::{
      CacheJobEngine, CacheKeys, ResponseRecord, ResponseStorage, SqliteResponseStorage,
    };
    use crate::db::Database;
    use crate::worker::Worker;
    use std::sync::Arc;

    let keys = CacheKeys::new("https://example.com/app/").unwrap();
    let storage = Arc::new(SqliteResponseStorage::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )));
    storage
      .put(
        &keys.normalize("https://found").unwrap(),
        &ResponseRecord {
          url: "https://found".into(),
          status: 200,
          headers: vec![],
          body: b"cached".to_vec(),
        },
      )
      .unwrap();
    let fetcher = FakeFetcher::default()
      .ok("https://a", b"a")
      .fail("https://bad", "mock error");
    let worker = Worker::spawn(
      CacheJobEngine::new(storage, Arc::new(fetcher), keys),
      "1.0.0",
    );

    let mut recorder = Recorder::default();
    cache_urls_with_progress(
      &worker,
      vec!["https://a".into(), "https://bad".into(), "https://found".into()],
      &mut recorder,
    )
    .await
    .unwrap();
    worker.shutdown().await.unwrap();

    let events = recorder.events;
    assert_eq!(events.len(), 5);
    assert_eq!(events.first().map(String::as_str), Some("started"));
    assert_eq!(events.last().map(String::as_str), Some("finished"));
    let per_url = &events[1..4];
    assert!(per_url.contains(&"cached https://a".to_string()));
    assert!(per_url.contains(&"cached https://found".to_string()));
    assert!(per_url
      .iter()
      .any(|e| e.starts_with("failed https://bad") && e.contains("mock error")));
  }
}
