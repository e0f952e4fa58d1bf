//! Caching job engine: fetch and store many entries concurrently.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::fetch::Fetcher;
use super::key::CacheKeys;
use super::storage::ResponseStorage;
use super::traits::{CacheEntry, CacheOutcome, JobEvent};

/// Runs caching jobs against a response storage.
///
/// Every distinct cache key in a job settles to exactly one outcome; a
/// failing entry never aborts the others. `JobEvent::Finished` is sent
/// once all entries have settled.
pub struct CacheJobEngine<S: ResponseStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  keys: CacheKeys,
}

impl<S: ResponseStorage, F: Fetcher> CacheJobEngine<S, F> {
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, keys: CacheKeys) -> Self {
    Self {
      storage,
      fetcher,
      keys,
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn keys(&self) -> &CacheKeys {
    &self.keys
  }

  /// Run a caching job, streaming events to `events`.
  ///
  /// A closed receiver only stops the reporting; every entry is still
  /// fetched and stored.
  pub async fn run(&self, entries: Vec<CacheEntry>, events: mpsc::UnboundedSender<JobEvent>) {
    let entries = self.dedupe(entries);
    info!(count = entries.len(), "Caching job started");

    let pending = entries.into_iter().map(|(key, entry)| {
      let events = events.clone();
      async move {
        let outcome = match key {
          Ok(key) => self.cache_entry(&key, &entry).await,
          Err(e) => CacheOutcome::Failed(entry.url.clone(), e.to_string()),
        };
        if let CacheOutcome::Failed(url, reason) = &outcome {
          warn!(url = %url, reason = %reason, "Failed to cache entry");
        }
        let _ = events.send(JobEvent::Outcome(outcome));
      }
    });

    // Settle everything before signalling completion
    join_all(pending).await;

    info!("Caching job finished");
    let _ = events.send(JobEvent::Finished);
  }

  /// Run a job and collect its outcomes in completion order.
  #[cfg(test)]
  pub async fn run_to_completion(&self, entries: Vec<CacheEntry>) -> Vec<CacheOutcome> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    self.run(entries, tx).await;

    let mut outcomes = Vec::new();
    while let Some(event) = rx.recv().await {
      match event {
        JobEvent::Outcome(outcome) => outcomes.push(outcome),
        JobEvent::Finished => break,
      }
    }
    outcomes
  }

  /// Keep the first entry for each normalized key. Entries whose URL cannot
  /// be normalized are kept (keyed by their raw URL) so they report a failure.
  fn dedupe(&self, entries: Vec<CacheEntry>) -> Vec<(Result<String>, CacheEntry)> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(entries.len());

    for entry in entries {
      let key = self.keys.normalize(&entry.url);
      let seen_key = match &key {
        Ok(k) => k.clone(),
        Err(_) => entry.url.clone(),
      };
      if seen.insert(seen_key) {
        unique.push((key, entry));
      } else {
        debug!(url = %entry.url, "Skipping duplicate cache entry");
      }
    }

    unique
  }

  async fn cache_entry(&self, key: &str, entry: &CacheEntry) -> CacheOutcome {
    match self.storage.contains(key) {
      Ok(true) => return CacheOutcome::Found(entry.url.clone()),
      Ok(false) => {}
      Err(e) => return CacheOutcome::Failed(entry.url.clone(), e.to_string()),
    }

    match self.fetch_and_store(key, entry).await {
      Ok(()) => CacheOutcome::Cached(entry.url.clone()),
      Err(e) => CacheOutcome::Failed(entry.url.clone(), e.to_string()),
    }
  }

  async fn fetch_and_store(&self, key: &str, entry: &CacheEntry) -> Result<()> {
    let response = self.fetcher.fetch(&entry.request()).await?;
    if !response.is_success() {
      return Err(eyre!(
        "Bad response status {} for {}",
        response.status,
        entry.url
      ));
    }
    self.storage.put(key, &response)
  }
}
