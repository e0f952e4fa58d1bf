//! Wire format of worker messages.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, CacheOutcome, JobEvent};

/// Messages accepted on the worker's inbound channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  CacheEntriesWithProgress { payload: CacheEntriesPayload },
  /// Activate immediately
  SkipWaiting,
  /// Reply on the attached port with the version string
  GetVersionInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntriesPayload {
  pub entries_to_cache: Vec<CacheEntry>,
}

/// Messages streamed back on a caching job's port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressMessage {
  EntryCached { payload: UrlPayload },
  EntryFound { payload: UrlPayload },
  EntryCacheFailed { payload: FailedPayload },
  CachingFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPayload {
  pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayload {
  pub url: String,
  pub error: String,
}

impl From<JobEvent> for ProgressMessage {
  fn from(event: JobEvent) -> Self {
    match event {
      JobEvent::Outcome(CacheOutcome::Cached(url)) => Self::EntryCached {
        payload: UrlPayload { url },
      },
      JobEvent::Outcome(CacheOutcome::Found(url)) => Self::EntryFound {
        payload: UrlPayload { url },
      },
      JobEvent::Outcome(CacheOutcome::Failed(url, error)) => Self::EntryCacheFailed {
        payload: FailedPayload { url, error },
      },
      JobEvent::Finished => Self::CachingFinished,
    }
  }
}
