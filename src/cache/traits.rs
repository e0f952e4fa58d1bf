//! Core types for caching jobs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options forwarded to the fetcher for a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
  /// HTTP method (defaults to GET)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub method: Option<String>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub headers: BTreeMap<String, String>,
  /// Request mode such as `cors` or `no-cors`. Kept on the entry; an HTTP
  /// client has no same-origin policy to apply it to.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mode: Option<String>,
}

/// A URL to cache, optionally with request options.
///
/// On the wire an entry is either `"url"` or `["url", {options}]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EntryRepr", into = "EntryRepr")]
pub struct CacheEntry {
  pub url: String,
  pub options: Option<RequestOptions>,
}

impl CacheEntry {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      options: None,
    }
  }

  pub fn with_options(url: impl Into<String>, options: RequestOptions) -> Self {
    Self {
      url: url.into(),
      options: Some(options),
    }
  }

  pub fn request(&self) -> FetchRequest {
    FetchRequest {
      url: self.url.clone(),
      options: self.options.clone().unwrap_or_default(),
    }
  }
}

impl From<&str> for CacheEntry {
  fn from(url: &str) -> Self {
    Self::new(url)
  }
}

impl From<String> for CacheEntry {
  fn from(url: String) -> Self {
    Self::new(url)
  }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum EntryRepr {
  Url(String),
  WithOptions(String, Option<RequestOptions>),
  UrlOnly((String,)),
}

impl From<EntryRepr> for CacheEntry {
  fn from(repr: EntryRepr) -> Self {
    match repr {
      EntryRepr::Url(url) | EntryRepr::UrlOnly((url,)) => Self { url, options: None },
      EntryRepr::WithOptions(url, options) => Self { url, options },
    }
  }
}

impl From<CacheEntry> for EntryRepr {
  fn from(entry: CacheEntry) -> Self {
    match entry.options {
      None => EntryRepr::Url(entry.url),
      Some(options) => EntryRepr::WithOptions(entry.url, Some(options)),
    }
  }
}

/// A request handed to the fetcher or the router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
  pub url: String,
  pub options: RequestOptions,
}

impl FetchRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      options: RequestOptions::default(),
    }
  }

  pub fn method(&self) -> &str {
    self.options.method.as_deref().unwrap_or("GET")
  }

  /// Case-insensitive header lookup
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .options
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A full response as fetched from the network and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseRecord {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Terminal result for one entry of a caching job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
  /// Fetched from the network and stored
  Cached(String),
  /// Already present in the cache
  Found(String),
  /// Fetch or store failed
  Failed(String, String),
}

/// Event streamed by a running caching job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
  Outcome(CacheOutcome),
  /// Sent exactly once, after every outcome
  Finished,
}
