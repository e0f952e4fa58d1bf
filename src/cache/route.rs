//! Cache-only routing of intercepted requests.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::key::CacheKeys;
use super::range::{parse_range, slice_response, unsatisfiable};
use super::storage::ResponseStorage;
use super::traits::{FetchRequest, ResponseRecord};

/// URL fragments that are never answered from the cache.
const IGNORED_FRAGMENTS: &[&str] = &[
  "/sockjs-node/info",
  ".hot-update.",
  "//firestore.googleapis.com/",
  "/install.html",
  "/assets/install",
  "/app-manifest.js",
  "/offline-manifests/",
  "https://learn.concord.org/",
  "https://learn.staging.concord.org/",
];

/// What to do with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
  /// Not handled by the cache; let it reach the network
  Passthrough,
  /// Handled by the cache but nothing is stored for it
  Miss,
  /// Answer from the cache
  Respond(ResponseRecord),
}

/// Answers GET requests from the response storage only.
pub struct CacheRouter<S: ResponseStorage> {
  storage: Arc<S>,
  keys: CacheKeys,
}

impl<S: ResponseStorage> CacheRouter<S> {
  pub fn new(storage: Arc<S>, keys: CacheKeys) -> Self {
    Self { storage, keys }
  }

  /// Whether a request is routed through the cache at all.
  pub fn matches(request: &FetchRequest) -> bool {
    request.method().eq_ignore_ascii_case("GET")
      && !IGNORED_FRAGMENTS.iter().any(|f| request.url.contains(f))
  }

  pub fn handle(&self, request: &FetchRequest) -> Result<RouteDecision> {
    if !Self::matches(request) {
      return Ok(RouteDecision::Passthrough);
    }

    let key = self.keys.normalize(&request.url)?;
    let Some(full) = self.storage.get(&key)? else {
      debug!(url = %request.url, "Cache miss");
      return Ok(RouteDecision::Miss);
    };

    let response = match request.header("range") {
      Some(range) => match parse_range(range, full.body.len()) {
        Some(range) => slice_response(&full, range),
        None => unsatisfiable(&full),
      },
      None => full,
    };

    Ok(RouteDecision::Respond(response))
  }
}
