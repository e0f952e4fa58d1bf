//! Cache key normalization.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Query parameter appended by build tooling to bust caches.
const REVISION_PARAM: &str = "__WB_REVISION__";

/// Normalizes request URLs into cache keys.
///
/// The same normalization runs when a response is written by a caching job
/// and when an intercepted request is looked up, so both sides agree:
/// - the revision query parameter is removed (remaining parameters are
///   re-encoded)
/// - the root document (`<root>/`, `<root>/index.html`, with any query) maps
///   to `<root>/index.html`
#[derive(Debug, Clone)]
pub struct CacheKeys {
  root: Url,
  index: Url,
}

impl CacheKeys {
  /// `root_url` is the location the worker is installed at; only its
  /// directory part matters.
  pub fn new(root_url: &str) -> Result<Self> {
    let base =
      Url::parse(root_url).map_err(|e| eyre!("Invalid worker root url {}: {}", root_url, e))?;
    let root = base
      .join(".")
      .map_err(|e| eyre!("Invalid worker root url {}: {}", root_url, e))?;
    let index = root
      .join("index.html")
      .map_err(|e| eyre!("Invalid worker root url {}: {}", root_url, e))?;

    Ok(Self { root, index })
  }

  /// Compute the cache key for a URL.
  pub fn normalize(&self, url: &str) -> Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| eyre!("Invalid url {}: {}", url, e))?;
    parsed.set_fragment(None);

    if parsed.origin() == self.root.origin()
      && (parsed.path() == self.root.path() || parsed.path() == self.index.path())
    {
      return Ok(self.index.to_string());
    }

    strip_revision(&mut parsed);
    Ok(parsed.to_string())
  }
}

fn strip_revision(url: &mut Url) {
  if url.query().is_none() {
    return;
  }

  let kept: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| k != REVISION_PARAM)
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  if kept.is_empty() {
    url.set_query(None);
  } else {
    url.query_pairs_mut().clear().extend_pairs(kept);
  }
}
