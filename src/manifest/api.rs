//! Manifest resolution, fetching, merging and listing.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::types::{AuthoringOverride, OfflineActivityRecord, OfflineManifest};
use crate::cache::{FetchRequest, Fetcher};

/// Directory published manifests live in, relative to the app.
pub const MANIFEST_DIR: &str = "offline-manifests";

/// Map a manifest name or URL to the location to fetch it from.
///
/// Absolute URLs pass through; bare names become
/// `offline-manifests/<name>.json`.
pub fn resolve_manifest_location(name_or_url: &str) -> String {
  if Url::parse(name_or_url).is_ok() {
    name_or_url.to_string()
  } else {
    format!("{}/{}.json", MANIFEST_DIR, name_or_url)
  }
}

/// Prepend the draft's activities and cache list to the manifest's.
///
/// Entries present in both are kept twice; order decides precedence.
pub fn merge_manifest_with_override(
  manifest: &OfflineManifest,
  draft: &AuthoringOverride,
) -> OfflineManifest {
  OfflineManifest {
    name: manifest.name.clone(),
    activities: draft
      .activities
      .iter()
      .chain(&manifest.activities)
      .cloned()
      .collect(),
    cache_list: draft
      .cache_list
      .iter()
      .chain(&manifest.cache_list)
      .cloned()
      .collect(),
  }
}

/// Stable sort by manifest name, then order.
pub fn normalize_and_sort_activities(
  mut records: Vec<OfflineActivityRecord>,
) -> Vec<OfflineActivityRecord> {
  records.sort_by(|a, b| {
    a.manifest_name
      .cmp(&b.manifest_name)
      .then(a.order.cmp(&b.order))
  });
  records
}

/// The manifest file an author downloads for a draft.
pub fn authoring_download_json(name: &str, draft: &AuthoringOverride) -> OfflineManifest {
  OfflineManifest {
    name: name.to_string(),
    activities: draft.activities.clone(),
    cache_list: draft.cache_list.clone(),
  }
}

/// Fetches published manifests relative to the app's base URL.
pub struct ManifestClient<F: Fetcher> {
  fetcher: Arc<F>,
  base_url: Url,
}

impl<F: Fetcher> ManifestClient<F> {
  pub fn new(fetcher: Arc<F>, base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid manifest base url {}: {}", base_url, e))?;
    Ok(Self { fetcher, base_url })
  }

  /// Absolute URL a manifest is fetched from.
  pub fn manifest_url(&self, name_or_url: &str) -> Result<Url> {
    let location = resolve_manifest_location(name_or_url);
    self
      .base_url
      .join(&location)
      .map_err(|e| eyre!("Invalid manifest location {}: {}", location, e))
  }

  pub async fn fetch_manifest(&self, name_or_url: &str) -> Result<OfflineManifest> {
    let url = self.manifest_url(name_or_url)?;
    debug!(url = %url, "Fetching offline manifest");

    let response = self
      .fetcher
      .fetch(&FetchRequest::get(url.as_str()))
      .await
      .map_err(|e| eyre!("Failed to fetch offline manifest {}: {}", url, e))?;

    if !response.is_success() {
      return Err(eyre!(
        "Failed to fetch offline manifest {}: status {}",
        url,
        response.status
      ));
    }

    serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Failed to parse offline manifest {}: {}", url, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::FakeFetcher;
  use crate::manifest::ActivityRef;

  fn activity(n: u32) -> ActivityRef {
    ActivityRef {
      name: format!("Activity {}", n),
      resource_url: format!("http://example.com/activity-{}-resource-url", n),
      content_url: format!("http://example.com/activity-{}-content-url", n),
    }
  }

  fn record(n: u32, manifest: &str, order: i64) -> OfflineActivityRecord {
    OfflineActivityRecord {
      name: format!("Activity {}", n),
      resource_url: format!("http://example.com/activity-{}-resource-url", n),
      content_url: format!("http://example.com/activity-{}-context-url", n),
      manifest_name: manifest.into(),
      order,
    }
  }

  #[test]
  fn test_resolve_manifest_location() {
    assert_eq!(resolve_manifest_location("foo"), "offline-manifests/foo.json");
    assert_eq!(resolve_manifest_location("https://foo"), "https://foo");
  }

  #[test]
  fn test_merge_prepends_draft() {
    let manifest = OfflineManifest {
      name: "Test Manifest".into(),
      activities: vec![activity(1), activity(2)],
      cache_list: vec!["x".into(), "y".into()],
    };
    let draft = AuthoringOverride {
      activities: vec![activity(3)],
      cache_list: vec!["z".into()],
    };

    let merged = merge_manifest_with_override(&manifest, &draft);
    assert_eq!(merged.name, "Test Manifest");
    assert_eq!(merged.activities, vec![activity(3), activity(1), activity(2)]);
    assert_eq!(merged.cache_list, vec!["z", "x", "y"]);
  }

  #[test]
  fn test_merge_keeps_duplicates() {
    let manifest = OfflineManifest {
      name: "m".into(),
      activities: vec![activity(1)],
      cache_list: vec!["x".into()],
    };
    let draft = AuthoringOverride {
      activities: vec![activity(1)],
      cache_list: vec!["x".into()],
    };
    let merged = merge_manifest_with_override(&manifest, &draft);
    assert_eq!(merged.activities.len(), 2);
    assert_eq!(merged.cache_list, vec!["x", "x"]);
  }

  #[test]
  fn test_normalize_and_sort() {
    let sorted = normalize_and_sort_activities(vec![
      record(5, "Manifest 3", 0),
      record(2, "Manifest 1", 1),
      record(4, "Manifest 2", 1),
      record(1, "Manifest 1", 0),
      record(3, "Manifest 2", 0),
    ]);
    let names: Vec<&str> = sorted.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
      names,
      vec!["Activity 1", "Activity 2", "Activity 3", "Activity 4", "Activity 5"]
    );
    assert_eq!(normalize_and_sort_activities(sorted.clone()), sorted);
  }

  #[test]
  fn test_sort_is_stable() {
    let mut a = record(1, "m", 0);
    a.name = "first".into();
    let mut b = record(2, "m", 0);
    b.name = "second".into();
    let sorted = normalize_and_sort_activities(vec![a, b]);
    assert_eq!(sorted[0].name, "first");
    assert_eq!(sorted[1].name, "second");
  }

  #[test]
  fn test_authoring_download_json() {
    let json = authoring_download_json("test", &AuthoringOverride::default());
    assert_eq!(
      serde_json::to_value(&json).unwrap(),
      serde_json::json!({"name": "test", "activities": [], "cacheList": []})
    );
  }

  #[tokio::test]
  async fn test_fetch_manifest_by_name() {
    let body = br#"{"name": "Test Manifest", "activities": [], "cacheList": []}"#;
    let fetcher = FakeFetcher::default().ok("https://app.example.com/offline-manifests/test.json", body);
    let client = ManifestClient::new(Arc::new(fetcher), "https://app.example.com/index.html").unwrap();

    let manifest = client.fetch_manifest("test").await.unwrap();
    assert_eq!(
      manifest,
      OfflineManifest {
        name: "Test Manifest".into(),
        activities: vec![],
        cache_list: vec![],
      }
    );
  }

  #[tokio::test]
  async fn test_fetch_manifest_errors() {
    let fetcher = FakeFetcher::default()
      .status("https://cdn.com/missing.json", 404, b"")
      .ok("https://cdn.com/broken.json", b"{not json");
    let client = ManifestClient::new(Arc::new(fetcher), "https://app.example.com/").unwrap();

    let missing = client
      .fetch_manifest("https://cdn.com/missing.json")
      .await
      .unwrap_err();
    assert!(missing.to_string().contains("404"));

    let broken = client
      .fetch_manifest("https://cdn.com/broken.json")
      .await
      .unwrap_err();
    assert!(broken.to_string().contains("Failed to parse"));
  }
}
