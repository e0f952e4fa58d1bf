use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

/// An activity listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRef {
  pub name: String,
  pub resource_url: String,
  pub content_url: String,
}

/// Published manifest file: `offline-manifests/<name>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineManifest {
  pub name: String,
  #[serde(default)]
  pub activities: Vec<ActivityRef>,
  #[serde(default)]
  pub cache_list: Vec<String>,
}

impl OfflineManifest {
  /// Activity content URLs followed by the auxiliary URLs, in order.
  pub fn cache_entries(&self) -> Vec<CacheEntry> {
    self
      .activities
      .iter()
      .map(|a| CacheEntry::new(a.content_url.clone()))
      .chain(self.cache_list.iter().map(|url| CacheEntry::new(url.clone())))
      .collect()
  }
}

/// Authoring draft layered over a published manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoringOverride {
  #[serde(default)]
  pub activities: Vec<ActivityRef>,
  #[serde(default)]
  pub cache_list: Vec<String>,
}

/// An activity made available offline, remembered across manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineActivityRecord {
  pub name: String,
  pub resource_url: String,
  pub content_url: String,
  pub manifest_name: String,
  pub order: i64,
}
