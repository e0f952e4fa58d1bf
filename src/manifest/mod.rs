//! Offline manifests: which activities and URLs to pre-cache.
//!
//! - `api`: resolving, fetching, merging and sorting
//! - `authoring`: the draft being authored, kept in the key-value table
//! - `activities`: activities saved for offline use

mod activities;
mod api;
mod authoring;
mod types;

pub use activities::OfflineActivities;
pub use api::{authoring_download_json, merge_manifest_with_override, ManifestClient};
pub use authoring::{AuthoringDrafts, SqliteKeyValueStore};
pub use types::{ActivityRef, OfflineManifest};
