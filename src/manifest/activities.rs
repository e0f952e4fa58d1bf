//! Activities the learner has made available offline.

use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;

use super::api::normalize_and_sort_activities;
use super::types::{OfflineActivityRecord, OfflineManifest};
use crate::db::Database;

pub struct OfflineActivities {
  db: Arc<Database>,
}

impl OfflineActivities {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Record every activity of a manifest, keyed by content URL.
  pub fn save_manifest(&self, manifest: &OfflineManifest) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (order, activity) in manifest.activities.iter().enumerate() {
      tx.execute(
        "INSERT OR REPLACE INTO offline_activities
           (content_url, name, resource_url, manifest_name, position)
         VALUES (?, ?, ?, ?, ?)",
        params![
          activity.content_url,
          activity.name,
          activity.resource_url,
          manifest.name,
          order as i64
        ],
      )
      .map_err(|e| eyre!("Failed to store offline activity: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  /// All stored activities, sorted by manifest then order.
  pub fn list(&self) -> Result<Vec<OfflineActivityRecord>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT name, resource_url, content_url, manifest_name, position
         FROM offline_activities",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let records = stmt
      .query_map([], |row| {
        Ok(OfflineActivityRecord {
          name: row.get(0)?,
          resource_url: row.get(1)?,
          content_url: row.get(2)?,
          manifest_name: row.get(3)?,
          order: row.get(4)?,
        })
      })
      .map_err(|e| eyre!("Failed to query offline activities: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read offline activity: {}", e))?;

    Ok(normalize_and_sort_activities(records))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::ActivityRef;

  fn manifest(name: &str, activities: &[&str]) -> OfflineManifest {
    OfflineManifest {
      name: name.into(),
      activities: activities
        .iter()
        .map(|a| ActivityRef {
          name: a.to_string(),
          resource_url: format!("https://a/{}.json", a),
          content_url: format!("https://a/{}/content", a),
        })
        .collect(),
      cache_list: vec![],
    }
  }

  #[test]
  fn test_list_is_sorted_across_manifests() {
    let activities = OfflineActivities::new(Arc::new(Database::open_in_memory().unwrap()));
    activities.save_manifest(&manifest("B", &["b1", "b2"])).unwrap();
    activities.save_manifest(&manifest("A", &["a1"])).unwrap();

    let names: Vec<String> = activities
      .list()
      .unwrap()
      .into_iter()
      .map(|r| format!("{}:{}:{}", r.manifest_name, r.order, r.name))
      .collect();
    assert_eq!(names, vec!["A:0:a1", "B:0:b1", "B:1:b2"]);
  }

  #[test]
  fn test_resave_replaces_by_content_url() {
    let activities = OfflineActivities::new(Arc::new(Database::open_in_memory().unwrap()));
    activities.save_manifest(&manifest("A", &["x"])).unwrap();
    activities.save_manifest(&manifest("B", &["x"])).unwrap();

    let list = activities.list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].manifest_name, "B");
  }
}
