use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::storage::{RunMode, Session};

/// Environment variable overriding the configured run mode.
pub const MODE_ENV: &str = "ACTIVITY_OFFLINE_MODE";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
  #[serde(default)]
  pub mode: RunMode,
  /// Activity answers are stored for by default
  #[serde(default)]
  pub activity_id: String,
  #[serde(default)]
  pub run_key: String,
  #[serde(default)]
  pub manifests: ManifestsConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ManifestsConfig {
  /// Base that relative manifest locations resolve against
  #[serde(default = "default_base_url")]
  pub base_url: String,
}

impl Default for ManifestsConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkerConfig {
  /// Origin and path the worker serves from, e.g. `https://host/app/`
  #[serde(default = "default_base_url")]
  pub root_url: String,
  #[serde(default = "default_worker_version")]
  pub version: String,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      root_url: default_base_url(),
      version: default_worker_version(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StorageConfig {
  /// Database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// URL probed to decide whether the network is reachable
  pub probe_url: Option<Url>,
}

fn default_base_url() -> String {
  "http://localhost:8080/".to_string()
}

fn default_worker_version() -> String {
  env!("CARGO_PKG_VERSION").to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./activity-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/activity-offline/config.yaml
  ///
  /// Without any file the defaults are used. `ACTIVITY_OFFLINE_MODE`
  /// overrides the mode either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.with_env_overrides()
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("activity-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("activity-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn with_env_overrides(self) -> Result<Self> {
    match std::env::var(MODE_ENV) {
      Ok(mode) => self.apply_mode_override(&mode),
      Err(_) => Ok(self),
    }
  }

  fn apply_mode_override(self, mode: &str) -> Result<Self> {
    let mode = mode
      .parse()
      .map_err(|e| eyre!("Invalid {}: {}", MODE_ENV, e))?;
    Ok(Self { mode, ..self })
  }

  /// The learner session described by this configuration.
  pub fn session(&self) -> Session {
    Session::new(self.activity_id.clone(), self.run_key.clone())
  }

  /// Configured database path, or the default under the data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.database {
      Some(path) => Ok(path.clone()),
      None => crate::db::Database::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_load_full_config() {
    let file = write_config(
      r#"
mode: online
activity_id: https://authoring.example.org/api/v1/activities/12.json
run_key: run-abc
manifests:
  base_url: https://player.example.org/
worker:
  root_url: https://player.example.org/app/
  version: 2.1.0
storage:
  database: /tmp/offline.db
  probe_url: https://player.example.org/ping
"#,
    );

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.mode, RunMode::Online);
    assert_eq!(config.run_key, "run-abc");
    assert_eq!(config.manifests.base_url, "https://player.example.org/");
    assert_eq!(config.worker.version, "2.1.0");
    assert_eq!(config.storage.database, Some(PathBuf::from("/tmp/offline.db")));
    assert_eq!(
      config.storage.probe_url.as_ref().map(Url::as_str),
      Some("https://player.example.org/ping")
    );
    assert_eq!(config.session().activity_id, config.activity_id);
  }

  #[test]
  fn test_missing_sections_default() {
    let file = write_config("activity_id: sample\n");
    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.mode, RunMode::Offline);
    assert_eq!(config.worker, WorkerConfig::default());
    assert_eq!(config.storage, StorageConfig::default());
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    let file = write_config("mode: [not, a, mode]\n");
    let err = Config::load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }

  #[test]
  fn test_mode_override() {
    let config = Config::default().apply_mode_override("online").unwrap();
    assert_eq!(config.mode, RunMode::Online);
    assert!(Config::default().apply_mode_override("later").is_err());
  }

  #[test]
  fn test_database_path_prefers_config() {
    let config = Config {
      storage: StorageConfig {
        database: Some(PathBuf::from("/data/answers.db")),
        probe_url: None,
      },
      ..Config::default()
    };
    assert_eq!(config.database_path().unwrap(), PathBuf::from("/data/answers.db"));
  }
}
