mod cache;
mod config;
mod db;
mod logging;
mod manifest;
mod storage;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use cache::{
  CacheEntry, CacheJobEngine, CacheKeys, FetchRequest, HttpFetcher, RequestOptions, RouteDecision,
  SqliteResponseStorage,
};
use config::Config;
use db::Database;
use manifest::{
  authoring_download_json, merge_manifest_with_override, AuthoringDrafts, ManifestClient,
  OfflineActivities, SqliteKeyValueStore,
};
use storage::{answers_question_id_to_ref_id, EmbeddableConfig, RunMode, StorageFacade};
use worker::{
  cache_offline_manifest, cache_urls_with_progress, CachingProgress, Worker, WorkerHandle,
  WorkerMessage,
};

#[derive(Parser, Debug)]
#[command(name = "activity-offline")]
#[command(about = "Offline caching and answer storage for an activity player")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/activity-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Activity to store answers for
  #[arg(short, long)]
  activity: Option<String>,

  /// Run mode (overrides config and ACTIVITY_OFFLINE_MODE)
  #[arg(short, long, value_enum)]
  mode: Option<RunMode>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache URLs for offline use
  Cache {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// Cache every URL of an offline manifest
  CacheManifest {
    /// Manifest name or absolute URL
    manifest: String,
  },
  /// Print the stored answers of an activity as JSON
  Export {
    #[arg(long)]
    activity: Option<String>,
  },
  /// Answer a request from the offline cache
  Lookup {
    url: String,
    /// Byte range, e.g. bytes=0-99
    #[arg(long)]
    range: Option<String>,
  },
  /// List activities available offline
  Activities,
  /// Print every stored answer of the current activity
  Answers,
  /// Store an interactive's state as an answer
  SaveAnswer {
    /// Embeddable reference id, e.g. 123-ManagedInteractive
    ref_id: String,
    /// Interactive state as JSON
    state: String,
    /// Authored state as JSON
    #[arg(long, default_value = "")]
    authored_state: String,
  },
  /// Read or write a learner plugin state
  PluginState {
    plugin_id: u64,
    #[arg(long)]
    set: Option<String>,
  },
  /// Manage the manifest draft being authored
  Draft {
    #[command(subcommand)]
    action: DraftAction,
  },
  /// Print worker version and connectivity
  Version,
}

#[derive(Subcommand, Debug)]
enum DraftAction {
  /// Select the draft merged into cached manifests
  Use { id: String },
  /// Stop authoring, optionally deleting the draft
  Clear {
    #[arg(long)]
    delete: bool,
  },
  /// Print the active draft as a downloadable manifest
  Download { name: String },
}

/// Prints caching progress to the terminal.
#[derive(Default)]
struct ConsoleProgress {
  cached: usize,
  failed: usize,
}

impl CachingProgress for ConsoleProgress {
  fn on_caching_started(&mut self) {
    println!("Caching...");
  }

  fn on_url_cached(&mut self, url: &str) {
    self.cached += 1;
    println!("  ok    {}", url);
  }

  fn on_url_cache_failed(&mut self, url: &str, reason: &str) {
    self.failed += 1;
    println!("  fail  {} ({})", url, reason);
  }

  fn on_caching_finished(&mut self) {
    println!("Done: {} cached, {} failed", self.cached, self.failed);
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(activity) = args.activity {
    config.activity_id = activity;
  }
  if let Some(mode) = args.mode {
    config.mode = mode;
  }

  let _log_guard = logging::init(&Database::data_dir()?.join("logs"))?;

  let db = Arc::new(Database::open(&config.database_path()?)?);
  info!(mode = ?config.mode, "Starting");

  match args.command {
    Command::Cache { urls } => {
      let worker = spawn_worker(&config, Arc::clone(&db))?;
      let entries = urls.into_iter().map(CacheEntry::new).collect();
      cache_urls_with_progress(&worker, entries, &mut ConsoleProgress::default()).await?;
      worker.shutdown().await?;
    }
    Command::CacheManifest { manifest } => {
      let client = ManifestClient::new(Arc::new(HttpFetcher::new()?), &config.manifests.base_url)?;
      let mut manifest = client.fetch_manifest(&manifest).await?;

      let drafts = AuthoringDrafts::new(SqliteKeyValueStore::new(Arc::clone(&db)));
      if let Some(draft) = drafts.active_draft()? {
        info!("Merging active authoring draft");
        manifest = merge_manifest_with_override(&manifest, &draft);
      }

      let worker = spawn_worker(&config, Arc::clone(&db))?;
      cache_offline_manifest(&worker, &manifest, &mut ConsoleProgress::default()).await?;
      worker.shutdown().await?;

      OfflineActivities::new(Arc::clone(&db)).save_manifest(&manifest)?;
    }
    Command::Export { activity } => {
      let facade = open_storage(&config, db)?;
      match facade.export_activity_to_json(activity.as_deref()).await? {
        Some(snapshot) => println!(
          "{}",
          serde_json::to_string_pretty(&snapshot)
            .map_err(|e| eyre!("Failed to serialize export: {}", e))?
        ),
        None => println!("No activity to export"),
      }
    }
    Command::Lookup { url, range } => {
      let mut options = RequestOptions::default();
      if let Some(range) = range {
        options.headers.insert("range".to_string(), range);
      }

      let worker = spawn_worker(&config, Arc::clone(&db))?;
      let decision = worker.intercept(FetchRequest { url, options }).await?;
      worker.shutdown().await?;

      match decision {
        RouteDecision::Respond(response) => {
          println!("{} ({} bytes)", response.status, response.body.len());
          for (name, value) in &response.headers {
            println!("{}: {}", name, value);
          }
        }
        RouteDecision::Miss => println!("Not cached"),
        RouteDecision::Passthrough => println!("Not served from the cache"),
      }
    }
    Command::Activities => {
      for record in OfflineActivities::new(db).list()? {
        println!(
          "{:<24} {:>3}  {:<32} {}",
          record.manifest_name, record.order, record.name, record.content_url
        );
      }
    }
    Command::Answers => {
      let facade = open_storage(&config, db)?;
      let subscription = facade
        .watch_all_answers(|answers| {
          for answer in answers {
            println!(
              "{}  {}  {}",
              answers_question_id_to_ref_id(&answer.meta.question_id),
              answer.meta.answer_type,
              answer.interactive_state
            );
          }
        })
        .await?;
      subscription.unsubscribe();
    }
    Command::SaveAnswer {
      ref_id,
      state,
      authored_state,
    } => {
      let state = serde_json::from_str(&state)
        .map_err(|e| eyre!("Failed to parse interactive state: {}", e))?;
      let embeddable = EmbeddableConfig::new(ref_id.clone(), authored_state);
      let facade = open_storage(&config, db)?;

      // Keep the id of an existing answer so the save updates it
      let prior = Arc::new(std::sync::Mutex::new(None));
      let slot = Arc::clone(&prior);
      facade
        .watch_answer(&ref_id, move |answer| {
          if let Ok(mut slot) = slot.lock() {
            *slot = answer.map(|a| a.meta);
          }
        })
        .await?
        .unsubscribe();
      let prior = prior
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .clone();

      let answer = facade
        .save_interactive_state(&state, &embeddable, prior.as_ref())
        .await?;
      println!("Saved answer {} for {}", answer.id, answer.question_id);
    }
    Command::PluginState { plugin_id, set } => {
      let facade = open_storage(&config, db)?;
      let state = match set {
        Some(state) => Some(facade.set_learner_plugin_state(plugin_id, &state).await?),
        None => facade.learner_plugin_state(plugin_id).await?,
      };
      match state {
        Some(state) => println!("{}", state),
        None => println!("No state for plugin {}", plugin_id),
      }
    }
    Command::Draft { action } => {
      let drafts = AuthoringDrafts::new(SqliteKeyValueStore::new(db));
      match action {
        DraftAction::Use { id } => {
          drafts.set_authoring_id(Some(id.as_str()))?;
          if drafts.authoring_data(&id)?.is_none() {
            drafts.save_active_draft(&Default::default())?;
          }
          println!("Authoring draft {}", id);
        }
        DraftAction::Clear { delete } => {
          if delete {
            if let Some(id) = drafts.authoring_id()? {
              drafts.clear_authoring_data(&id)?;
            }
          }
          drafts.clear_authoring_id()?;
        }
        DraftAction::Download { name } => {
          let draft = drafts
            .active_draft()?
            .ok_or_else(|| eyre!("No manifest draft is being authored"))?;
          println!(
            "{}",
            serde_json::to_string_pretty(&authoring_download_json(&name, &draft))
              .map_err(|e| eyre!("Failed to serialize draft: {}", e))?
          );
        }
      }
    }
    Command::Version => {
      let worker = spawn_worker(&config, Arc::clone(&db))?;
      println!("{}", worker.version_info().await?);
      worker.shutdown().await?;

      match open_storage(&config, db) {
        Ok(facade) => {
          let online = facade.check_if_online().await?;
          println!("{}", if online { "online" } else { "offline" });
        }
        Err(e) => println!("storage unavailable: {}", e),
      }
    }
  }

  Ok(())
}

fn spawn_worker(config: &Config, db: Arc<Database>) -> Result<WorkerHandle> {
  let engine = CacheJobEngine::new(
    Arc::new(SqliteResponseStorage::new(db)),
    Arc::new(HttpFetcher::new()?),
    CacheKeys::new(&config.worker.root_url)?,
  );
  let worker = Worker::spawn(engine, config.worker.version.clone());
  worker.post_message(WorkerMessage::SkipWaiting, None)?;
  Ok(worker)
}

fn open_storage(config: &Config, db: Arc<Database>) -> Result<StorageFacade> {
  StorageFacade::for_mode(
    config.mode,
    config.session(),
    db,
    config.storage.probe_url.clone(),
    // No networked document store is wired into the CLI
    None,
  )
}
