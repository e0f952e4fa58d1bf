use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "activity_offline=info";

/// Log to stderr and to a daily rolling file in `log_dir`.
///
/// The returned guard flushes the file writer when dropped, so `main`
/// holds it until exit.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "activity-offline.log");
  let (file_writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
