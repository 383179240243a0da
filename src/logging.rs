use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;
use crate::db::Database;

/// Environment variable holding the filter directive
pub const LOG_ENV: &str = "OUTPOST_LOG";

const LOG_FILE_PREFIX: &str = "outpost.log";

/// Install the global subscriber.
///
/// Lines go to a daily rolling file; with `stderr` set they are mirrored to
/// the terminal. Keep the guard alive for the life of the process or buffered
/// lines are lost.
pub fn init(config: &LogConfig, stderr: bool) -> Result<WorkerGuard> {
  let dir = log_dir(config)?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_filter(filter(&config.level));

  let stderr_layer = (stderr || config.stderr).then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .with_filter(filter(&config.level))
  });

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(guard)
}

/// `OUTPOST_LOG` if set and valid, else the configured level.
fn filter(default_level: &str) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Configured directory, or `logs/` next to the default database.
fn log_dir(config: &LogConfig) -> Result<PathBuf> {
  if let Some(dir) = &config.dir {
    return Ok(dir.clone());
  }
  let db_path = Database::default_path()?;
  Ok(
    db_path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .join("logs"),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_configured_dir_wins() {
    let config = LogConfig {
      dir: Some(PathBuf::from("/tmp/outpost-logs")),
      ..LogConfig::default()
    };
    assert_eq!(log_dir(&config).unwrap(), PathBuf::from("/tmp/outpost-logs"));
  }

  #[test]
  fn test_default_dir_sits_next_to_database() {
    let dir = log_dir(&LogConfig::default()).unwrap();
    assert!(dir.ends_with("outpost/logs"));
  }
}
